use crate::protocols::NodeType;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "0.0.36";

/// Optional capability flags advertised at handshake. Unknown values are
/// carried opaquely so older nodes interoperate with newer ones.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    Base = 1,
    BlockHeaders = 2,
    RateLimitsV2 = 3,
}

pub fn default_capabilities() -> Vec<(u16, String)> {
    vec![
        (Capability::Base as u16, "1".to_string()),
        (Capability::BlockHeaders as u16, "1".to_string()),
        (Capability::RateLimitsV2 as u16, "1".to_string()),
    ]
}

/// First message on every connection, both directions.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Handshake {
    pub network_id: String,
    pub protocol_version: String,
    pub software_version: String,
    pub server_port: u16,
    pub node_type: NodeType,
    pub capabilities: Vec<(u16, String)>,
}
