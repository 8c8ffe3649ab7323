use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// A gossiped peer address; `timestamp` is when the advertising node last
/// heard from it.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct TimestampedPeerInfo {
    pub host: String,
    pub port: u16,
    pub timestamp: u64,
}
