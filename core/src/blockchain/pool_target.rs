use crate::blockchain::sized_bytes::Bytes32;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// Where the pool portion of the reward must be paid. `max_height == 0`
/// means the target never expires.
#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct PoolTarget {
    pub puzzle_hash: Bytes32,
    pub max_height: u32,
}
