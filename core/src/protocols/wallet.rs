use crate::blockchain::coin::Coin;
use crate::blockchain::coin_record::CoinRecord;
use crate::blockchain::header_block::HeaderBlock;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::spend_bundle::SpendBundle;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// Light-client view of a coin: creation and spend heights, absent while
/// pending.
#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CoinState {
    pub coin: Coin,
    pub created_height: Option<u32>,
    pub spent_height: Option<u32>,
}

impl From<&CoinRecord> for CoinState {
    fn from(record: &CoinRecord) -> Self {
        CoinState {
            coin: record.coin,
            created_height: Some(record.confirmed_height),
            spent_height: if record.is_spent() {
                Some(record.spent_height)
            } else {
                None
            },
        }
    }
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SendTransaction {
    pub transaction: SpendBundle,
}

#[repr(u8)]
#[derive(Streamable, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionAckStatus {
    Success = 1,
    Pending = 2,
    Failed = 3,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct TransactionAck {
    pub txid: Bytes32,
    pub status: TransactionAckStatus,
    pub error: Option<String>,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NewPeakWallet {
    pub header_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
    pub fork_point_with_previous_peak: u32,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RequestBlockHeader {
    pub height: u32,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RespondBlockHeader {
    pub header_block: HeaderBlock,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RejectHeaderRequest {
    pub height: u32,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RegisterForPhUpdates {
    pub puzzle_hashes: Vec<Bytes32>,
    pub min_height: u32,
}

/// Initial states for a puzzle-hash registration. `truncated` signals that
/// the response hit `max_subscribe_response_items` and the client should
/// paginate with a higher `min_height`.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RespondToPhUpdates {
    pub puzzle_hashes: Vec<Bytes32>,
    pub min_height: u32,
    pub coin_states: Vec<CoinState>,
    pub truncated: bool,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RegisterForCoinUpdates {
    pub coin_ids: Vec<Bytes32>,
    pub min_height: u32,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RespondToCoinUpdates {
    pub coin_ids: Vec<Bytes32>,
    pub min_height: u32,
    pub coin_states: Vec<CoinState>,
    pub truncated: bool,
}

/// Pushed to every subscribed peer after each committed block, in height
/// order.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CoinStateUpdate {
    pub height: u32,
    pub fork_height: u32,
    pub peak_hash: Bytes32,
    pub items: Vec<CoinState>,
}
