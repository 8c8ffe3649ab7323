use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::Bytes32;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// A coin plus its confirmation and spend heights. `spent_height == 0` is
/// the unspent sentinel; height-0 coins are the pre-farm rewards, which can
/// never be spent in the genesis block itself, so the sentinel is
/// unambiguous.
#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CoinRecord {
    pub coin: Coin,
    pub confirmed_height: u32,
    pub spent_height: u32,
    pub coinbase: bool,
    pub timestamp: u64,
}

impl CoinRecord {
    pub fn created(coin: Coin, height: u32, timestamp: u64, coinbase: bool) -> Self {
        Self {
            coin,
            confirmed_height: height,
            spent_height: 0,
            coinbase,
            timestamp,
        }
    }

    pub fn name(&self) -> Bytes32 {
        self.coin.coin_id()
    }

    pub fn is_spent(&self) -> bool {
        self.spent_height != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spent_sentinel() {
        let coin = Coin {
            parent_coin_info: Bytes32::new([1u8; 32]),
            puzzle_hash: Bytes32::new([2u8; 32]),
            amount: 100,
        };
        let mut record = CoinRecord::created(coin, 10, 1_700_000_000, false);
        assert!(!record.is_spent());
        record.spent_height = 12;
        assert!(record.is_spent());
        assert!(record.spent_height >= record.confirmed_height);
    }
}
