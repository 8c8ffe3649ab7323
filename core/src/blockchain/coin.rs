use crate::blockchain::sized_bytes::Bytes32;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Coin {
    pub parent_coin_info: Bytes32,
    pub puzzle_hash: Bytes32,
    pub amount: u64,
}

impl Coin {
    pub fn name(&self) -> Bytes32 {
        self.coin_id()
    }

    /// The coin id commits to the amount as a minimal big-endian integer
    /// (no leading zero bytes, one leading zero byte when the high bit is
    /// set), matching how the evaluator sees the amount.
    pub fn coin_id(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_coin_info);
        hasher.update(self.puzzle_hash);
        let amount_bytes = self.amount.to_be_bytes();
        if self.amount >= 0x8000_0000_0000_0000 {
            hasher.update([0u8]);
            hasher.update(amount_bytes);
        } else {
            let start = if self.amount == 0 {
                8
            } else {
                ((self.amount.leading_zeros() + 7) / 8).saturating_sub(1) as usize
            };
            hasher.update(&amount_bytes[start..]);
        }
        let digest: [u8; 32] = hasher.finalize().into();
        Bytes32::new(digest)
    }
}

impl Hash for Coin {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.coin_id().as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_id_distinguishes_amount_encoding() {
        let parent = Bytes32::new([1u8; 32]);
        let puzzle_hash = Bytes32::new([2u8; 32]);
        let ids: Vec<Bytes32> = [
            0u64,
            1,
            0x7F,
            0x80,
            0xFF,
            0xFFFF,
            0x7FFF_FFFF_FFFF_FFFF,
            0x8000_0000_0000_0000,
            u64::MAX,
        ]
        .iter()
        .map(|&amount| {
            Coin {
                parent_coin_info: parent,
                puzzle_hash,
                amount,
            }
            .coin_id()
        })
        .collect();
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_coin_id_is_stable() {
        let coin = Coin {
            parent_coin_info: Bytes32::new([3u8; 32]),
            puzzle_hash: Bytes32::new([4u8; 32]),
            amount: 1_000_000,
        };
        assert_eq!(coin.coin_id(), coin.coin_id());
        assert_eq!(coin.name(), coin.coin_id());
    }
}
