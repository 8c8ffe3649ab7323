use crate::blockchain::coin::Coin;
use crate::blockchain::conditions::BlockProgramOutput;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::spend_bundle::SpendBundle;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fixed-point scale for fee-per-cost indexing. Integer arithmetic keeps
/// eviction and assembly ordering identical on every platform.
pub const FEE_RATE_SCALE: u128 = 1_000_000;

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MempoolItem {
    pub spend_bundle: SpendBundle,
    pub name: Bytes32,
    pub cost: u64,
    pub fee: u64,
    pub added_at_height: u32,
    pub conds: BlockProgramOutput,
    pub additions: Vec<Coin>,
    pub removal_ids: Vec<Bytes32>,
    pub assert_height: Option<u32>,
    pub assert_before_height: Option<u32>,
}

impl MempoolItem {
    /// Scaled integer fee rate used as the priority index key.
    pub fn scaled_fee_rate(&self) -> u128 {
        debug_assert!(self.cost > 0);
        u128::from(self.fee) * FEE_RATE_SCALE / u128::from(self.cost)
    }

    /// Exact fee-rate comparison by cross multiplication; no rounding, no
    /// floats.
    pub fn cmp_fee_rate(&self, other: &MempoolItem) -> Ordering {
        let lhs = u128::from(self.fee) * u128::from(other.cost);
        let rhs = u128::from(other.fee) * u128::from(self.cost);
        lhs.cmp(&rhs)
    }

    pub fn fee_per_cost(&self) -> f64 {
        self.fee as f64 / self.cost as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::spend_bundle::SpendBundle;

    fn item(fee: u64, cost: u64) -> MempoolItem {
        MempoolItem {
            spend_bundle: SpendBundle::default(),
            name: Bytes32::default(),
            cost,
            fee,
            added_at_height: 0,
            conds: BlockProgramOutput::default(),
            additions: vec![],
            removal_ids: vec![],
            assert_height: None,
            assert_before_height: None,
        }
    }

    #[test]
    fn test_fee_rate_ordering() {
        assert_eq!(item(10, 100).cmp_fee_rate(&item(1, 10)), Ordering::Equal);
        assert_eq!(item(11, 100).cmp_fee_rate(&item(1, 10)), Ordering::Greater);
        assert_eq!(item(9, 100).cmp_fee_rate(&item(1, 10)), Ordering::Less);
    }

    #[test]
    fn test_scaled_fee_rate() {
        assert_eq!(item(1, 2).scaled_fee_rate(), FEE_RATE_SCALE / 2);
        assert_eq!(item(0, 100).scaled_fee_rate(), 0);
    }
}
