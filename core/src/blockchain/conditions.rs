use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::{Bytes32, Bytes48};
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// Conditions declared by one coin spend, as reported by the external
/// evaluator. The node trusts the evaluator to have enforced the cost limit
/// while producing these; everything else (unspentness, conservation,
/// signatures) is checked here.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SpendConditions {
    pub coin_id: Bytes32,
    pub puzzle_hash: Bytes32,
    pub created_coins: Vec<Coin>,
    /// `(public_key, message)` pairs; the verifier appends the coin id and
    /// the per-network salt before checking the aggregate.
    pub agg_sig_pairs: Vec<(Bytes48, Vec<u8>)>,
    pub assert_height_absolute: Option<u32>,
    pub assert_seconds_absolute: Option<u64>,
    pub assert_before_height_absolute: Option<u32>,
    pub cost: u64,
}

/// The full result of running a block generator or a spend bundle through
/// the evaluator.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct BlockProgramOutput {
    pub spends: Vec<SpendConditions>,
    pub cost: u64,
}

impl BlockProgramOutput {
    pub fn additions(&self) -> Vec<Coin> {
        self.spends
            .iter()
            .flat_map(|spend| spend.created_coins.iter().copied())
            .collect()
    }

    pub fn removal_ids(&self) -> Vec<Bytes32> {
        self.spends.iter().map(|spend| spend.coin_id).collect()
    }

    pub fn addition_amount(&self) -> u128 {
        self.spends
            .iter()
            .flat_map(|spend| &spend.created_coins)
            .map(|coin| u128::from(coin.amount))
            .sum()
    }

    /// Most restrictive height lock across all spends, if any.
    pub fn assert_height(&self) -> Option<u32> {
        self.spends
            .iter()
            .filter_map(|spend| spend.assert_height_absolute)
            .max()
    }

    pub fn assert_before_height(&self) -> Option<u32> {
        self.spends
            .iter()
            .filter_map(|spend| spend.assert_before_height_absolute)
            .min()
    }
}
