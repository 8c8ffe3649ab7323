use evg_core::blockchain::coin::Coin;
use evg_core::blockchain::coin_record::CoinRecord;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::errors::ChainError;
use evg_macros::Streamable;
use evg_serialize::Streamable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The coin-record changes of one body-validated block: reward claims and
/// generator additions, and the ids the generator spent. Persisted per
/// block so a reorg can undo and replay committed blocks without re-running
/// their generators.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct BlockCoinDiff {
    pub height: u32,
    pub timestamp: u64,
    /// `(coin, coinbase)` pairs created by this block.
    pub additions: Vec<(Coin, bool)>,
    pub removal_ids: Vec<Bytes32>,
}

/// A raw keyed write, precomputed outside the commit transaction so the
/// transaction closure itself stays trivial and retry-safe.
#[derive(Clone, Debug)]
pub enum KvOp {
    Insert(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// Coin-record values staged during a multi-block undo/replay. `None`
/// means the record will not exist once the pending ops commit.
pub type StagedCoins = HashMap<Bytes32, Option<CoinRecord>>;

pub(crate) fn db_err(e: sled::Error) -> ChainError {
    match e {
        sled::Error::Corruption { .. } => ChainError::Corruption(e.to_string()),
        other => ChainError::Database(other.to_string()),
    }
}

fn puzzle_key(puzzle_hash: &Bytes32, coin_id: &Bytes32) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend(puzzle_hash.as_slice());
    key.extend(coin_id.as_slice());
    key
}

/// Coin records by id, with a secondary index by puzzle hash. All writes go
/// through `KvOp` lists applied by the chain's single commit transaction.
pub struct CoinStore {
    coin_records: sled::Tree,
    puzzle_index: sled::Tree,
}

impl CoinStore {
    pub fn open(db: &sled::Db) -> Result<Self, ChainError> {
        Ok(CoinStore {
            coin_records: db.open_tree("coin_records").map_err(db_err)?,
            puzzle_index: db.open_tree("puzzle_index").map_err(db_err)?,
        })
    }

    pub fn coin_records_tree(&self) -> &sled::Tree {
        &self.coin_records
    }

    pub fn puzzle_index_tree(&self) -> &sled::Tree {
        &self.puzzle_index
    }

    pub fn get_coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, ChainError> {
        match self.coin_records.get(coin_id.as_slice()).map_err(db_err)? {
            Some(raw) => Ok(Some(CoinRecord::from_bytes(&raw).map_err(|e| {
                ChainError::Corruption(format!("bad coin record for {coin_id}: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Reads through pending staged changes, falling back to the tree.
    pub fn staged_get(
        &self,
        staged: &StagedCoins,
        coin_id: &Bytes32,
    ) -> Result<Option<CoinRecord>, ChainError> {
        match staged.get(coin_id) {
            Some(value) => Ok(*value),
            None => self.get_coin_record(coin_id),
        }
    }

    /// Records touching `puzzle_hash` with activity in `[start_height,
    /// end_height]`. `include_spent` keeps records that are already spent;
    /// otherwise only unspent records are returned.
    pub fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Bytes32,
        start_height: u32,
        end_height: u32,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, ChainError> {
        let mut records = Vec::new();
        for entry in self.puzzle_index.scan_prefix(puzzle_hash.as_slice()) {
            let (key, _) = entry.map_err(db_err)?;
            let coin_id = Bytes32::parse(&key[32..])
                .map_err(|e| ChainError::Corruption(format!("bad puzzle index key: {e}")))?;
            let Some(record) = self.get_coin_record(&coin_id)? else {
                continue;
            };
            let confirmed_in_range =
                record.confirmed_height >= start_height && record.confirmed_height <= end_height;
            let spent_in_range = record.is_spent()
                && record.spent_height >= start_height
                && record.spent_height <= end_height;
            if !confirmed_in_range && !spent_in_range {
                continue;
            }
            if !include_spent && record.is_spent() {
                continue;
            }
            records.push(record);
        }
        records.sort_by_key(|record| (record.confirmed_height, record.name()));
        Ok(records)
    }

    /// Stages the writes that apply `diff` on top of `staged`, appending
    /// the keyed ops for the commit transaction. Fails without staging
    /// anything further if a removal is unknown or already spent.
    pub fn stage_apply_diff(
        &self,
        diff: &BlockCoinDiff,
        staged: &mut StagedCoins,
        coin_ops: &mut Vec<KvOp>,
        puzzle_ops: &mut Vec<KvOp>,
    ) -> Result<(), ChainError> {
        for (coin, coinbase) in &diff.additions {
            let record = CoinRecord::created(*coin, diff.height, diff.timestamp, *coinbase);
            let coin_id = record.name();
            staged.insert(coin_id, Some(record));
            coin_ops.push(KvOp::Insert(coin_id.as_slice().to_vec(), record.to_bytes()));
            puzzle_ops.push(KvOp::Insert(
                puzzle_key(&coin.puzzle_hash, &coin_id),
                Vec::new(),
            ));
        }
        for coin_id in &diff.removal_ids {
            let mut record = self.staged_get(staged, coin_id)?.ok_or_else(|| {
                ChainError::Corruption(format!(
                    "block at height {} spends unknown coin {coin_id}",
                    diff.height
                ))
            })?;
            if record.is_spent() {
                return Err(ChainError::Corruption(format!(
                    "block at height {} double-spends {coin_id}",
                    diff.height
                )));
            }
            record.spent_height = diff.height;
            staged.insert(*coin_id, Some(record));
            coin_ops.push(KvOp::Insert(coin_id.as_slice().to_vec(), record.to_bytes()));
        }
        Ok(())
    }

    /// Exact inverse of `stage_apply_diff` for the same diff.
    pub fn stage_undo_diff(
        &self,
        diff: &BlockCoinDiff,
        staged: &mut StagedCoins,
        coin_ops: &mut Vec<KvOp>,
        puzzle_ops: &mut Vec<KvOp>,
    ) -> Result<(), ChainError> {
        for (coin, _) in &diff.additions {
            let coin_id = coin.coin_id();
            staged.insert(coin_id, None);
            coin_ops.push(KvOp::Remove(coin_id.as_slice().to_vec()));
            puzzle_ops.push(KvOp::Remove(puzzle_key(&coin.puzzle_hash, &coin_id)));
        }
        for coin_id in &diff.removal_ids {
            let mut record = self.staged_get(staged, coin_id)?.ok_or_else(|| {
                ChainError::Corruption(format!("cannot unspend unknown coin {coin_id}"))
            })?;
            if record.spent_height != diff.height {
                return Err(ChainError::Corruption(format!(
                    "coin {coin_id} spent at {} but undoing height {}",
                    record.spent_height, diff.height
                )));
            }
            record.spent_height = 0;
            staged.insert(*coin_id, Some(record));
            coin_ops.push(KvOp::Insert(coin_id.as_slice().to_vec(), record.to_bytes()));
        }
        Ok(())
    }
}
