use crate::block_store::{meta_peak_key, BlockStore};
use crate::block_validation::{validate_block, ChainView, UnspentView, ValidatedBlock};
use crate::coin_store::{BlockCoinDiff, CoinStore, KvOp, StagedCoins};
use crate::verifiers::Verifiers;
use evg_core::blockchain::block_record::BlockRecord;
use evg_core::blockchain::coin_record::CoinRecord;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::errors::{ChainError, ValidationError};
use log::{info, warn};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of offering a block to the chain.
#[derive(Debug)]
pub enum AddResult {
    /// The block extends or reorganizes the chain; `fork_height` is the
    /// height of the common ancestor with the previous peak.
    NewPeak { fork_height: u32 },
    /// Valid, stored, but not heavier than the current peak.
    AddedAsOrphan,
    AlreadyHave,
    Invalid(ValidationError),
    /// The parent is unknown; callers may buffer and retry.
    Disconnected,
}

/// The blockchain state machine. One writer at a time: every mutating
/// method takes `&mut self`, and the node serialises access behind a
/// single lock. Records live in an in-memory arena keyed by header hash;
/// the durable peak and coin set only change inside one sled transaction.
pub struct Blockchain {
    constants: Arc<ConsensusConstants>,
    block_store: BlockStore,
    coin_store: CoinStore,
    verifiers: Verifiers,
    block_records: HashMap<Bytes32, BlockRecord>,
    height_map: HashMap<u32, Bytes32>,
    peak: Option<Bytes32>,
}

impl ChainView for Blockchain {
    fn block_record(&self, hash: &Bytes32) -> Option<BlockRecord> {
        self.block_records.get(hash).cloned()
    }
}

impl UnspentView for Blockchain {
    fn coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, ChainError> {
        self.coin_store.get_coin_record(coin_id)
    }
}

/// Unspent view of a fork branch: the committed coin set with the blocks
/// between the fork point and the branch tip overlaid.
struct OverlayView<'a> {
    base: &'a CoinStore,
    overrides: StagedCoins,
}

impl UnspentView for OverlayView<'_> {
    fn coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, ChainError> {
        self.base.staged_get(&self.overrides, coin_id)
    }
}

impl Blockchain {
    pub fn open(
        db: &sled::Db,
        constants: Arc<ConsensusConstants>,
        verifiers: Verifiers,
        network: &str,
    ) -> Result<Self, ChainError> {
        let block_store = BlockStore::open(db, network)?;
        let coin_store = CoinStore::open(db)?;
        let mut block_records = HashMap::new();
        for record in block_store.all_block_records()? {
            block_records.insert(record.header_hash, record);
        }
        let peak = block_store.get_peak_hash()?;
        let mut height_map = HashMap::new();
        if let Some(peak_hash) = &peak {
            let peak_record = block_records.get(peak_hash).ok_or_else(|| {
                ChainError::Corruption(format!("peak {peak_hash} has no record"))
            })?;
            for height in 0..=peak_record.height {
                let hash = block_store.get_hash_at_height(height)?.ok_or_else(|| {
                    ChainError::Corruption(format!("height index missing {height}"))
                })?;
                height_map.insert(height, hash);
            }
            info!(
                "loaded chain: peak {} at height {}",
                peak_hash, peak_record.height
            );
        }
        Ok(Blockchain {
            constants,
            block_store,
            coin_store,
            verifiers,
            block_records,
            height_map,
            peak,
        })
    }

    pub fn constants(&self) -> &ConsensusConstants {
        &self.constants
    }

    pub fn peak_record(&self) -> Option<BlockRecord> {
        self.peak
            .as_ref()
            .and_then(|hash| self.block_records.get(hash).cloned())
    }

    pub fn peak_height(&self) -> Option<u32> {
        self.peak_record().map(|record| record.height)
    }

    /// Difficulty in force at the current peak's era.
    pub fn current_difficulty(&self) -> u64 {
        match self.peak_record() {
            None => self.constants.difficulty_starting,
            Some(peak) if peak.height == 0 => self.constants.difficulty_starting,
            Some(peak) => match self.block_records.get(&peak.prev_hash) {
                Some(parent) => (peak.weight - parent.weight) as u64,
                None => self.constants.difficulty_starting,
            },
        }
    }

    pub fn current_sub_slot_iters(&self) -> u64 {
        self.peak_record()
            .map_or(self.constants.sub_slot_iters_starting, |record| {
                record.sub_slot_iters
            })
    }

    pub fn contains_block(&self, hash: &Bytes32) -> bool {
        self.block_records.contains_key(hash)
    }

    pub fn get_block(&self, hash: &Bytes32) -> Result<Option<FullBlock>, ChainError> {
        self.block_store.get_block(hash)
    }

    pub fn get_block_at_height(&self, height: u32) -> Result<Option<FullBlock>, ChainError> {
        match self.height_map.get(&height) {
            Some(hash) => self.block_store.get_block(hash),
            None => Ok(None),
        }
    }

    pub fn get_block_record(&self, hash: &Bytes32) -> Option<BlockRecord> {
        self.block_records.get(hash).cloned()
    }

    pub fn get_coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, ChainError> {
        self.coin_store.get_coin_record(coin_id)
    }

    pub fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Bytes32,
        start_height: u32,
        end_height: u32,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, ChainError> {
        self.coin_store.get_coin_records_by_puzzle_hash(
            puzzle_hash,
            start_height,
            end_height,
            include_spent,
        )
    }

    pub fn get_coin_diff(&self, hash: &Bytes32) -> Result<Option<BlockCoinDiff>, ChainError> {
        self.block_store.get_coin_diff(hash)
    }

    pub fn headers_between(&self, start: u32, end: u32) -> Result<Vec<BlockRecord>, ChainError> {
        self.block_store.headers_between(start, end)
    }

    pub fn get_sub_epoch_summaries(
        &self,
    ) -> Result<Vec<evg_core::blockchain::sub_epoch_summary::SubEpochSummary>, ChainError> {
        self.block_store.get_sub_epoch_summaries()
    }

    /// Offers a block to the chain. Validation runs against the block's own
    /// branch; commit (when it wins fork choice) is a single atomic
    /// transaction.
    pub fn add_block(&mut self, block: &FullBlock, now: u64) -> Result<AddResult, ChainError> {
        let header_hash = block.header_hash();
        if self.block_records.contains_key(&header_hash) {
            return Ok(AddResult::AlreadyHave);
        }
        if block.height() > 0 && !self.block_records.contains_key(&block.prev_header_hash()) {
            return Ok(AddResult::Disconnected);
        }

        let overlay = OverlayView {
            base: &self.coin_store,
            overrides: if block.height() == 0 {
                StagedCoins::new()
            } else {
                self.branch_overrides(&block.prev_header_hash())?
            },
        };
        let validated = match validate_block(
            &self.constants,
            &*self,
            &overlay,
            block,
            &self.verifiers,
            now,
        ) {
            Ok(validated) => validated,
            Err(ChainError::Validation(error)) => {
                warn!("rejecting block {header_hash}: {error}");
                return Ok(AddResult::Invalid(error));
            }
            Err(other) => return Err(other),
        };
        drop(overlay);

        self.block_store
            .put_block(block, &validated.record, &validated.diff)?;
        self.block_records
            .insert(header_hash, validated.record.clone());

        if !self.wins_fork_choice(&validated.record) {
            return Ok(AddResult::AddedAsOrphan);
        }
        let fork_height = self.commit_peak(&validated)?;
        Ok(AddResult::NewPeak { fork_height })
    }

    /// Greatest weight wins; equal weight breaks toward the smaller header
    /// hash so every node picks the same peak.
    fn wins_fork_choice(&self, candidate: &BlockRecord) -> bool {
        match self.peak_record() {
            None => true,
            Some(peak) => {
                candidate.weight > peak.weight
                    || (candidate.weight == peak.weight
                        && candidate.header_hash < peak.header_hash)
            }
        }
    }

    /// Coin-state overrides turning the committed set into the state as of
    /// `branch_tip`: main-chain blocks above the common ancestor undone,
    /// branch blocks applied.
    fn branch_overrides(&self, branch_tip: &Bytes32) -> Result<StagedCoins, ChainError> {
        let mut overrides = StagedCoins::new();
        if self.peak.as_ref() == Some(branch_tip) {
            return Ok(overrides);
        }
        let tip_record = self.block_records.get(branch_tip).ok_or_else(|| {
            ChainError::Corruption(format!("unknown branch tip {branch_tip}"))
        })?;
        let (fork_height, apply_chain) = self.path_from_main_chain(tip_record)?;

        // throwaway op sinks; only the staged map matters here
        let mut coin_ops = Vec::new();
        let mut puzzle_ops = Vec::new();
        if let Some(peak_record) = self.peak_record() {
            let mut height = peak_record.height;
            while fork_height.map_or(true, |fork| height > fork) {
                let Some(hash) = self.height_map.get(&height) else {
                    break;
                };
                let diff = self.require_diff(hash)?;
                self.coin_store.stage_undo_diff(
                    &diff,
                    &mut overrides,
                    &mut coin_ops,
                    &mut puzzle_ops,
                )?;
                if height == 0 {
                    break;
                }
                height -= 1;
            }
        }
        for hash in &apply_chain {
            let diff = self.require_diff(hash)?;
            self.coin_store.stage_apply_diff(
                &diff,
                &mut overrides,
                &mut coin_ops,
                &mut puzzle_ops,
            )?;
        }
        Ok(overrides)
    }

    fn require_diff(&self, hash: &Bytes32) -> Result<BlockCoinDiff, ChainError> {
        self.block_store.get_coin_diff(hash)?.ok_or_else(|| {
            ChainError::Corruption(format!("missing coin diff for {hash}"))
        })
    }

    /// Walks from `tip` back to the first ancestor on the current main
    /// chain. Returns that ancestor's height (None when the branch roots at
    /// genesis off-chain) and the branch hashes above it, ascending.
    fn path_from_main_chain(
        &self,
        tip: &BlockRecord,
    ) -> Result<(Option<u32>, Vec<Bytes32>), ChainError> {
        let mut apply_chain = Vec::new();
        let mut cursor = tip.clone();
        loop {
            if self.height_map.get(&cursor.height) == Some(&cursor.header_hash) {
                return Ok((Some(cursor.height), {
                    apply_chain.reverse();
                    apply_chain
                }));
            }
            apply_chain.push(cursor.header_hash);
            if cursor.height == 0 {
                apply_chain.reverse();
                return Ok((None, apply_chain));
            }
            cursor = self
                .block_records
                .get(&cursor.prev_hash)
                .cloned()
                .ok_or_else(|| {
                    ChainError::Corruption(format!("missing ancestor {}", cursor.prev_hash))
                })?;
        }
    }

    /// Installs `validated` as the new peak: undoes the old branch, applies
    /// the new one, swaps the height index and peak pointer, all in one
    /// transaction. Either the new peak is fully installed or nothing
    /// changed.
    fn commit_peak(&mut self, validated: &ValidatedBlock) -> Result<u32, ChainError> {
        let record = &validated.record;
        // the walk starts at the new block itself, so it ends the chain
        let (fork_height, apply_chain) = self.path_from_main_chain(record)?;

        let mut staged = StagedCoins::new();
        let mut coin_ops = Vec::new();
        let mut puzzle_ops = Vec::new();
        let mut height_ops = Vec::new();
        let mut undone_heights = Vec::new();

        if let Some(peak_record) = self.peak_record() {
            let mut height = peak_record.height;
            while fork_height.map_or(true, |fork| height > fork) {
                let Some(hash) = self.height_map.get(&height).copied() else {
                    break;
                };
                let diff = self.require_diff(&hash)?;
                self.coin_store
                    .stage_undo_diff(&diff, &mut staged, &mut coin_ops, &mut puzzle_ops)?;
                height_ops.push(KvOp::Remove(height.to_be_bytes().to_vec()));
                undone_heights.push(height);
                if height == 0 {
                    break;
                }
                height -= 1;
            }
        }

        let mut applied: Vec<(u32, Bytes32)> = Vec::new();
        for hash in &apply_chain {
            let (diff, height) = if *hash == record.header_hash {
                (validated.diff.clone(), record.height)
            } else {
                let block_record = self.block_records.get(hash).ok_or_else(|| {
                    ChainError::Corruption(format!("missing record for {hash}"))
                })?;
                (self.require_diff(hash)?, block_record.height)
            };
            self.coin_store
                .stage_apply_diff(&diff, &mut staged, &mut coin_ops, &mut puzzle_ops)?;
            height_ops.push(KvOp::Insert(
                height.to_be_bytes().to_vec(),
                hash.as_slice().to_vec(),
            ));
            applied.push((height, *hash));
        }

        let meta_ops = vec![KvOp::Insert(
            meta_peak_key().to_vec(),
            record.header_hash.as_slice().to_vec(),
        )];

        let trees = (
            self.coin_store.coin_records_tree(),
            self.coin_store.puzzle_index_tree(),
            self.block_store.height_index_tree(),
            self.block_store.metadata_tree(),
        );
        trees
            .transaction(|(coins, puzzles, heights, meta)| {
                for (tree, ops) in [
                    (coins, &coin_ops),
                    (puzzles, &puzzle_ops),
                    (heights, &height_ops),
                    (meta, &meta_ops),
                ] {
                    for op in ops {
                        match op {
                            KvOp::Insert(key, value) => {
                                tree.insert(key.as_slice(), value.as_slice())?;
                            }
                            KvOp::Remove(key) => {
                                tree.remove(key.as_slice())?;
                            }
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| ChainError::Database(format!("peak commit failed: {e:?}")))?;

        // durable state switched; mirror it in memory
        for height in undone_heights {
            self.height_map.remove(&height);
        }
        for (height, hash) in applied {
            self.height_map.insert(height, hash);
        }
        self.peak = Some(record.header_hash);
        if let Some(summary) = &record.sub_epoch_summary_included {
            let index = record.height / self.constants.sub_epoch_blocks;
            self.block_store.put_sub_epoch_summary(index, summary)?;
        }
        let fork_height = fork_height.unwrap_or(0);
        info!(
            "new peak {} at height {} (fork height {fork_height})",
            record.header_hash, record.height
        );
        Ok(fork_height)
    }

    /// Truncates the main chain back to `height`. Used during reorg
    /// recovery paths; the regular reorg goes through `add_block`.
    pub fn rollback_to(&mut self, height: u32) -> Result<(), ChainError> {
        let Some(peak_record) = self.peak_record() else {
            return Ok(());
        };
        if height >= peak_record.height {
            return Ok(());
        }
        let new_peak_hash = self.height_map.get(&height).copied().ok_or_else(|| {
            ChainError::Corruption(format!("no main chain block at height {height}"))
        })?;

        let mut staged = StagedCoins::new();
        let mut coin_ops = Vec::new();
        let mut puzzle_ops = Vec::new();
        let mut height_ops = Vec::new();
        let mut undone_heights = Vec::new();
        for undo_height in ((height + 1)..=peak_record.height).rev() {
            let Some(hash) = self.height_map.get(&undo_height).copied() else {
                break;
            };
            let diff = self.require_diff(&hash)?;
            self.coin_store
                .stage_undo_diff(&diff, &mut staged, &mut coin_ops, &mut puzzle_ops)?;
            height_ops.push(KvOp::Remove(undo_height.to_be_bytes().to_vec()));
            undone_heights.push(undo_height);
        }
        let meta_ops = vec![KvOp::Insert(
            meta_peak_key().to_vec(),
            new_peak_hash.as_slice().to_vec(),
        )];
        let trees = (
            self.coin_store.coin_records_tree(),
            self.coin_store.puzzle_index_tree(),
            self.block_store.height_index_tree(),
            self.block_store.metadata_tree(),
        );
        trees
            .transaction(|(coins, puzzles, heights, meta)| {
                for (tree, ops) in [
                    (coins, &coin_ops),
                    (puzzles, &puzzle_ops),
                    (heights, &height_ops),
                    (meta, &meta_ops),
                ] {
                    for op in ops {
                        match op {
                            KvOp::Insert(key, value) => {
                                tree.insert(key.as_slice(), value.as_slice())?;
                            }
                            KvOp::Remove(key) => {
                                tree.remove(key.as_slice())?;
                            }
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| ChainError::Database(format!("rollback failed: {e:?}")))?;
        for undo_height in undone_heights {
            self.height_map.remove(&undo_height);
        }
        self.peak = Some(new_peak_hash);
        Ok(())
    }
}
