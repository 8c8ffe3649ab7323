use crate::block_validation::UnspentView;
use crate::verifiers::BlockProgramRunner;
use evg_core::blockchain::block_record::BlockRecord;
use evg_core::blockchain::coin::Coin;
use evg_core::blockchain::conditions::BlockProgramOutput;
use evg_core::blockchain::mempool_item::MempoolItem;
use evg_core::blockchain::program::SerializedProgram;
use evg_core::blockchain::sized_bytes::{Bytes32, Bytes96};
use evg_core::blockchain::spend_bundle::SpendBundle;
use evg_core::bls::aggregate_verify_signature;
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::errors::{ErrorCode, ValidationError};
use evg_serialize::Streamable;
use log::{debug, info};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A replacement must pay at least this much more per unit cost than the
/// items it evicts.
pub const REPLACE_BY_FEE_MARGIN_PERCENT: u128 = 5;
/// Recently-processed bundle names remembered for gossip de-duplication.
pub const SEEN_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    Conflict,
    BlockInclusion,
    Reorg,
    Expired,
    Evicted,
}

#[derive(Debug)]
pub struct AddOutcome {
    pub name: Bytes32,
    pub cost: u64,
    /// Conflicting or evicted items removed to admit this bundle.
    pub removed: Vec<Bytes32>,
    pub already_present: bool,
}

#[derive(Debug, Default)]
pub struct NewPeakResult {
    pub kept: usize,
    pub dropped: Vec<(Bytes32, ValidationError)>,
}

/// Everything block assembly needs from the mempool.
pub struct BlockAssembly {
    pub generator: SerializedProgram,
    pub coin_ids: Vec<Bytes32>,
    pub aggregated_signature: Bytes96,
    pub additions: Vec<Coin>,
    pub conds: BlockProgramOutput,
    pub fees: u64,
    pub cost: u64,
}

type FeeRateKey = (u128, Reverse<Bytes32>);

fn fee_rate_key(item: &MempoolItem) -> FeeRateKey {
    (item.scaled_fee_rate(), Reverse(item.name))
}

/// The in-memory pool itself: items keyed by name, a fee-rate index for
/// eviction and assembly, and a spent-coin index enforcing the
/// no-coexisting-double-spend invariant.
#[derive(Default)]
pub struct Mempool {
    items: HashMap<Bytes32, MempoolItem>,
    by_fee_rate: BTreeMap<FeeRateKey, Bytes32>,
    by_coin_id: HashMap<Bytes32, Bytes32>,
    by_puzzle_hash: HashMap<Bytes32, HashSet<Bytes32>>,
    total_cost: u64,
}

impl Mempool {
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn contains(&self, name: &Bytes32) -> bool {
        self.items.contains_key(name)
    }

    pub fn get(&self, name: &Bytes32) -> Option<&MempoolItem> {
        self.items.get(name)
    }

    pub fn item_spending_coin(&self, coin_id: &Bytes32) -> Option<&Bytes32> {
        self.by_coin_id.get(coin_id)
    }

    pub fn items_by_puzzle_hash(&self, puzzle_hash: &Bytes32) -> Vec<Bytes32> {
        self.by_puzzle_hash
            .get(puzzle_hash)
            .map(|names| names.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn all_item_ids(&self) -> Vec<Bytes32> {
        self.items.keys().copied().collect()
    }

    /// Items in descending fee-rate order, ties broken by ascending name.
    pub fn items_by_fee_rate(&self) -> impl Iterator<Item = &MempoolItem> {
        self.by_fee_rate
            .iter()
            .rev()
            .filter_map(|(_, name)| self.items.get(name))
    }

    fn index_puzzle_hashes(&mut self, item: &MempoolItem) {
        for spend in &item.spend_bundle.coin_spends {
            self.by_puzzle_hash
                .entry(spend.coin.puzzle_hash)
                .or_default()
                .insert(item.name);
        }
    }

    fn insert(&mut self, item: MempoolItem) {
        self.total_cost += item.cost;
        self.by_fee_rate.insert(fee_rate_key(&item), item.name);
        for coin_id in &item.removal_ids {
            self.by_coin_id.insert(*coin_id, item.name);
        }
        self.index_puzzle_hashes(&item);
        self.items.insert(item.name, item);
    }

    fn remove(&mut self, name: &Bytes32, reason: RemoveReason) -> Option<MempoolItem> {
        let item = self.items.remove(name)?;
        self.total_cost -= item.cost;
        self.by_fee_rate.remove(&fee_rate_key(&item));
        for coin_id in &item.removal_ids {
            self.by_coin_id.remove(coin_id);
        }
        for spend in &item.spend_bundle.coin_spends {
            if let Some(names) = self.by_puzzle_hash.get_mut(&spend.coin.puzzle_hash) {
                names.remove(name);
                if names.is_empty() {
                    self.by_puzzle_hash.remove(&spend.coin.puzzle_hash);
                }
            }
        }
        debug!("removed {name} from mempool ({reason:?})");
        Some(item)
    }

    fn drain(&mut self) -> Vec<MempoolItem> {
        let names: Vec<Bytes32> = self.items.keys().copied().collect();
        let mut drained: Vec<MempoolItem> = names
            .iter()
            .filter_map(|name| self.remove(name, RemoveReason::Reorg))
            .collect();
        drained.sort_by(|a, b| b.cmp_fee_rate(a).then(a.name.cmp(&b.name)));
        drained
    }
}

/// Peak-scoped admission, replacement and assembly over the pool.
pub struct MempoolManager {
    constants: Arc<ConsensusConstants>,
    runner: Arc<dyn BlockProgramRunner>,
    mempool: Mempool,
    peak: Option<BlockRecord>,
    seen: VecDeque<Bytes32>,
    seen_set: HashSet<Bytes32>,
    /// bundle name -> evaluator output; invalidated on every peak change
    cached_conds: HashMap<Bytes32, BlockProgramOutput>,
    capacity: u64,
    max_tx_cost: u64,
}

impl MempoolManager {
    pub fn new(constants: Arc<ConsensusConstants>, runner: Arc<dyn BlockProgramRunner>) -> Self {
        let capacity = constants.max_block_cost * u64::from(constants.mempool_block_buffer);
        let max_tx_cost = constants.max_block_cost;
        MempoolManager {
            constants,
            runner,
            mempool: Mempool::default(),
            peak: None,
            seen: VecDeque::new(),
            seen_set: HashSet::new(),
            cached_conds: HashMap::new(),
            capacity,
            max_tx_cost,
        }
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn peak(&self) -> Option<&BlockRecord> {
        self.peak.as_ref()
    }

    pub fn seen(&self, name: &Bytes32) -> bool {
        self.seen_set.contains(name)
    }

    pub fn add_seen(&mut self, name: Bytes32) {
        if self.seen_set.insert(name) {
            self.seen.push_back(name);
            while self.seen.len() > SEEN_CACHE_SIZE {
                if let Some(evicted) = self.seen.pop_front() {
                    self.seen_set.remove(&evicted);
                }
            }
        }
    }

    pub fn remove_seen(&mut self, name: &Bytes32) {
        if self.seen_set.remove(name) {
            self.seen.retain(|candidate| candidate != name);
        }
    }

    pub fn get_bundle(&self, name: &Bytes32) -> Option<&SpendBundle> {
        self.mempool.get(name).map(|item| &item.spend_bundle)
    }

    /// Validates `bundle` against the current peak and admits it, applying
    /// the replace-by-fee and capacity-eviction rules.
    pub fn add_spend_bundle(
        &mut self,
        bundle: SpendBundle,
        coins: &dyn UnspentView,
    ) -> Result<AddOutcome, ValidationError> {
        let name = bundle.name();
        if let Some(existing) = self.mempool.get(&name) {
            return Ok(AddOutcome {
                name,
                cost: existing.cost,
                removed: Vec::new(),
                already_present: true,
            });
        }
        let peak = self
            .peak
            .clone()
            .ok_or_else(|| ValidationError::new(ErrorCode::MempoolNotInitialized, "no peak"))?;
        if bundle.coin_spends.is_empty() {
            return Err(ValidationError::new(ErrorCode::EmptyBundle, "no spends"));
        }
        let next_height = peak.height + 1;

        let conds = match self.cached_conds.get(&name) {
            Some(cached) => cached.clone(),
            None => {
                let conds = self
                    .runner
                    .run_spend_bundle(&bundle, self.max_tx_cost, next_height)?;
                self.cached_conds.insert(name, conds.clone());
                conds
            }
        };
        let cost = conds.cost;
        if cost == 0 {
            return Err(ValidationError::new(ErrorCode::InvalidCost, "zero cost"));
        }
        if cost > self.max_tx_cost {
            return Err(ValidationError::new(
                ErrorCode::CostTooHigh,
                format!("{cost} > {}", self.max_tx_cost),
            ));
        }
        if conds.spends.len() != bundle.coin_spends.len() {
            return Err(ValidationError::new(
                ErrorCode::GeneratorRunError,
                "conditions do not match bundle spends",
            ));
        }

        let additions = conds.additions();
        let addition_ids: HashSet<Bytes32> = additions.iter().map(Coin::coin_id).collect();
        let mut removal_amount: u128 = 0;
        for (coin_spend, spend_conds) in bundle.coin_spends.iter().zip(&conds.spends) {
            let coin = coin_spend.coin;
            if spend_conds.coin_id != coin.coin_id() {
                return Err(ValidationError::new(
                    ErrorCode::GeneratorRunError,
                    "conditions out of order",
                ));
            }
            if spend_conds.puzzle_hash != coin.puzzle_hash {
                return Err(ValidationError::new(
                    ErrorCode::WrongPuzzleHash,
                    format!("coin {}", coin.coin_id()),
                ));
            }
            let record = coins
                .coin_record(&spend_conds.coin_id)
                .map_err(|e| ValidationError::new(ErrorCode::UnknownUnspent, e.to_string()))?;
            match record {
                Some(record) if record.is_spent() => {
                    return Err(ValidationError::new(
                        ErrorCode::DoubleSpend,
                        format!("coin {} spent at {}", coin.coin_id(), record.spent_height),
                    ));
                }
                Some(_) => {}
                // ephemeral spends of coins created in this same bundle
                None if addition_ids.contains(&spend_conds.coin_id) => {}
                None => {
                    return Err(ValidationError::new(
                        ErrorCode::UnknownUnspent,
                        format!("coin {}", coin.coin_id()),
                    ));
                }
            }
            removal_amount += u128::from(coin.amount);
        }
        let addition_amount = conds.addition_amount();
        if addition_amount > removal_amount {
            return Err(ValidationError::new(
                ErrorCode::InvalidFeeAmount,
                "bundle mints value",
            ));
        }
        let fee = u64::try_from(removal_amount - addition_amount)
            .map_err(|_| ValidationError::new(ErrorCode::InvalidFeeAmount, "fee overflow"))?;

        // timelocks against the next block height
        let assert_height = conds.assert_height();
        let assert_before_height = conds.assert_before_height();
        if let (Some(after), Some(before)) = (assert_height, assert_before_height) {
            if before <= after {
                return Err(ValidationError::new(
                    ErrorCode::ImpossibleTimelock,
                    format!("before {before} <= after {after}"),
                ));
            }
        }
        if let Some(after) = assert_height {
            if after > peak.height {
                return Err(ValidationError::new(
                    ErrorCode::AssertHeightFailed,
                    format!("valid from height {}", after + 1),
                ));
            }
        }
        if let Some(before) = assert_before_height {
            if next_height >= before {
                return Err(ValidationError::new(
                    ErrorCode::AssertBeforeHeightFailed,
                    format!("expired at height {before}"),
                ));
            }
        }

        // aggregate signature over salted messages
        let mut pairs = Vec::new();
        for spend in &conds.spends {
            for (public_key, msg) in &spend.agg_sig_pairs {
                let mut salted = Vec::with_capacity(msg.len() + 64);
                salted.extend(msg);
                salted.extend(spend.coin_id.as_slice());
                salted.extend(self.constants.agg_sig_me_additional_data.as_slice());
                pairs.push((*public_key, salted));
            }
        }
        let signature_ok = aggregate_verify_signature(&pairs, &bundle.aggregated_signature)
            .map_err(|e| ValidationError::new(ErrorCode::BadAggregateSignature, e.to_string()))?;
        if !signature_ok {
            return Err(ValidationError::new(
                ErrorCode::BadAggregateSignature,
                "aggregate signature",
            ));
        }

        let removal_ids = bundle.removal_ids();
        let item = MempoolItem {
            spend_bundle: bundle,
            name,
            cost,
            fee,
            added_at_height: next_height,
            conds,
            additions,
            removal_ids: removal_ids.clone(),
            assert_height,
            assert_before_height,
        };

        // conflicts and replace-by-fee
        let mut conflict_names = HashSet::new();
        for coin_id in &removal_ids {
            if let Some(existing) = self.mempool.item_spending_coin(coin_id) {
                conflict_names.insert(*existing);
            }
        }
        if !conflict_names.is_empty() && !self.can_replace(&conflict_names, &removal_ids, &item) {
            return Err(ValidationError::new(
                ErrorCode::ConflictingBundle,
                format!("{} conflicting items", conflict_names.len()),
            ));
        }

        // capacity eviction: drop the cheapest items until the bundle fits,
        // unless the bundle itself is the cheapest thing on offer
        let conflict_cost: u64 = conflict_names
            .iter()
            .filter_map(|conflict| self.mempool.get(conflict))
            .map(|conflict| conflict.cost)
            .sum();
        let mut projected = self.mempool.total_cost() - conflict_cost;
        let mut evictions = Vec::new();
        if projected + cost > self.capacity {
            for candidate in self.mempool.by_fee_rate.values() {
                if conflict_names.contains(candidate) {
                    continue;
                }
                let candidate_item = &self.mempool.items[candidate];
                if item.cmp_fee_rate(candidate_item) != std::cmp::Ordering::Greater {
                    return Err(ValidationError::new(
                        ErrorCode::FeeBelowEvictionThreshold,
                        "fee rate below the current eviction floor",
                    ));
                }
                evictions.push(*candidate);
                projected -= candidate_item.cost;
                if projected + cost <= self.capacity {
                    break;
                }
            }
            if projected + cost > self.capacity {
                return Err(ValidationError::new(
                    ErrorCode::FeeBelowEvictionThreshold,
                    "bundle exceeds mempool capacity",
                ));
            }
        }

        let mut removed = Vec::new();
        for conflict in conflict_names {
            if self.mempool.remove(&conflict, RemoveReason::Conflict).is_some() {
                removed.push(conflict);
            }
        }
        for eviction in evictions {
            if self.mempool.remove(&eviction, RemoveReason::Evicted).is_some() {
                removed.push(eviction);
            }
        }
        self.mempool.insert(item);
        self.add_seen(name);
        Ok(AddOutcome {
            name,
            cost,
            removed,
            already_present: false,
        })
    }

    /// The replacement rules: the new item must spend a superset of every
    /// coin the conflicting items spend, and must beat their aggregate fee
    /// rate by the configured margin.
    fn can_replace(
        &self,
        conflicts: &HashSet<Bytes32>,
        new_removals: &[Bytes32],
        new_item: &MempoolItem,
    ) -> bool {
        let removal_set: HashSet<&Bytes32> = new_removals.iter().collect();
        let mut conflicting_fees: u128 = 0;
        let mut conflicting_cost: u128 = 0;
        for name in conflicts {
            let Some(item) = self.mempool.get(name) else {
                return false;
            };
            // superset rule: partially replacing a bundle would let an
            // attacker knock spends out of the pool piecemeal
            for coin_id in &item.removal_ids {
                if !removal_set.contains(coin_id) {
                    debug!("replacement does not spend conflicting coin {coin_id}");
                    return false;
                }
            }
            conflicting_fees += u128::from(item.fee);
            conflicting_cost += u128::from(item.cost);
        }
        if conflicting_cost == 0 {
            return false;
        }
        // new_rate >= old_rate * (1 + margin), by cross multiplication
        let lhs = u128::from(new_item.fee) * conflicting_cost * 100;
        let rhs = conflicting_fees * u128::from(new_item.cost) * (100 + REPLACE_BY_FEE_MARGIN_PERCENT);
        if lhs < rhs {
            debug!("replacement fee rate below margin");
            return false;
        }
        true
    }

    /// Rebuilds the pool for a new peak. Every held item is re-validated
    /// against the new coin state; items spent by the new chain, expired,
    /// or otherwise invalid are dropped. Must complete before the peak is
    /// announced.
    pub fn new_peak(&mut self, peak: &BlockRecord, coins: &dyn UnspentView) -> NewPeakResult {
        self.peak = Some(peak.clone());
        self.cached_conds.clear();
        let old_items = self.mempool.drain();
        let mut result = NewPeakResult::default();
        for item in old_items {
            let name = item.name;
            match self.add_spend_bundle(item.spend_bundle, coins) {
                Ok(_) => result.kept += 1,
                Err(error) => {
                    self.remove_seen(&name);
                    result.dropped.push((name, error));
                }
            }
        }
        info!(
            "mempool rebuilt at height {}: {} kept, {} dropped, cost {}",
            peak.height,
            result.kept,
            result.dropped.len(),
            self.mempool.total_cost()
        );
        result
    }

    /// Greedy deterministic block assembly: descending fee rate, ties by
    /// name, skipping anything that does not fit under `max_cost`.
    pub fn create_block_generator(&self, max_cost: u64) -> Option<BlockAssembly> {
        let mut selected = Vec::new();
        let mut total_cost = 0u64;
        let mut total_fees = 0u64;
        for item in self.mempool.items_by_fee_rate() {
            if total_cost + item.cost > max_cost {
                continue;
            }
            total_cost += item.cost;
            total_fees += item.fee;
            selected.push(item);
        }
        if selected.is_empty() {
            return None;
        }
        let bundles: Vec<SpendBundle> = selected
            .iter()
            .map(|item| item.spend_bundle.clone())
            .collect();
        let aggregate = SpendBundle::aggregate(&bundles).ok()?;
        let mut conds = BlockProgramOutput {
            spends: Vec::new(),
            cost: total_cost,
        };
        let mut coin_ids = Vec::new();
        let mut additions = Vec::new();
        for item in &selected {
            conds.spends.extend(item.conds.spends.iter().cloned());
            coin_ids.extend(item.removal_ids.iter().copied());
            additions.extend(item.additions.iter().copied());
        }
        let generator = SerializedProgram::new(aggregate.coin_spends.to_bytes());
        Some(BlockAssembly {
            generator,
            coin_ids,
            aggregated_signature: aggregate.aggregated_signature,
            additions,
            conds,
            fees: total_fees,
            cost: total_cost,
        })
    }
}
