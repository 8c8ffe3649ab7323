use crate::coin_store::BlockCoinDiff;
use evg_core::blockchain::coin_record::CoinRecord;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::protocols::wallet::{CoinState, CoinStateUpdate};
use std::collections::{HashMap, HashSet};

/// Result of a subscription registration: what was actually added, with
/// the overflow signalled explicitly so the client can paginate.
#[derive(Debug, Default)]
pub struct RegisterResult {
    pub added: Vec<Bytes32>,
    pub truncated: bool,
}

#[derive(Default)]
struct PeerSubscriptions {
    puzzle_hashes: HashSet<Bytes32>,
    coin_ids: HashSet<Bytes32>,
}

impl PeerSubscriptions {
    fn total(&self) -> usize {
        self.puzzle_hashes.len() + self.coin_ids.len()
    }
}

/// Per-peer coin-state subscriptions and the per-commit delta feed used by
/// light wallets.
#[derive(Default)]
pub struct SubscriptionService {
    by_peer: HashMap<u64, PeerSubscriptions>,
}

impl SubscriptionService {
    pub fn peer_count(&self) -> usize {
        self.by_peer.len()
    }

    pub fn drop_peer(&mut self, peer_id: u64) {
        self.by_peer.remove(&peer_id);
    }

    pub fn subscription_count(&self, peer_id: u64) -> usize {
        self.by_peer
            .get(&peer_id)
            .map_or(0, PeerSubscriptions::total)
    }

    /// Adds puzzle-hash subscriptions up to `max_items` for this peer.
    pub fn add_puzzle_subscriptions(
        &mut self,
        peer_id: u64,
        puzzle_hashes: &[Bytes32],
        max_items: usize,
    ) -> RegisterResult {
        let subs = self.by_peer.entry(peer_id).or_default();
        let mut result = RegisterResult::default();
        for puzzle_hash in puzzle_hashes {
            if subs.total() >= max_items {
                result.truncated = true;
                break;
            }
            if subs.puzzle_hashes.insert(*puzzle_hash) {
                result.added.push(*puzzle_hash);
            }
        }
        result
    }

    /// Adds coin-id subscriptions up to `max_items` for this peer.
    pub fn add_coin_subscriptions(
        &mut self,
        peer_id: u64,
        coin_ids: &[Bytes32],
        max_items: usize,
    ) -> RegisterResult {
        let subs = self.by_peer.entry(peer_id).or_default();
        let mut result = RegisterResult::default();
        for coin_id in coin_ids {
            if subs.total() >= max_items {
                result.truncated = true;
                break;
            }
            if subs.coin_ids.insert(*coin_id) {
                result.added.push(*coin_id);
            }
        }
        result
    }

    fn matches(subs: &PeerSubscriptions, record: &CoinRecord) -> bool {
        subs.coin_ids.contains(&record.name())
            || subs.puzzle_hashes.contains(&record.coin.puzzle_hash)
    }

    /// Computes, for every subscribed peer, the delta of coin records this
    /// committed block touched. Spent records are reported with their
    /// spend height; created records as unspent.
    pub fn updates_for_block(
        &self,
        diff: &BlockCoinDiff,
        spent_records: &[CoinRecord],
        peak_hash: Bytes32,
        fork_height: u32,
    ) -> Vec<(u64, CoinStateUpdate)> {
        if self.by_peer.is_empty() {
            return Vec::new();
        }
        let created: Vec<CoinRecord> = diff
            .additions
            .iter()
            .map(|(coin, coinbase)| {
                CoinRecord::created(*coin, diff.height, diff.timestamp, *coinbase)
            })
            .collect();
        let mut updates = Vec::new();
        for (peer_id, subs) in &self.by_peer {
            let mut items: Vec<CoinState> = Vec::new();
            for record in created.iter().chain(spent_records.iter()) {
                if Self::matches(subs, record) {
                    items.push(CoinState::from(record));
                }
            }
            if items.is_empty() {
                continue;
            }
            items.sort_by_key(|state| (state.created_height, state.coin.coin_id()));
            updates.push((
                *peer_id,
                CoinStateUpdate {
                    height: diff.height,
                    fork_height,
                    peak_hash,
                    items,
                },
            ));
        }
        updates.sort_by_key(|(peer_id, _)| *peer_id);
        updates
    }

    /// Initial registration response: current states for the requested
    /// keys, coin-id subscriptions first, truncated at `max_response`.
    pub fn initial_coin_states(
        coin_records: Vec<CoinRecord>,
        puzzle_records: Vec<CoinRecord>,
        max_response: usize,
    ) -> (Vec<CoinState>, bool) {
        let mut states: Vec<CoinState> = Vec::new();
        let mut truncated = false;
        for record in coin_records.iter().chain(puzzle_records.iter()) {
            if states.len() >= max_response {
                truncated = true;
                break;
            }
            states.push(CoinState::from(record));
        }
        (states, truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evg_core::blockchain::coin::Coin;

    fn coin(seed: u8) -> Coin {
        Coin {
            parent_coin_info: Bytes32::new([seed; 32]),
            puzzle_hash: Bytes32::new([seed + 100; 32]),
            amount: 1000,
        }
    }

    #[test]
    fn test_subscription_caps_signal_overflow() {
        let mut service = SubscriptionService::default();
        let hashes: Vec<Bytes32> = (0..5).map(|i| Bytes32::new([i; 32])).collect();
        let result = service.add_puzzle_subscriptions(7, &hashes, 3);
        assert_eq!(result.added.len(), 3);
        assert!(result.truncated);
        assert_eq!(service.subscription_count(7), 3);
        // coin subscriptions share the same cap
        let result = service.add_coin_subscriptions(7, &[Bytes32::new([99; 32])], 3);
        assert!(result.truncated);
        assert!(result.added.is_empty());
    }

    #[test]
    fn test_updates_only_reach_matching_peers() {
        let mut service = SubscriptionService::default();
        let watched = coin(1);
        service.add_puzzle_subscriptions(1, &[watched.puzzle_hash], 100);
        service.add_puzzle_subscriptions(2, &[Bytes32::new([250; 32])], 100);

        let diff = BlockCoinDiff {
            height: 5,
            timestamp: 1_700_000_000,
            additions: vec![(watched, false), (coin(2), false)],
            removal_ids: vec![],
        };
        let updates = service.updates_for_block(&diff, &[], Bytes32::default(), 4);
        assert_eq!(updates.len(), 1);
        let (peer, update) = &updates[0];
        assert_eq!(*peer, 1);
        assert_eq!(update.height, 5);
        assert_eq!(update.fork_height, 4);
        assert_eq!(update.items.len(), 1);
        assert_eq!(update.items[0].coin, watched);
        assert_eq!(update.items[0].created_height, Some(5));
    }

    #[test]
    fn test_spent_records_reported_with_spend_height() {
        let mut service = SubscriptionService::default();
        let spent = coin(9);
        service.add_coin_subscriptions(3, &[spent.coin_id()], 100);
        let mut record = CoinRecord::created(spent, 2, 1_700_000_000, false);
        record.spent_height = 6;
        let diff = BlockCoinDiff {
            height: 6,
            timestamp: 1_700_000_100,
            additions: vec![],
            removal_ids: vec![spent.coin_id()],
        };
        let updates = service.updates_for_block(&diff, &[record], Bytes32::default(), 5);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.items[0].spent_height, Some(6));
    }

    #[test]
    fn test_initial_states_prioritise_coin_ids() {
        let coin_records = vec![CoinRecord::created(coin(1), 1, 0, false)];
        let puzzle_records = vec![
            CoinRecord::created(coin(2), 2, 0, false),
            CoinRecord::created(coin(3), 3, 0, false),
        ];
        let (states, truncated) =
            SubscriptionService::initial_coin_states(coin_records, puzzle_records, 2);
        assert_eq!(states.len(), 2);
        assert!(truncated);
        // the coin-id subscription arrives first
        assert_eq!(states[0].coin, coin(1));
    }
}
