use evg_core::blockchain::sized_bytes::Bytes32;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

pub const SEEN_MESSAGES_PER_PEER: usize = 10_000;

/// Bounded LRU of message digests one peer has already been sent or has
/// sent us.
struct SeenCache {
    set: HashSet<Bytes32>,
    order: VecDeque<Bytes32>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        SeenCache {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Records the digest; returns true when it was not already present.
    fn insert(&mut self, digest: Bytes32) -> bool {
        if !self.set.insert(digest) {
            return false;
        }
        self.order.push_back(digest);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

/// Forwarding bookkeeping for peaks, signage points, unfinished blocks and
/// transactions: per-peer dedup plus the duplicate-foliage cap.
pub struct Gossip {
    per_peer: HashMap<u64, SeenCache>,
    /// reward hash -> foliage hashes accepted for forwarding, smallest
    /// first (the deterministic preference the timelord relies on)
    unfinished_variants: HashMap<Bytes32, BTreeSet<Bytes32>>,
    max_duplicate_unfinished_blocks: usize,
}

impl Gossip {
    pub fn new(max_duplicate_unfinished_blocks: usize) -> Self {
        Gossip {
            per_peer: HashMap::new(),
            unfinished_variants: HashMap::new(),
            max_duplicate_unfinished_blocks,
        }
    }

    pub fn drop_peer(&mut self, peer_id: u64) {
        self.per_peer.remove(&peer_id);
    }

    /// True when `digest` has not yet been exchanged with `peer_id`; marks
    /// it exchanged either way.
    pub fn should_forward(&mut self, peer_id: u64, digest: Bytes32) -> bool {
        self.per_peer
            .entry(peer_id)
            .or_insert_with(|| SeenCache::new(SEEN_MESSAGES_PER_PEER))
            .insert(digest)
    }

    /// The peers from `peers` that still need `digest`, marking it sent.
    pub fn forward_targets(&mut self, peers: &[u64], digest: Bytes32) -> Vec<u64> {
        peers
            .iter()
            .copied()
            .filter(|peer_id| self.should_forward(*peer_id, digest))
            .collect()
    }

    /// Admits a foliage variant of an unfinished block for forwarding.
    /// At most `max_duplicate_unfinished_blocks` distinct variants per
    /// reward hash are kept, preferring the lexicographically smallest
    /// foliage hashes so every node converges on the same candidate set.
    pub fn admit_unfinished_variant(
        &mut self,
        reward_hash: Bytes32,
        foliage_hash: Bytes32,
    ) -> bool {
        let variants = self.unfinished_variants.entry(reward_hash).or_default();
        if variants.contains(&foliage_hash) {
            return false;
        }
        variants.insert(foliage_hash);
        if variants.len() > self.max_duplicate_unfinished_blocks {
            let largest = *variants.iter().next_back().expect("non-empty");
            variants.remove(&largest);
            if largest == foliage_hash {
                return false;
            }
        }
        true
    }

    /// Forgets unfinished-block bookkeeping once a reward hash is infused.
    pub fn clear_unfinished(&mut self, reward_hash: &Bytes32) {
        self.unfinished_variants.remove(reward_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_once_per_peer() {
        let mut gossip = Gossip::new(3);
        let digest = Bytes32::new([1; 32]);
        assert!(gossip.should_forward(1, digest));
        assert!(!gossip.should_forward(1, digest));
        assert!(gossip.should_forward(2, digest));
    }

    #[test]
    fn test_forward_targets_filters_seen() {
        let mut gossip = Gossip::new(3);
        let digest = Bytes32::new([2; 32]);
        assert!(gossip.should_forward(1, digest));
        let targets = gossip.forward_targets(&[1, 2, 3], digest);
        assert_eq!(targets, vec![2, 3]);
    }

    #[test]
    fn test_lru_is_bounded() {
        let mut cache = SeenCache::new(2);
        let a = Bytes32::new([1; 32]);
        let b = Bytes32::new([2; 32]);
        let c = Bytes32::new([3; 32]);
        assert!(cache.insert(a));
        assert!(cache.insert(b));
        assert!(cache.insert(c));
        // a has been evicted and may be forwarded again
        assert!(cache.insert(a));
    }

    #[test]
    fn test_duplicate_foliage_cap_prefers_smaller_hashes() {
        let mut gossip = Gossip::new(2);
        let reward = Bytes32::new([9; 32]);
        let small = Bytes32::new([1; 32]);
        let mid = Bytes32::new([5; 32]);
        let large = Bytes32::new([8; 32]);
        assert!(gossip.admit_unfinished_variant(reward, mid));
        assert!(gossip.admit_unfinished_variant(reward, large));
        // over the cap: the largest variant loses, the smaller newcomer wins
        assert!(gossip.admit_unfinished_variant(reward, small));
        assert!(!gossip.admit_unfinished_variant(reward, large));
        // repeats are never forwarded twice
        assert!(!gossip.admit_unfinished_variant(reward, small));
    }
}
