use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::sized_bytes::Bytes32;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const MAX_PENDING_BLOCKS: usize = 100;

/// Blocks whose parent has not arrived yet, keyed by the missing prev
/// hash. Entries are resolved when the parent shows up or silently
/// discarded after the window expires.
pub struct PendingBlocks {
    by_parent: HashMap<Bytes32, Vec<(FullBlock, Instant)>>,
    count: usize,
    ttl: Duration,
}

impl PendingBlocks {
    pub fn new(ttl: Duration) -> Self {
        PendingBlocks {
            by_parent: HashMap::new(),
            count: 0,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Buffers `block` until its parent arrives. Oldest entries make room
    /// when the buffer is full.
    pub fn add(&mut self, block: FullBlock, now: Instant) {
        self.prune(now);
        if self.count >= MAX_PENDING_BLOCKS {
            self.discard_oldest();
        }
        let parent = block.prev_header_hash();
        let entries = self.by_parent.entry(parent).or_default();
        if entries
            .iter()
            .any(|(held, _)| held.header_hash() == block.header_hash())
        {
            return;
        }
        entries.push((block, now));
        self.count += 1;
    }

    /// Removes and returns every buffered block waiting on `parent`.
    pub fn take_children(&mut self, parent: &Bytes32) -> Vec<FullBlock> {
        match self.by_parent.remove(parent) {
            Some(entries) => {
                self.count -= entries.len();
                entries.into_iter().map(|(block, _)| block).collect()
            }
            None => Vec::new(),
        }
    }

    /// Drops entries older than the window.
    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        let mut removed = 0;
        self.by_parent.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(_, added)| now.duration_since(*added) < ttl);
            removed += before - entries.len();
            !entries.is_empty()
        });
        self.count -= removed;
    }

    fn discard_oldest(&mut self) {
        let oldest = self
            .by_parent
            .iter()
            .filter_map(|(parent, entries)| {
                entries.iter().map(|(_, at)| *at).min().map(|at| (*parent, at))
            })
            .min_by_key(|(_, at)| *at)
            .map(|(parent, _)| parent);
        if let Some(parent) = oldest {
            if let Some(entries) = self.by_parent.remove(&parent) {
                self.count -= entries.len();
            }
        }
    }
}
