use crate::blockchain::{AddResult, Blockchain};
use crate::weight_proof::WeightProofHandler;
use async_trait::async_trait;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::blockchain::weight_proof::WeightProof;
use evg_core::config::FullNodeConfig;
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::errors::ChainError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::timeout;

pub const MIN_PEERS_FOR_SYNC: usize = 3;
pub const BLOCK_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_BACKTRACK_DEPTH: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    ShortSync,
    LongSync,
    Synced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    Backtrack,
    Short,
    Long,
}

/// A peak as claimed by one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerPeak {
    pub peer_id: u64,
    pub header_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
}

/// The requests the sync engine makes of a peer. Implemented over the wire
/// by the connection layer; in tests by simulated chains.
#[async_trait]
pub trait SyncPeer: Send + Sync {
    fn id(&self) -> u64;
    async fn request_proof_of_weight(&self, tip: Bytes32) -> Result<WeightProof, ChainError>;
    async fn request_block_by_hash(&self, hash: Bytes32) -> Result<FullBlock, ChainError>;
    async fn request_blocks(&self, start: u32, end: u32) -> Result<Vec<FullBlock>, ChainError>;
}

/// How far behind maps to which strategy: within the backtrack window walk
/// prev-hashes; below the long-sync threshold fetch ranges; at or past it,
/// weight-proof sync.
pub fn classify_sync(blocks_behind: u32, config: &FullNodeConfig) -> SyncKind {
    if blocks_behind <= config.short_sync_blocks_behind_threshold {
        SyncKind::Backtrack
    } else if blocks_behind < config.sync_blocks_behind_threshold {
        SyncKind::Short
    } else {
        SyncKind::Long
    }
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub blocks_added: u32,
    /// Peers that served invalid or out-of-order data.
    pub penalized_peers: Vec<u64>,
}

/// Drives the node from any state to the network tip.
pub struct SyncEngine {
    config: FullNodeConfig,
    constants: Arc<ConsensusConstants>,
    weight_proofs: WeightProofHandler,
    state: SyncState,
    shutdown: watch::Receiver<bool>,
}

impl SyncEngine {
    pub fn new(
        config: FullNodeConfig,
        constants: Arc<ConsensusConstants>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        SyncEngine {
            config,
            constants: constants.clone(),
            weight_proofs: WeightProofHandler::new(constants),
            state: SyncState::Disconnected,
            shutdown,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn check_shutdown(&self) -> Result<(), ChainError> {
        if *self.shutdown.borrow() {
            return Err(ChainError::Shutdown);
        }
        Ok(())
    }

    /// Initial peak collection: wait until peaks from `MIN_PEERS_FOR_SYNC`
    /// distinct peers arrive or `max_sync_wait` elapses, whichever comes
    /// first. With no peers at all the node declares itself synced.
    pub async fn collect_peaks(
        &mut self,
        peaks: &mut mpsc::Receiver<PeerPeak>,
    ) -> Result<Vec<PeerPeak>, ChainError> {
        let mut collected: HashMap<u64, PeerPeak> = HashMap::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.max_sync_wait);
        loop {
            if collected.len() >= MIN_PEERS_FOR_SYNC {
                break;
            }
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = shutdown.changed() => return Err(ChainError::Shutdown),
                _ = tokio::time::sleep_until(deadline) => break,
                peak = peaks.recv() => match peak {
                    Some(peak) => {
                        collected.insert(peak.peer_id, peak);
                    }
                    None => break,
                },
            }
        }
        if collected.is_empty() {
            info!("no peer peaks within {}s, assuming synced", self.config.max_sync_wait);
            self.state = SyncState::Synced;
        }
        Ok(collected.into_values().collect())
    }

    /// The heaviest claimed peak that beats the local chain; ties break
    /// toward the smaller hash, mirroring fork choice.
    pub fn choose_target(&self, peaks: &[PeerPeak], local_weight: u128) -> Option<PeerPeak> {
        peaks
            .iter()
            .filter(|peak| peak.weight > local_weight)
            .min_by(|a, b| b.weight.cmp(&a.weight).then(a.header_hash.cmp(&b.header_hash)))
            .copied()
    }

    /// Runs one sync attempt toward `target`, choosing the strategy from
    /// how far behind the local chain is.
    pub async fn sync_to(
        &mut self,
        blockchain: &RwLock<Blockchain>,
        peers: &[Arc<dyn SyncPeer>],
        target: PeerPeak,
        now: u64,
    ) -> Result<SyncOutcome, ChainError> {
        let local_height = blockchain.read().await.peak_height();
        let behind = target
            .height
            .saturating_sub(local_height.map_or(0, |height| height));
        let kind = match local_height {
            Some(_) => classify_sync(behind, &self.config),
            None => classify_sync(u32::MAX, &self.config),
        };
        info!(
            "syncing to height {} ({behind} behind, {kind:?})",
            target.height
        );
        let outcome = match kind {
            SyncKind::Backtrack => {
                self.state = SyncState::ShortSync;
                self.backtrack_sync(blockchain, peers, target, now).await
            }
            SyncKind::Short => {
                self.state = SyncState::ShortSync;
                self.range_sync(blockchain, peers, target, now).await
            }
            SyncKind::Long => {
                self.state = SyncState::LongSync;
                self.long_sync(blockchain, peers, target, now).await
            }
        }?;
        self.state = SyncState::Synced;
        Ok(outcome)
    }

    /// 1-20 blocks behind: walk backwards by hash from the claimed peak
    /// until a known ancestor, then apply forward.
    async fn backtrack_sync(
        &mut self,
        blockchain: &RwLock<Blockchain>,
        peers: &[Arc<dyn SyncPeer>],
        target: PeerPeak,
        now: u64,
    ) -> Result<SyncOutcome, ChainError> {
        let peer = peer_by_id(peers, target.peer_id)
            .ok_or_else(|| ChainError::Peer("sync target peer is gone".to_string()))?;
        let mut outcome = SyncOutcome::default();
        let mut stack = Vec::new();
        let mut cursor = target.header_hash;
        loop {
            self.check_shutdown()?;
            if stack.len() as u32 > MAX_BACKTRACK_DEPTH {
                outcome.penalized_peers.push(peer.id());
                return Ok(outcome);
            }
            let block = timeout(
                BLOCK_REQUEST_TIMEOUT,
                peer.request_block_by_hash(cursor),
            )
            .await
            .map_err(|_| ChainError::Timeout("backtrack block request".to_string()))??;
            let prev = block.prev_header_hash();
            let genesis_rooted = block.height() == 0;
            stack.push(block);
            let chain = blockchain.read().await;
            if genesis_rooted || chain.contains_block(&prev) {
                break;
            }
            drop(chain);
            cursor = prev;
        }
        while let Some(block) = stack.pop() {
            if !self
                .apply_block(blockchain, &block, &mut outcome, target.peer_id, now)
                .await?
            {
                return Ok(outcome);
            }
        }
        Ok(outcome)
    }

    /// Tens to hundreds behind: fetch ranges from the target peer and
    /// validate linearly, failing over to other peers on bad data.
    async fn range_sync(
        &mut self,
        blockchain: &RwLock<Blockchain>,
        peers: &[Arc<dyn SyncPeer>],
        target: PeerPeak,
        now: u64,
    ) -> Result<SyncOutcome, ChainError> {
        let start = match blockchain.read().await.peak_height() {
            Some(height) => height + 1,
            None => 0,
        };
        self.fetch_and_apply_range(blockchain, peers, target, start, now)
            .await
    }

    /// Far behind: verify weight proofs from several peers, pick the
    /// heaviest verifying claim, then batch-fetch.
    async fn long_sync(
        &mut self,
        blockchain: &RwLock<Blockchain>,
        peers: &[Arc<dyn SyncPeer>],
        target: PeerPeak,
        now: u64,
    ) -> Result<SyncOutcome, ChainError> {
        let mut outcome = SyncOutcome::default();
        let mut best: Option<(u128, u64)> = None;
        let proof_timeout = Duration::from_secs(self.config.weight_proof_timeout);
        for peer in peers.iter().take(5) {
            self.check_shutdown()?;
            let proof: WeightProof = match timeout(
                proof_timeout,
                peer.request_proof_of_weight(target.header_hash),
            )
            .await
            {
                Ok(Ok(proof)) => proof,
                Ok(Err(e)) => {
                    debug!("peer {} weight proof failed: {e}", peer.id());
                    continue;
                }
                Err(_) => {
                    debug!("peer {} weight proof timed out", peer.id());
                    outcome.penalized_peers.push(peer.id());
                    continue;
                }
            };
            match self.weight_proofs.validate_weight_proof(&proof) {
                Ok(verified) => {
                    if best.map_or(true, |(weight, _)| verified.weight > weight) {
                        best = Some((verified.weight, peer.id()));
                    }
                }
                Err(e) => {
                    warn!("peer {} served an invalid weight proof: {e}", peer.id());
                    outcome.penalized_peers.push(peer.id());
                }
            }
        }
        let Some((_, proving_peer)) = best else {
            return Err(ChainError::Peer(
                "no verifiable weight proof from any peer".to_string(),
            ));
        };
        let mut chosen = target;
        chosen.peer_id = proving_peer;
        let start = match blockchain.read().await.peak_height() {
            Some(height) => height + 1,
            None => 0,
        };
        let mut range_outcome = self
            .fetch_and_apply_range(blockchain, peers, chosen, start, now)
            .await?;
        range_outcome
            .penalized_peers
            .extend(outcome.penalized_peers);
        Ok(range_outcome)
    }

    async fn fetch_and_apply_range(
        &mut self,
        blockchain: &RwLock<Blockchain>,
        peers: &[Arc<dyn SyncPeer>],
        target: PeerPeak,
        mut start: u32,
        now: u64,
    ) -> Result<SyncOutcome, ChainError> {
        let mut outcome = SyncOutcome::default();
        let window = self.batch_size();
        let mut current_peer = target.peer_id;
        let mut restarted = false;
        while start <= target.height {
            self.check_shutdown()?;
            let end = target.height.min(start + window - 1);
            let peer = peer_by_id(peers, current_peer)
                .or_else(|| peers.first().cloned())
                .ok_or_else(|| ChainError::Peer("no peers left to sync from".to_string()))?;
            let blocks = match timeout(
                BLOCK_REQUEST_TIMEOUT,
                peer.request_blocks(start, end),
            )
            .await
            {
                Ok(Ok(blocks)) => blocks,
                Ok(Err(e)) => {
                    debug!("peer {} failed batch {start}-{end}: {e}", peer.id());
                    outcome.penalized_peers.push(peer.id());
                    match next_peer(peers, peer.id()) {
                        Some(next) => {
                            current_peer = next;
                            continue;
                        }
                        None => return Err(ChainError::Peer("all peers failed".to_string())),
                    }
                }
                Err(_) => {
                    outcome.penalized_peers.push(peer.id());
                    match next_peer(peers, peer.id()) {
                        Some(next) => {
                            current_peer = next;
                            continue;
                        }
                        None => {
                            return Err(ChainError::Timeout(format!(
                                "batch {start}-{end} timed out on every peer"
                            )))
                        }
                    }
                }
            };
            if blocks.is_empty() {
                outcome.penalized_peers.push(peer.id());
                return Ok(outcome);
            }
            let mut disconnected = false;
            for block in &blocks {
                if !self
                    .apply_block(blockchain, block, &mut outcome, peer.id(), now)
                    .await?
                {
                    disconnected = true;
                    break;
                }
            }
            if disconnected {
                // the peer's chain forks below our peak; restart once from
                // genesis before giving up
                if restarted {
                    return Ok(outcome);
                }
                restarted = true;
                start = 0;
                continue;
            }
            start = end + 1;
        }
        Ok(outcome)
    }

    /// Applies one fetched block. Returns false when the batch cannot
    /// continue (invalid or disconnected data).
    async fn apply_block(
        &self,
        blockchain: &RwLock<Blockchain>,
        block: &FullBlock,
        outcome: &mut SyncOutcome,
        from_peer: u64,
        now: u64,
    ) -> Result<bool, ChainError> {
        let mut chain = blockchain.write().await;
        match chain.add_block(block, now)? {
            AddResult::NewPeak { .. } | AddResult::AddedAsOrphan => {
                outcome.blocks_added += 1;
                Ok(true)
            }
            AddResult::AlreadyHave => Ok(true),
            AddResult::Invalid(error) => {
                warn!(
                    "peer {from_peer} served invalid block at height {}: {error}",
                    block.height()
                );
                outcome.penalized_peers.push(from_peer);
                Ok(false)
            }
            AddResult::Disconnected => Ok(false),
        }
    }

    fn batch_size(&self) -> u32 {
        self.constants.max_block_count_per_requests.max(1)
    }
}

fn peer_by_id(peers: &[Arc<dyn SyncPeer>], id: u64) -> Option<Arc<dyn SyncPeer>> {
    peers.iter().find(|peer| peer.id() == id).cloned()
}

fn next_peer(peers: &[Arc<dyn SyncPeer>], after: u64) -> Option<u64> {
    peers
        .iter()
        .map(|peer| peer.id())
        .find(|id| *id != after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sync_boundaries() {
        let config = FullNodeConfig::default();
        assert_eq!(classify_sync(1, &config), SyncKind::Backtrack);
        assert_eq!(classify_sync(20, &config), SyncKind::Backtrack);
        assert_eq!(classify_sync(21, &config), SyncKind::Short);
        // one below the threshold stays short, at the threshold goes long
        assert_eq!(classify_sync(299, &config), SyncKind::Short);
        assert_eq!(classify_sync(300, &config), SyncKind::Long);
    }

    #[test]
    fn test_choose_target_prefers_weight_then_hash() {
        let config = FullNodeConfig::default();
        let constants = Arc::new(evg_core::consensus::constants::MAINNET.clone());
        let (_tx, rx) = watch::channel(false);
        let engine = SyncEngine::new(config, constants, rx);
        let peaks = [
            PeerPeak {
                peer_id: 1,
                header_hash: Bytes32::new([2; 32]),
                height: 10,
                weight: 100,
            },
            PeerPeak {
                peer_id: 2,
                header_hash: Bytes32::new([1; 32]),
                height: 10,
                weight: 100,
            },
            PeerPeak {
                peer_id: 3,
                header_hash: Bytes32::new([9; 32]),
                height: 5,
                weight: 50,
            },
        ];
        let target = engine.choose_target(&peaks, 40).unwrap();
        assert_eq!(target.peer_id, 2);
        assert!(engine.choose_target(&peaks, 100).is_none());
    }

    #[tokio::test]
    async fn test_collect_peaks_times_out_to_synced() {
        let mut config = FullNodeConfig::default();
        config.max_sync_wait = 0;
        let constants = Arc::new(evg_core::consensus::constants::MAINNET.clone());
        let (_tx, rx) = watch::channel(false);
        let mut engine = SyncEngine::new(config, constants, rx);
        let (_peak_tx, mut peak_rx) = mpsc::channel(8);
        let peaks = engine.collect_peaks(&mut peak_rx).await.unwrap();
        assert!(peaks.is_empty());
        assert_eq!(engine.state(), SyncState::Synced);
    }
}
