use crate::block_creation::{create_unfinished_block, unfinished_to_full_block, UnfinishedDraft};
use crate::blockchain::{AddResult, Blockchain};
use crate::cpu_pool::CpuPool;
use crate::gossip::Gossip;
use crate::mempool::MempoolManager;
use crate::peer_manager::{PeerManager, Penalty};
use crate::pending_blocks::PendingBlocks;
use crate::subscriptions::SubscriptionService;
use crate::sync::PeerPeak;
use crate::verifiers::Verifiers;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::blockchain::spend_bundle::SpendBundle;
use evg_core::blockchain::unfinished_block::UnfinishedBlock;
use evg_core::config::Config;
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::errors::{ChainError, ValidationError};
use evg_core::protocols::wallet::{
    CoinState, NewPeakWallet, RegisterForCoinUpdates, RegisterForPhUpdates, RejectHeaderRequest,
    RequestBlockHeader, RespondBlockHeader, RespondToCoinUpdates, RespondToPhUpdates,
    SendTransaction, TransactionAck, TransactionAckStatus,
};
use evg_core::blockchain::header_block::HeaderBlock;
use evg_core::protocols::farmer::{DeclareProofOfSpace, SignedValues};
use evg_core::protocols::full_node as fnp;
use evg_core::protocols::timelord::{NewInfusionPointVdf, NewPeakTimelord, NewUnfinishedBlockTimelord};
use evg_core::protocols::{Message, NodeType, ProtocolMessageTypes, NO_REQUEST_ID};
use crate::weight_proof::WeightProofHandler;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex, RwLock};

pub const MAX_HELD_UNFINISHED_BLOCKS: usize = 50;

/// Who an outbound message goes to; the connection layer resolves this
/// against the live peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Peer(u64),
    FullNodes { except: Option<u64> },
    Wallets,
    Farmers,
    Timelords,
}

#[derive(Debug)]
pub struct OutboundMessage {
    pub target: Target,
    pub message: Message,
}

fn to_peer(peer_id: u64, message: Message) -> OutboundMessage {
    OutboundMessage {
        target: Target::Peer(peer_id),
        message,
    }
}

/// The full node core: owns the chain, the mempool, peers, subscriptions
/// and gossip state, and turns inbound protocol messages into state
/// changes plus outbound messages.
///
/// Lock order is blockchain, then mempool, then the ancillary maps; every
/// path below follows it.
pub struct FullNode {
    pub config: Arc<Config>,
    pub constants: Arc<ConsensusConstants>,
    verifiers: Verifiers,
    pub blockchain: RwLock<Blockchain>,
    pub mempool: Mutex<MempoolManager>,
    pub peers: Mutex<PeerManager>,
    pub subscriptions: Mutex<SubscriptionService>,
    gossip: Mutex<Gossip>,
    pending_blocks: Mutex<PendingBlocks>,
    unfinished_blocks: Mutex<HashMap<Bytes32, UnfinishedBlock>>,
    drafts: Mutex<HashMap<Bytes32, UnfinishedDraft>>,
    /// (challenge hash, signage point index) -> the full signage point
    signage_points: Mutex<HashMap<(Bytes32, u8), fnp::RespondSignagePoint>>,
    weight_proofs: WeightProofHandler,
    pub cpu_pool: CpuPool,
    peak_sender: mpsc::Sender<PeerPeak>,
    _shutdown: watch::Receiver<bool>,
}

impl FullNode {
    pub fn new(
        chain_db: &sled::Db,
        peer_db: &sled::Db,
        config: Arc<Config>,
        constants: Arc<ConsensusConstants>,
        verifiers: Verifiers,
        peak_sender: mpsc::Sender<PeerPeak>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ChainError> {
        let blockchain = Blockchain::open(
            chain_db,
            constants.clone(),
            verifiers.clone(),
            &config.full_node.selected_network,
        )?;
        let mempool = MempoolManager::new(constants.clone(), verifiers.program_runner.clone());
        let peers = PeerManager::open(
            peer_db,
            config.full_node.clone(),
            config.inbound_rate_limit_percent,
        )?;
        Ok(FullNode {
            constants: constants.clone(),
            verifiers,
            blockchain: RwLock::new(blockchain),
            mempool: Mutex::new(mempool),
            peers: Mutex::new(peers),
            subscriptions: Mutex::new(SubscriptionService::default()),
            gossip: Mutex::new(Gossip::new(config.full_node.max_duplicate_unfinished_blocks)),
            pending_blocks: Mutex::new(PendingBlocks::new(std::time::Duration::from_secs(
                config.full_node.pending_block_ttl,
            ))),
            unfinished_blocks: Mutex::new(HashMap::new()),
            drafts: Mutex::new(HashMap::new()),
            signage_points: Mutex::new(HashMap::new()),
            weight_proofs: WeightProofHandler::new(constants),
            cpu_pool: CpuPool::new(config.full_node.reserved_cores),
            peak_sender,
            _shutdown: shutdown,
            config,
        })
    }

    /// Feeds a block through validation, commit, mempool rebuild,
    /// subscription updates and gossip, in that order. Buffered children of
    /// the block are applied afterwards.
    pub async fn process_block(
        &self,
        block: FullBlock,
        from_peer: Option<u64>,
        now: u64,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let mut out = Vec::new();
        let mut queue = vec![block];
        while let Some(block) = queue.pop() {
            let header_hash = block.header_hash();
            let mut chain = self.blockchain.write().await;
            match chain.add_block(&block, now)? {
                AddResult::NewPeak { fork_height } => {
                    let peak = chain
                        .peak_record()
                        .expect("a new peak implies a peak record");
                    // rebuild the mempool before the peak becomes visible
                    // to anyone else
                    let rebuild = {
                        let mut mempool = self.mempool.lock().await;
                        mempool.new_peak(&peak, &*chain)
                    };
                    debug!(
                        "mempool after peak {}: kept {}, dropped {}",
                        peak.height,
                        rebuild.kept,
                        rebuild.dropped.len()
                    );

                    // subscription deltas for this commit
                    let diff = chain.get_coin_diff(&header_hash)?.unwrap_or_default();
                    let mut spent_records = Vec::new();
                    for coin_id in &diff.removal_ids {
                        if let Some(record) = chain.get_coin_record(coin_id)? {
                            spent_records.push(record);
                        }
                    }
                    let difficulty = chain.current_difficulty();
                    drop(chain);

                    let updates = {
                        let subscriptions = self.subscriptions.lock().await;
                        subscriptions.updates_for_block(
                            &diff,
                            &spent_records,
                            header_hash,
                            fork_height,
                        )
                    };
                    for (peer_id, update) in updates {
                        out.push(to_peer(
                            peer_id,
                            Message::new(
                                ProtocolMessageTypes::CoinStateUpdate,
                                NO_REQUEST_ID,
                                &update,
                            ),
                        ));
                    }

                    // gossip strictly after commit
                    let unfinished_hash = block.reward_chain_block.get_unfinished().get_hash();
                    out.push(OutboundMessage {
                        target: Target::FullNodes { except: from_peer },
                        message: Message::new(
                            ProtocolMessageTypes::NewPeak,
                            NO_REQUEST_ID,
                            &fnp::NewPeak {
                                header_hash,
                                height: peak.height,
                                weight: peak.weight,
                                fork_point_with_previous_peak: fork_height,
                                unfinished_reward_block_hash: unfinished_hash,
                            },
                        ),
                    });
                    out.push(OutboundMessage {
                        target: Target::Wallets,
                        message: Message::new(
                            ProtocolMessageTypes::NewPeakWallet,
                            NO_REQUEST_ID,
                            &NewPeakWallet {
                                header_hash,
                                height: peak.height,
                                weight: peak.weight,
                                fork_point_with_previous_peak: fork_height,
                            },
                        ),
                    });
                    out.push(OutboundMessage {
                        target: Target::Timelords,
                        message: Message::new(
                            ProtocolMessageTypes::NewPeakTimelord,
                            NO_REQUEST_ID,
                            &NewPeakTimelord {
                                reward_chain_tip: block.reward_chain_block.get_hash(),
                                height: peak.height,
                                weight: peak.weight,
                                difficulty,
                                sub_slot_iters: peak.sub_slot_iters,
                                sub_epoch_summary: peak.sub_epoch_summary_included.clone(),
                            },
                        ),
                    });
                    self.gossip.lock().await.clear_unfinished(&unfinished_hash);

                    // children waiting on this block can now be applied
                    let children = self
                        .pending_blocks
                        .lock()
                        .await
                        .take_children(&header_hash);
                    queue.extend(children);
                }
                AddResult::AddedAsOrphan => {
                    debug!("block {header_hash} stored as orphan");
                }
                AddResult::AlreadyHave => {}
                AddResult::Invalid(error) => {
                    drop(chain);
                    self.penalize(from_peer, Penalty::InvalidData).await;
                    warn!("invalid block {header_hash}: {error}");
                }
                AddResult::Disconnected => {
                    drop(chain);
                    let parent_height = block.height().saturating_sub(1);
                    self.pending_blocks
                        .lock()
                        .await
                        .add(block, Instant::now());
                    if let Some(peer_id) = from_peer {
                        out.push(to_peer(
                            peer_id,
                            Message::new(
                                ProtocolMessageTypes::RequestBlock,
                                NO_REQUEST_ID,
                                &fnp::RequestBlock {
                                    height: parent_height,
                                    include_transaction_block: true,
                                },
                            ),
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Admits a transaction and, on success, announces it to the other
    /// full nodes.
    pub async fn process_transaction(
        &self,
        bundle: SpendBundle,
        from_peer: Option<u64>,
    ) -> (Result<u64, ValidationError>, Vec<OutboundMessage>) {
        let name = bundle.name();
        let chain = self.blockchain.read().await;
        let mut mempool = self.mempool.lock().await;
        let outcome = mempool.add_spend_bundle(bundle, &*chain);
        drop(mempool);
        drop(chain);
        match outcome {
            Ok(outcome) if !outcome.already_present => {
                let item_fee = {
                    let mempool = self.mempool.lock().await;
                    mempool.mempool().get(&name).map(|item| item.fee).unwrap_or(0)
                };
                let announce = OutboundMessage {
                    target: Target::FullNodes { except: from_peer },
                    message: Message::new(
                        ProtocolMessageTypes::NewTransaction,
                        NO_REQUEST_ID,
                        &fnp::NewTransaction {
                            transaction_id: name,
                            cost: outcome.cost,
                            fees: item_fee,
                        },
                    ),
                };
                (Ok(outcome.cost), vec![announce])
            }
            Ok(outcome) => (Ok(outcome.cost), Vec::new()),
            Err(error) => {
                self.penalize(from_peer, Penalty::InvalidData).await;
                (Err(error), Vec::new())
            }
        }
    }

    async fn penalize(&self, peer: Option<u64>, penalty: Penalty) {
        if let Some(peer_id) = peer {
            let mut peers = self.peers.lock().await;
            peers.penalize(peer_id, penalty, Instant::now());
        }
    }

    /// Single decode entry per connection: every inbound frame lands here
    /// and is dispatched through one closed match over the message kind.
    pub async fn handle_message(
        &self,
        peer_id: u64,
        message: Message,
        now: u64,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        {
            let mut peers = self.peers.lock().await;
            if let Some(peer) = peers.peer_mut(peer_id) {
                if !peer
                    .rate_limiter
                    .accept(message.msg_type, message.data.len(), Instant::now())
                {
                    peers.penalize(peer_id, Penalty::ProtocolViolation, Instant::now());
                    return Err(ChainError::Peer(format!(
                        "peer {peer_id} exceeded rate limit for {:?}",
                        message.msg_type
                    )));
                }
            }
        }
        let request_id = message.request_id;
        match message.msg_type {
            ProtocolMessageTypes::NewPeak => {
                let peak: fnp::NewPeak = message.parse_as()?;
                let _ = self
                    .peak_sender
                    .send(PeerPeak {
                        peer_id,
                        header_hash: peak.header_hash,
                        height: peak.height,
                        weight: peak.weight,
                    })
                    .await;
                let chain = self.blockchain.read().await;
                if chain.contains_block(&peak.header_hash) {
                    return Ok(Vec::new());
                }
                let local = chain.peak_record();
                drop(chain);
                // close-by peaks are fetched directly; the sync engine
                // handles anything deeper
                let close = local.as_ref().map_or(peak.height == 0, |record| {
                    peak.weight > record.weight
                        && peak.height.saturating_sub(record.height)
                            <= self.config.full_node.short_sync_blocks_behind_threshold
                });
                if close {
                    return Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RequestBlock,
                            NO_REQUEST_ID,
                            &fnp::RequestBlock {
                                height: peak.height,
                                include_transaction_block: true,
                            },
                        ),
                    )]);
                }
                Ok(Vec::new())
            }
            ProtocolMessageTypes::NewTransaction => {
                let inv: fnp::NewTransaction = message.parse_as()?;
                let mempool = self.mempool.lock().await;
                if mempool.seen(&inv.transaction_id) {
                    return Ok(Vec::new());
                }
                drop(mempool);
                Ok(vec![to_peer(
                    peer_id,
                    Message::new(
                        ProtocolMessageTypes::RequestTransaction,
                        NO_REQUEST_ID,
                        &fnp::RequestTransaction {
                            transaction_id: inv.transaction_id,
                        },
                    ),
                )])
            }
            ProtocolMessageTypes::RequestTransaction => {
                let request: fnp::RequestTransaction = message.parse_as()?;
                let mempool = self.mempool.lock().await;
                match mempool.get_bundle(&request.transaction_id) {
                    Some(bundle) => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RespondTransaction,
                            request_id,
                            &fnp::RespondTransaction {
                                transaction: bundle.clone(),
                            },
                        ),
                    )]),
                    None => Ok(Vec::new()),
                }
            }
            ProtocolMessageTypes::RespondTransaction => {
                let response: fnp::RespondTransaction = message.parse_as()?;
                let (_, messages) = self
                    .process_transaction(response.transaction, Some(peer_id))
                    .await;
                Ok(messages)
            }
            ProtocolMessageTypes::SendTransaction => {
                let request: SendTransaction = message.parse_as()?;
                let txid = request.transaction.name();
                let (result, mut messages) = self
                    .process_transaction(request.transaction, Some(peer_id))
                    .await;
                let ack = match result {
                    Ok(_) => TransactionAck {
                        txid,
                        status: TransactionAckStatus::Success,
                        error: None,
                    },
                    Err(error) => TransactionAck {
                        txid,
                        status: TransactionAckStatus::Failed,
                        error: Some(error.to_string()),
                    },
                };
                messages.push(to_peer(
                    peer_id,
                    Message::new(ProtocolMessageTypes::TransactionAck, request_id, &ack),
                ));
                Ok(messages)
            }
            ProtocolMessageTypes::RequestBlock => {
                let request: fnp::RequestBlock = message.parse_as()?;
                let chain = self.blockchain.read().await;
                match chain.get_block_at_height(request.height)? {
                    Some(block) => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RespondBlock,
                            request_id,
                            &fnp::RespondBlock { block },
                        ),
                    )]),
                    None => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RejectBlock,
                            request_id,
                            &fnp::RejectBlock {
                                height: request.height,
                            },
                        ),
                    )]),
                }
            }
            ProtocolMessageTypes::RequestBlocks => {
                let request: fnp::RequestBlocks = message.parse_as()?;
                let limit = self.constants.max_block_count_per_requests;
                if request.end_height < request.start_height
                    || request.end_height - request.start_height + 1 > limit
                {
                    return Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RejectBlocks,
                            request_id,
                            &fnp::RejectBlocks {
                                start_height: request.start_height,
                                end_height: request.end_height,
                            },
                        ),
                    )]);
                }
                let chain = self.blockchain.read().await;
                let mut blocks = Vec::new();
                for height in request.start_height..=request.end_height {
                    match chain.get_block_at_height(height)? {
                        Some(block) => blocks.push(block),
                        None => break,
                    }
                }
                if blocks.is_empty() {
                    return Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RejectBlocks,
                            request_id,
                            &fnp::RejectBlocks {
                                start_height: request.start_height,
                                end_height: request.end_height,
                            },
                        ),
                    )]);
                }
                Ok(vec![to_peer(
                    peer_id,
                    Message::new(
                        ProtocolMessageTypes::RespondBlocks,
                        request_id,
                        &fnp::RespondBlocks {
                            start_height: request.start_height,
                            end_height: request.end_height,
                            blocks,
                        },
                    ),
                )])
            }
            ProtocolMessageTypes::RespondBlock => {
                let response: fnp::RespondBlock = message.parse_as()?;
                self.process_block(response.block, Some(peer_id), now).await
            }
            ProtocolMessageTypes::RespondBlocks => {
                let response: fnp::RespondBlocks = message.parse_as()?;
                let mut out = Vec::new();
                for block in response.blocks {
                    out.extend(self.process_block(block, Some(peer_id), now).await?);
                }
                Ok(out)
            }
            ProtocolMessageTypes::RequestProofOfWeight => {
                let request: fnp::RequestProofOfWeight = message.parse_as()?;
                let chain = self.blockchain.read().await;
                let wp = self.weight_proofs.create_weight_proof(&chain)?;
                Ok(vec![to_peer(
                    peer_id,
                    Message::new(
                        ProtocolMessageTypes::RespondProofOfWeight,
                        request_id,
                        &fnp::RespondProofOfWeight {
                            wp,
                            tip: request.tip,
                        },
                    ),
                )])
            }
            ProtocolMessageTypes::RequestPeers => {
                let peers = self.peers.lock().await;
                let peer_list = peers.addresses_for_gossip(100)?;
                Ok(vec![to_peer(
                    peer_id,
                    Message::new(
                        ProtocolMessageTypes::RespondPeers,
                        request_id,
                        &fnp::RespondPeers { peer_list },
                    ),
                )])
            }
            ProtocolMessageTypes::RespondPeers => {
                let response: fnp::RespondPeers = message.parse_as()?;
                let peers = self.peers.lock().await;
                peers.record_gossiped_addresses(&response.peer_list)?;
                Ok(Vec::new())
            }
            ProtocolMessageTypes::NewUnfinishedBlock => {
                let inv: fnp::NewUnfinishedBlock = message.parse_as()?;
                let mut gossip = self.gossip.lock().await;
                let wanted = match inv.foliage_hash {
                    Some(foliage_hash) => {
                        gossip.admit_unfinished_variant(inv.unfinished_reward_hash, foliage_hash)
                    }
                    None => gossip.admit_unfinished_variant(
                        inv.unfinished_reward_hash,
                        inv.unfinished_reward_hash,
                    ),
                };
                drop(gossip);
                let held = self.unfinished_blocks.lock().await;
                if !wanted || held.contains_key(&inv.unfinished_reward_hash) {
                    return Ok(Vec::new());
                }
                Ok(vec![to_peer(
                    peer_id,
                    Message::new(
                        ProtocolMessageTypes::RequestUnfinishedBlock,
                        NO_REQUEST_ID,
                        &fnp::RequestUnfinishedBlock {
                            unfinished_reward_hash: inv.unfinished_reward_hash,
                        },
                    ),
                )])
            }
            ProtocolMessageTypes::RequestUnfinishedBlock => {
                let request: fnp::RequestUnfinishedBlock = message.parse_as()?;
                let held = self.unfinished_blocks.lock().await;
                match held.get(&request.unfinished_reward_hash) {
                    Some(unfinished) => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RespondUnfinishedBlock,
                            request_id,
                            &fnp::RespondUnfinishedBlock {
                                unfinished_block: unfinished.clone(),
                            },
                        ),
                    )]),
                    None => Ok(Vec::new()),
                }
            }
            ProtocolMessageTypes::RespondUnfinishedBlock => {
                let response: fnp::RespondUnfinishedBlock = message.parse_as()?;
                let unfinished = response.unfinished_block;
                self.hold_unfinished_block(unfinished, Some(peer_id)).await
            }
            ProtocolMessageTypes::DeclareProofOfSpace => {
                let declaration: DeclareProofOfSpace = message.parse_as()?;
                self.handle_declared_proof(peer_id, declaration, now).await
            }
            ProtocolMessageTypes::SignedValues => {
                let signed: SignedValues = message.parse_as()?;
                self.handle_signed_values(signed).await
            }
            ProtocolMessageTypes::NewInfusionPointVdf => {
                let infusion: NewInfusionPointVdf = message.parse_as()?;
                let unfinished = {
                    let held = self.unfinished_blocks.lock().await;
                    held.get(&infusion.unfinished_reward_hash).cloned()
                };
                let Some(unfinished) = unfinished else {
                    return Ok(Vec::new());
                };
                let block = {
                    let chain = self.blockchain.read().await;
                    unfinished_to_full_block(&self.constants, &chain, &unfinished, &infusion)?
                };
                self.process_block(block, None, now).await
            }
            ProtocolMessageTypes::RegisterForPhUpdates => {
                let request: RegisterForPhUpdates = message.parse_as()?;
                self.register_ph_updates(peer_id, request, request_id).await
            }
            ProtocolMessageTypes::RegisterForCoinUpdates => {
                let request: RegisterForCoinUpdates = message.parse_as()?;
                self.register_coin_updates(peer_id, request, request_id).await
            }
            ProtocolMessageTypes::RequestBlockHeader => {
                let request: RequestBlockHeader = message.parse_as()?;
                let chain = self.blockchain.read().await;
                match chain.get_block_at_height(request.height)? {
                    Some(block) => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RespondBlockHeader,
                            request_id,
                            &RespondBlockHeader {
                                header_block: HeaderBlock::from(&block),
                            },
                        ),
                    )]),
                    None => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RejectHeaderRequest,
                            request_id,
                            &RejectHeaderRequest {
                                height: request.height,
                            },
                        ),
                    )]),
                }
            }
            ProtocolMessageTypes::Handshake => Ok(Vec::new()),
            ProtocolMessageTypes::NewSignagePointOrEndOfSubSlot => {
                let inv: fnp::NewSignagePointOrEndOfSubSlot = message.parse_as()?;
                let known = {
                    let points = self.signage_points.lock().await;
                    points.contains_key(&(inv.challenge_hash, inv.index_from_challenge))
                };
                if known {
                    return Ok(Vec::new());
                }
                Ok(vec![to_peer(
                    peer_id,
                    Message::new(
                        ProtocolMessageTypes::RequestSignagePointOrEndOfSubSlot,
                        NO_REQUEST_ID,
                        &fnp::RequestSignagePointOrEndOfSubSlot {
                            challenge_hash: inv.challenge_hash,
                            index_from_challenge: inv.index_from_challenge,
                            last_rc_infusion: inv.last_rc_infusion,
                        },
                    ),
                )])
            }
            ProtocolMessageTypes::RequestSignagePointOrEndOfSubSlot => {
                let request: fnp::RequestSignagePointOrEndOfSubSlot = message.parse_as()?;
                let points = self.signage_points.lock().await;
                match points.get(&(request.challenge_hash, request.index_from_challenge)) {
                    Some(point) => Ok(vec![to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RespondSignagePoint,
                            request_id,
                            point,
                        ),
                    )]),
                    None => Ok(Vec::new()),
                }
            }
            ProtocolMessageTypes::RespondSignagePoint
            | ProtocolMessageTypes::NewSignagePointVdf => {
                let point: fnp::RespondSignagePoint = match message.msg_type {
                    ProtocolMessageTypes::RespondSignagePoint => message.parse_as()?,
                    _ => {
                        let vdf: evg_core::protocols::timelord::NewSignagePointVdf =
                            message.parse_as()?;
                        fnp::RespondSignagePoint {
                            index_from_challenge: vdf.index_from_challenge,
                            challenge_chain_vdf: vdf.challenge_chain_sp_vdf,
                            challenge_chain_proof: vdf.challenge_chain_sp_proof,
                            reward_chain_vdf: vdf.reward_chain_sp_vdf,
                            reward_chain_proof: vdf.reward_chain_sp_proof,
                        }
                    }
                };
                self.accept_signage_point(peer_id, point).await
            }
            ProtocolMessageTypes::RespondEndOfSubSlot => {
                let response: fnp::RespondEndOfSubSlot = message.parse_as()?;
                let bundle = &response.end_of_slot_bundle;
                let cc_ok = self.verifiers.vdf.validate_vdf(
                    &bundle.challenge_chain.challenge_chain_end_of_slot_vdf,
                    &bundle.proofs.challenge_chain_slot_proof,
                );
                let rc_ok = self.verifiers.vdf.validate_vdf(
                    &bundle.reward_chain.end_of_slot_vdf,
                    &bundle.proofs.reward_chain_slot_proof,
                );
                if !cc_ok || !rc_ok {
                    self.penalize(Some(peer_id), Penalty::InvalidData).await;
                    return Ok(Vec::new());
                }
                Ok(vec![OutboundMessage {
                    target: Target::FullNodes {
                        except: Some(peer_id),
                    },
                    message: Message::new(
                        ProtocolMessageTypes::NewSignagePointOrEndOfSubSlot,
                        NO_REQUEST_ID,
                        &fnp::NewSignagePointOrEndOfSubSlot {
                            prev_challenge_hash: Some(
                                bundle.challenge_chain.challenge_chain_end_of_slot_vdf.challenge,
                            ),
                            challenge_hash: bundle.challenge_chain.get_hash(),
                            index_from_challenge: 0,
                            last_rc_infusion: bundle.reward_chain.get_hash(),
                        },
                    ),
                }])
            }
            ProtocolMessageTypes::NewEndOfSubSlotVdf => {
                let vdf: evg_core::protocols::timelord::NewEndOfSubSlotVdf = message.parse_as()?;
                Ok(vec![OutboundMessage {
                    target: Target::FullNodes { except: None },
                    message: Message::new(
                        ProtocolMessageTypes::RespondEndOfSubSlot,
                        NO_REQUEST_ID,
                        &fnp::RespondEndOfSubSlot {
                            end_of_slot_bundle: vdf.end_of_sub_slot_bundle,
                        },
                    ),
                }])
            }
            ProtocolMessageTypes::RequestMempoolTransactions => {
                let _request: fnp::RequestMempoolTransactions = message.parse_as()?;
                let mempool = self.mempool.lock().await;
                let mut responses = Vec::new();
                for item in mempool.mempool().items_by_fee_rate().take(100) {
                    responses.push(to_peer(
                        peer_id,
                        Message::new(
                            ProtocolMessageTypes::RespondTransaction,
                            NO_REQUEST_ID,
                            &fnp::RespondTransaction {
                                transaction: item.spend_bundle.clone(),
                            },
                        ),
                    ));
                }
                Ok(responses)
            }
            other => {
                debug!("unhandled {other:?} from peer {peer_id}");
                self.penalize(Some(peer_id), Penalty::ProtocolViolation).await;
                Ok(Vec::new())
            }
        }
    }

    /// Verifies and records a signage point, then fans it out to the other
    /// full nodes and the connected farmers.
    async fn accept_signage_point(
        &self,
        from_peer: u64,
        point: fnp::RespondSignagePoint,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let cc_ok = self
            .verifiers
            .vdf
            .validate_vdf(&point.challenge_chain_vdf, &point.challenge_chain_proof);
        let rc_ok = self
            .verifiers
            .vdf
            .validate_vdf(&point.reward_chain_vdf, &point.reward_chain_proof);
        if !cc_ok || !rc_ok {
            self.penalize(Some(from_peer), Penalty::InvalidData).await;
            return Ok(Vec::new());
        }
        let challenge = point.challenge_chain_vdf.challenge;
        let index = point.index_from_challenge;
        {
            let mut points = self.signage_points.lock().await;
            // a bounded scratch map; peaks reset the interesting window
            if points.len() > 4 * self.constants.num_sps_sub_slot as usize {
                points.clear();
            }
            points.insert((challenge, index), point.clone());
        }
        let (difficulty, sub_slot_iters, peak_height) = {
            let chain = self.blockchain.read().await;
            (
                chain.current_difficulty(),
                chain.current_sub_slot_iters(),
                chain.peak_height().unwrap_or(0),
            )
        };
        Ok(vec![
            OutboundMessage {
                target: Target::FullNodes {
                    except: Some(from_peer),
                },
                message: Message::new(
                    ProtocolMessageTypes::NewSignagePointOrEndOfSubSlot,
                    NO_REQUEST_ID,
                    &fnp::NewSignagePointOrEndOfSubSlot {
                        prev_challenge_hash: None,
                        challenge_hash: challenge,
                        index_from_challenge: index,
                        last_rc_infusion: point.reward_chain_vdf.challenge,
                    },
                ),
            },
            OutboundMessage {
                target: Target::Farmers,
                message: Message::new(
                    ProtocolMessageTypes::NewSignagePoint,
                    NO_REQUEST_ID,
                    &evg_core::protocols::farmer::NewSignagePoint {
                        challenge_hash: challenge,
                        challenge_chain_sp: point.challenge_chain_vdf.output.get_hash(),
                        reward_chain_sp: point.reward_chain_vdf.output.get_hash(),
                        difficulty,
                        sub_slot_iters,
                        signage_point_index: index,
                        peak_height,
                    },
                ),
            },
        ])
    }

    /// Stores an unfinished block and announces it onward to full nodes
    /// and the timelord.
    async fn hold_unfinished_block(
        &self,
        unfinished: UnfinishedBlock,
        from_peer: Option<u64>,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let reward_hash = unfinished.reward_hash();
        let foliage_hash = unfinished.foliage_hash();
        {
            let mut held = self.unfinished_blocks.lock().await;
            if held.len() >= MAX_HELD_UNFINISHED_BLOCKS {
                held.clear();
            }
            held.insert(reward_hash, unfinished.clone());
        }
        let (difficulty, sub_slot_iters) = {
            let chain = self.blockchain.read().await;
            (chain.current_difficulty(), chain.current_sub_slot_iters())
        };
        Ok(vec![
            OutboundMessage {
                target: Target::FullNodes { except: from_peer },
                message: Message::new(
                    ProtocolMessageTypes::NewUnfinishedBlock,
                    NO_REQUEST_ID,
                    &fnp::NewUnfinishedBlock {
                        unfinished_reward_hash: reward_hash,
                        foliage_hash: Some(foliage_hash),
                    },
                ),
            },
            OutboundMessage {
                target: Target::Timelords,
                message: Message::new(
                    ProtocolMessageTypes::NewUnfinishedBlockTimelord,
                    NO_REQUEST_ID,
                    &NewUnfinishedBlockTimelord {
                        reward_chain_block: unfinished.reward_chain_block.clone(),
                        difficulty,
                        sub_slot_iters,
                    },
                ),
            },
        ])
    }

    /// Farmer declared a winning proof: assemble a block from the mempool
    /// and ask the farmer to sign the foliage.
    async fn handle_declared_proof(
        &self,
        peer_id: u64,
        declaration: DeclareProofOfSpace,
        now: u64,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let chain = self.blockchain.read().await;
        let assembly = {
            let mempool = self.mempool.lock().await;
            mempool.create_block_generator(self.constants.max_block_cost)
        };
        let draft = match create_unfinished_block(
            &self.constants,
            &chain,
            &self.verifiers,
            &declaration,
            assembly.as_ref(),
            now,
        ) {
            Ok(draft) => draft,
            Err(ChainError::Validation(error)) => {
                warn!("rejecting declared proof from farmer {peer_id}: {error}");
                self.penalize(Some(peer_id), Penalty::InvalidData).await;
                return Ok(Vec::new());
            }
            Err(other) => return Err(other),
        };
        drop(chain);
        let request = draft.request.clone();
        self.drafts.lock().await.insert(draft.quality, draft);
        Ok(vec![to_peer(
            peer_id,
            Message::new(
                ProtocolMessageTypes::RequestSignedValues,
                NO_REQUEST_ID,
                &request,
            ),
        )])
    }

    /// Farmer returned the foliage signatures: finish the unfinished block
    /// and circulate it.
    async fn handle_signed_values(
        &self,
        signed: SignedValues,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let draft = {
            let mut drafts = self.drafts.lock().await;
            drafts.remove(&signed.quality_string)
        };
        let Some(mut draft) = draft else {
            debug!("signed values for unknown quality {}", signed.quality_string);
            return Ok(Vec::new());
        };
        draft.unfinished.foliage.foliage_block_data_signature =
            signed.foliage_block_data_signature;
        draft.unfinished.foliage.foliage_transaction_block_signature =
            Some(signed.foliage_transaction_block_signature);
        info!(
            "unfinished block ready, reward hash {}",
            draft.unfinished.reward_hash()
        );
        self.hold_unfinished_block(draft.unfinished, None).await
    }

    async fn register_ph_updates(
        &self,
        peer_id: u64,
        request: RegisterForPhUpdates,
        request_id: u16,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let (max_items, max_response) = self.subscription_limits(peer_id).await;
        let added = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.add_puzzle_subscriptions(peer_id, &request.puzzle_hashes, max_items)
        };
        let chain = self.blockchain.read().await;
        let end_height = chain.peak_height().unwrap_or(0);
        let mut states: Vec<CoinState> = Vec::new();
        let mut truncated = added.truncated;
        'outer: for puzzle_hash in &request.puzzle_hashes {
            let records = chain.get_coin_records_by_puzzle_hash(
                puzzle_hash,
                request.min_height,
                end_height,
                true,
            )?;
            for record in &records {
                if states.len() >= max_response {
                    truncated = true;
                    break 'outer;
                }
                states.push(CoinState::from(record));
            }
        }
        Ok(vec![to_peer(
            peer_id,
            Message::new(
                ProtocolMessageTypes::RespondToPhUpdates,
                request_id,
                &RespondToPhUpdates {
                    puzzle_hashes: request.puzzle_hashes,
                    min_height: request.min_height,
                    coin_states: states,
                    truncated,
                },
            ),
        )])
    }

    async fn register_coin_updates(
        &self,
        peer_id: u64,
        request: RegisterForCoinUpdates,
        request_id: u16,
    ) -> Result<Vec<OutboundMessage>, ChainError> {
        let (max_items, max_response) = self.subscription_limits(peer_id).await;
        let added = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.add_coin_subscriptions(peer_id, &request.coin_ids, max_items)
        };
        let chain = self.blockchain.read().await;
        let mut states = Vec::new();
        let mut truncated = added.truncated;
        for coin_id in &request.coin_ids {
            if states.len() >= max_response {
                truncated = true;
                break;
            }
            if let Some(record) = chain.get_coin_record(coin_id)? {
                if record.confirmed_height >= request.min_height
                    || (record.is_spent() && record.spent_height >= request.min_height)
                {
                    states.push(CoinState::from(&record));
                }
            }
        }
        Ok(vec![to_peer(
            peer_id,
            Message::new(
                ProtocolMessageTypes::RespondToCoinUpdates,
                request_id,
                &RespondToCoinUpdates {
                    coin_ids: request.coin_ids,
                    min_height: request.min_height,
                    coin_states: states,
                    truncated,
                },
            ),
        )])
    }

    async fn subscription_limits(&self, peer_id: u64) -> (usize, usize) {
        let peers = self.peers.lock().await;
        let trusted = peers.peer(peer_id).is_some_and(|peer| peer.trusted);
        let config = &self.config.full_node;
        if trusted {
            (
                config.trusted_max_subscribe_items,
                config.trusted_max_subscribe_response_items,
            )
        } else {
            (config.max_subscribe_items, config.max_subscribe_response_items)
        }
    }

    /// Resolves an outbound target against the current peer table.
    pub async fn resolve_target(&self, target: Target) -> Vec<u64> {
        let peers = self.peers.lock().await;
        match target {
            Target::Peer(peer_id) => vec![peer_id],
            Target::FullNodes { except } => peers
                .peers_of_type(NodeType::FullNode)
                .into_iter()
                .filter(|peer_id| Some(*peer_id) != except)
                .collect(),
            Target::Wallets => peers.peers_of_type(NodeType::Wallet),
            Target::Farmers => peers.peers_of_type(NodeType::Farmer),
            Target::Timelords => peers.peers_of_type(NodeType::Timelord),
        }
    }
}
