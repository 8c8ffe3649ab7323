mod common;

use common::{bundle_spending, puzzle, test_constants, test_verifiers, TestHarness};
use evg_core::blockchain::coin::Coin;
use evg_core::config::Config;
use evg_core::protocols::full_node as fnp;
use evg_core::protocols::wallet::{RegisterForPhUpdates, TransactionAck, TransactionAckStatus};
use evg_core::protocols::{Message, NodeType, ProtocolMessageTypes, NO_REQUEST_ID};
use evg_node::node::{FullNode, OutboundMessage, Target};
use evg_node::sync::PeerPeak;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

struct NodeFixture {
    node: FullNode,
    peaks: mpsc::Receiver<PeerPeak>,
    _shutdown: watch::Sender<bool>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn fixture() -> NodeFixture {
    let chain_dir = tempfile::tempdir().unwrap();
    let peer_dir = tempfile::tempdir().unwrap();
    let chain_db = sled::Config::new()
        .path(chain_dir.path())
        .temporary(true)
        .open()
        .unwrap();
    let peer_db = sled::Config::new()
        .path(peer_dir.path())
        .temporary(true)
        .open()
        .unwrap();
    let mut config = Config::default();
    config.full_node.selected_network = "testnet".to_string();
    let (peak_tx, peak_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node = FullNode::new(
        &chain_db,
        &peer_db,
        Arc::new(config),
        Arc::new(test_constants()),
        test_verifiers(),
        peak_tx,
        shutdown_rx,
    )
    .unwrap();
    NodeFixture {
        node,
        peaks: peak_rx,
        _shutdown: shutdown_tx,
        _dirs: (chain_dir, peer_dir),
    }
}

fn find<'a>(
    messages: &'a [OutboundMessage],
    msg_type: ProtocolMessageTypes,
) -> Option<&'a OutboundMessage> {
    messages.iter().find(|m| m.message.msg_type == msg_type)
}

#[tokio::test]
async fn test_block_intake_announces_after_commit() {
    let fixture = fixture();
    let mut harness = TestHarness::new();
    let (genesis, _) = harness.advance(None);

    // a wallet watching the pre-farm pool puzzle hash
    {
        let mut subscriptions = fixture.node.subscriptions.lock().await;
        subscriptions.add_puzzle_subscriptions(
            9,
            &[harness.constants.genesis_pre_farm_pool_puzzle_hash],
            100,
        );
    }

    let out = fixture
        .node
        .process_block(genesis, None, harness.now())
        .await
        .unwrap();
    assert_eq!(
        fixture.node.blockchain.read().await.peak_height(),
        Some(0)
    );

    let new_peak = find(&out, ProtocolMessageTypes::NewPeak).expect("peak gossip");
    assert!(matches!(new_peak.target, Target::FullNodes { .. }));
    let body: fnp::NewPeak = new_peak.message.parse_as().unwrap();
    assert_eq!(body.height, 0);
    assert_eq!(body.weight, 0);

    let update = find(&out, ProtocolMessageTypes::CoinStateUpdate).expect("subscription update");
    assert_eq!(update.target, Target::Peer(9));
    assert!(find(&out, ProtocolMessageTypes::NewPeakWallet).is_some());
    assert!(find(&out, ProtocolMessageTypes::NewPeakTimelord).is_some());
}

#[tokio::test]
async fn test_disconnected_block_buffered_until_parent_arrives() {
    let fixture = fixture();
    let mut harness = TestHarness::new();
    let (genesis, _) = harness.advance(None);
    let (block_one, _) = harness.advance(None);

    // the child arrives first: held, not committed
    let out = fixture
        .node
        .process_block(block_one.clone(), Some(3), harness.now())
        .await
        .unwrap();
    assert_eq!(fixture.node.blockchain.read().await.peak_height(), None);
    // the node asks the source for the missing parent
    let request = find(&out, ProtocolMessageTypes::RequestBlock).expect("parent request");
    let body: fnp::RequestBlock = request.message.parse_as().unwrap();
    assert_eq!(body.height, 0);

    // the parent arrives: both blocks are applied in order
    fixture
        .node
        .process_block(genesis, Some(3), harness.now())
        .await
        .unwrap();
    assert_eq!(
        fixture.node.blockchain.read().await.peak_height(),
        Some(1)
    );
    assert!(fixture
        .node
        .blockchain
        .read()
        .await
        .contains_block(&block_one.header_hash()));
}

#[tokio::test]
async fn test_request_block_round_trip() {
    let fixture = fixture();
    let mut harness = TestHarness::new();
    let (genesis, _) = harness.advance(None);
    fixture
        .node
        .process_block(genesis.clone(), None, harness.now())
        .await
        .unwrap();

    let peer = {
        let mut peers = fixture.node.peers.lock().await;
        peers
            .register("10.1.1.1", 9733, NodeType::FullNode, false, std::time::Instant::now())
            .unwrap()
    };
    let request = Message::new(
        ProtocolMessageTypes::RequestBlock,
        7,
        &fnp::RequestBlock {
            height: 0,
            include_transaction_block: true,
        },
    );
    let out = fixture
        .node
        .handle_message(peer, request, harness.now())
        .await
        .unwrap();
    let response = find(&out, ProtocolMessageTypes::RespondBlock).expect("block response");
    assert_eq!(response.message.request_id, 7);
    let body: fnp::RespondBlock = response.message.parse_as().unwrap();
    assert_eq!(body.block.header_hash(), genesis.header_hash());

    // a missing height is rejected, not ignored
    let missing = Message::new(
        ProtocolMessageTypes::RequestBlock,
        8,
        &fnp::RequestBlock {
            height: 42,
            include_transaction_block: true,
        },
    );
    let out = fixture
        .node
        .handle_message(peer, missing, harness.now())
        .await
        .unwrap();
    assert!(find(&out, ProtocolMessageTypes::RejectBlock).is_some());
}

#[tokio::test]
async fn test_send_transaction_acks_and_gossips() {
    let fixture = fixture();
    let mut harness = TestHarness::new();
    let (genesis, _) = harness.advance(None);
    fixture
        .node
        .process_block(genesis, None, harness.now())
        .await
        .unwrap();

    let wallet = {
        let mut peers = fixture.node.peers.lock().await;
        peers
            .register("10.2.2.2", 9733, NodeType::Wallet, false, std::time::Instant::now())
            .unwrap()
    };
    let pool_coin = harness.pre_farm_pool_coin();
    let change = Coin {
        parent_coin_info: pool_coin.coin_id(),
        puzzle_hash: puzzle(5).hash(),
        amount: pool_coin.amount - 777,
    };
    let bundle = bundle_spending(pool_coin, puzzle(1), vec![change], 2_000_000);
    let name = bundle.name();
    let message = Message::new(
        ProtocolMessageTypes::SendTransaction,
        5,
        &evg_core::protocols::wallet::SendTransaction {
            transaction: bundle,
        },
    );
    let out = fixture
        .node
        .handle_message(wallet, message, harness.now())
        .await
        .unwrap();

    let ack_msg = find(&out, ProtocolMessageTypes::TransactionAck).expect("ack");
    assert_eq!(ack_msg.target, Target::Peer(wallet));
    let ack: TransactionAck = ack_msg.message.parse_as().unwrap();
    assert_eq!(ack.status, TransactionAckStatus::Success);
    assert_eq!(ack.txid, name);

    let inv = find(&out, ProtocolMessageTypes::NewTransaction).expect("gossip");
    let body: fnp::NewTransaction = inv.message.parse_as().unwrap();
    assert_eq!(body.transaction_id, name);
    assert_eq!(body.fees, 777);

    // a double spend of the same coin is acked as failed
    let rival = bundle_spending(pool_coin, puzzle(1), vec![], 2_000_000);
    let message = Message::new(
        ProtocolMessageTypes::SendTransaction,
        6,
        &evg_core::protocols::wallet::SendTransaction { transaction: rival },
    );
    let out = fixture
        .node
        .handle_message(wallet, message, harness.now())
        .await
        .unwrap();
    let ack: TransactionAck = find(&out, ProtocolMessageTypes::TransactionAck)
        .unwrap()
        .message
        .parse_as()
        .unwrap();
    assert_eq!(ack.status, TransactionAckStatus::Failed);
}

#[tokio::test]
async fn test_new_peak_inventory_feeds_sync_and_fetches_close_peaks() {
    let mut fixture = fixture();
    let mut harness = TestHarness::new();
    let (genesis, _) = harness.advance(None);

    let peer = {
        let mut peers = fixture.node.peers.lock().await;
        peers
            .register("10.3.3.3", 9733, NodeType::FullNode, false, std::time::Instant::now())
            .unwrap()
    };
    let inv = Message::new(
        ProtocolMessageTypes::NewPeak,
        NO_REQUEST_ID,
        &fnp::NewPeak {
            header_hash: genesis.header_hash(),
            height: 0,
            weight: 0,
            fork_point_with_previous_peak: 0,
            unfinished_reward_block_hash: genesis
                .reward_chain_block
                .get_unfinished()
                .get_hash(),
        },
    );
    let out = fixture
        .node
        .handle_message(peer, inv, harness.now())
        .await
        .unwrap();

    // the claim is forwarded to the sync engine...
    let forwarded = fixture.peaks.try_recv().unwrap();
    assert_eq!(forwarded.peer_id, peer);
    assert_eq!(forwarded.header_hash, genesis.header_hash());
    // ...and the unknown nearby block is requested immediately
    assert!(find(&out, ProtocolMessageTypes::RequestBlock).is_some());
}

#[tokio::test]
async fn test_wallet_registration_returns_initial_states() {
    let fixture = fixture();
    let mut harness = TestHarness::new();
    let (genesis, _) = harness.advance(None);
    fixture
        .node
        .process_block(genesis, None, harness.now())
        .await
        .unwrap();

    let wallet = {
        let mut peers = fixture.node.peers.lock().await;
        peers
            .register("10.4.4.4", 9733, NodeType::Wallet, false, std::time::Instant::now())
            .unwrap()
    };
    let message = Message::new(
        ProtocolMessageTypes::RegisterForPhUpdates,
        3,
        &RegisterForPhUpdates {
            puzzle_hashes: vec![harness.constants.genesis_pre_farm_pool_puzzle_hash],
            min_height: 0,
        },
    );
    let out = fixture
        .node
        .handle_message(wallet, message, harness.now())
        .await
        .unwrap();
    let response = find(&out, ProtocolMessageTypes::RespondToPhUpdates).expect("response");
    let body: evg_core::protocols::wallet::RespondToPhUpdates =
        response.message.parse_as().unwrap();
    assert!(!body.truncated);
    assert_eq!(body.coin_states.len(), 1);
    assert_eq!(
        body.coin_states[0].coin,
        harness.pre_farm_pool_coin()
    );
    assert_eq!(body.coin_states[0].created_height, Some(0));
}
