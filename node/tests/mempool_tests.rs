mod common;

use common::{bundle_spending, puzzle, test_constants, MapCoins, TestRunner, TestHarness};
use evg_core::blockchain::coin::Coin;
use evg_core::blockchain::coin_record::CoinRecord;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::errors::ErrorCode;
use evg_node::mempool::MempoolManager;
use std::sync::Arc;

fn coin(seed: u8, amount: u64) -> Coin {
    Coin {
        parent_coin_info: Bytes32::new([seed; 32]),
        puzzle_hash: puzzle(seed).hash(),
        amount,
    }
}

fn peak_record(height: u32) -> evg_core::blockchain::block_record::BlockRecord {
    evg_core::blockchain::block_record::BlockRecord {
        header_hash: Bytes32::new([200; 32]),
        prev_hash: Bytes32::new([199; 32]),
        height,
        weight: u128::from(height) * 7,
        total_iters: 1,
        signage_point_index: 0,
        cc_challenge: Bytes32::default(),
        sub_slot_iters: 64_000,
        required_iters: 1,
        ip_iters: 10,
        overflow: false,
        pool_puzzle_hash: Bytes32::default(),
        farmer_puzzle_hash: Bytes32::default(),
        prev_transaction_block_hash: None,
        prev_transaction_block_height: 0,
        timestamp: Some(common::GENESIS_TIMESTAMP),
        fees: None,
        reward_claims_incorporated: None,
        sub_epoch_summary_included: None,
    }
}

fn manager_with_coins(coins: &[Coin]) -> (MempoolManager, MapCoins) {
    let constants = Arc::new(test_constants());
    let mut manager = MempoolManager::new(constants, Arc::new(TestRunner));
    let mut map = MapCoins::default();
    for coin in coins {
        map.insert(CoinRecord::created(*coin, 1, common::GENESIS_TIMESTAMP, false));
    }
    manager.new_peak(&peak_record(5), &map);
    (manager, map)
}

#[test]
fn test_admission_and_indices() {
    let spent = coin(1, 10_000);
    let (mut manager, map) = manager_with_coins(&[spent]);
    let bundle = bundle_spending(spent, puzzle(1), vec![coin(9, 9_000)], 1_000);
    let outcome = manager.add_spend_bundle(bundle.clone(), &map).unwrap();
    assert!(!outcome.already_present);
    assert_eq!(outcome.cost, 1_000);
    assert!(manager.mempool().contains(&bundle.name()));
    assert_eq!(
        manager.mempool().item_spending_coin(&spent.coin_id()),
        Some(&bundle.name())
    );
    // fee = 10_000 - 9_000
    assert_eq!(manager.mempool().get(&bundle.name()).unwrap().fee, 1_000);

    // admitting the same bundle again is a no-op
    let again = manager.add_spend_bundle(bundle, &map).unwrap();
    assert!(again.already_present);
    assert_eq!(manager.mempool().size(), 1);
}

#[test]
fn test_unknown_and_spent_coins_rejected() {
    let known = coin(1, 10_000);
    let (mut manager, mut map) = manager_with_coins(&[known]);

    let missing = coin(2, 5_000);
    let bundle = bundle_spending(missing, puzzle(2), vec![], 1_000);
    let error = manager.add_spend_bundle(bundle, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::UnknownUnspent);

    let mut spent_record = CoinRecord::created(known, 1, common::GENESIS_TIMESTAMP, false);
    spent_record.spent_height = 4;
    map.insert(spent_record);
    let bundle = bundle_spending(known, puzzle(1), vec![], 1_000);
    let error = manager.add_spend_bundle(bundle, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::DoubleSpend);
}

#[test]
fn test_conflicting_bundle_without_margin_rejected() {
    // scenario: bundle_B spends the same coin with the same fee per cost
    let contested = coin(1, 10_000);
    let (mut manager, map) = manager_with_coins(&[contested]);

    let bundle_a = bundle_spending(contested, puzzle(1), vec![coin(9, 9_000)], 1_000);
    manager.add_spend_bundle(bundle_a.clone(), &map).unwrap();

    let bundle_b = bundle_spending(contested, puzzle(1), vec![coin(10, 9_000)], 1_000);
    let error = manager.add_spend_bundle(bundle_b, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::ConflictingBundle);
    // the original stays
    assert_eq!(
        manager.mempool().item_spending_coin(&contested.coin_id()),
        Some(&bundle_a.name())
    );
}

#[test]
fn test_replace_by_fee() {
    // scenario: bundle_B doubles the fee per cost and displaces bundle_A
    let contested = coin(1, 10_000);
    let (mut manager, map) = manager_with_coins(&[contested]);

    let bundle_a = bundle_spending(contested, puzzle(1), vec![coin(9, 9_000)], 1_000);
    manager.add_spend_bundle(bundle_a.clone(), &map).unwrap();

    let bundle_b = bundle_spending(contested, puzzle(1), vec![coin(10, 8_000)], 1_000);
    let outcome = manager.add_spend_bundle(bundle_b.clone(), &map).unwrap();
    assert_eq!(outcome.removed, vec![bundle_a.name()]);
    assert!(!manager.mempool().contains(&bundle_a.name()));
    // the removal index now points at the replacement
    assert_eq!(
        manager.mempool().item_spending_coin(&contested.coin_id()),
        Some(&bundle_b.name())
    );
}

#[test]
fn test_replacement_must_cover_all_conflicting_coins() {
    let coin_a = coin(1, 10_000);
    let coin_b = coin(2, 10_000);
    let (mut manager, map) = manager_with_coins(&[coin_a, coin_b]);

    // one bundle spends both coins
    let mut both = bundle_spending(coin_a, puzzle(1), vec![], 1_000);
    both.coin_spends
        .extend(bundle_spending(coin_b, puzzle(2), vec![], 1_000).coin_spends);
    manager.add_spend_bundle(both.clone(), &map).unwrap();

    // a rich replacement spending only one of them violates the superset
    // rule no matter the fee
    let partial = bundle_spending(coin_a, puzzle(1), vec![], 100);
    let error = manager.add_spend_bundle(partial, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::ConflictingBundle);
}

#[test]
fn test_cost_limit_boundary() {
    let constants = test_constants();
    let max = constants.max_block_cost;
    let rich = coin(1, 10_000);
    let (mut manager, map) = manager_with_coins(&[rich]);

    let at_limit = bundle_spending(rich, puzzle(1), vec![], max);
    assert!(manager.add_spend_bundle(at_limit, &map).is_ok());

    let over = coin(2, 10_000);
    let (mut manager, map) = manager_with_coins(&[over]);
    let too_big = bundle_spending(over, puzzle(2), vec![], max + 1);
    let error = manager.add_spend_bundle(too_big, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::CostTooHigh);
}

#[test]
fn test_capacity_eviction_prefers_higher_fee_rates() {
    let mut constants = test_constants();
    constants.max_block_cost = 1_000;
    constants.mempool_block_buffer = 2; // capacity: 2_000 cost units
    let mut manager = MempoolManager::new(Arc::new(constants), Arc::new(TestRunner));
    let mut map = MapCoins::default();
    let coins: Vec<Coin> = (1..=3).map(|i| coin(i, 100_000)).collect();
    for c in &coins {
        map.insert(CoinRecord::created(*c, 1, common::GENESIS_TIMESTAMP, false));
    }
    manager.new_peak(&peak_record(5), &map);

    // fee rates: low pays 1 per cost, mid 5, high 50
    let low = bundle_spending(coins[0], puzzle(1), vec![coin(11, 99_000)], 1_000);
    let mid = bundle_spending(coins[1], puzzle(2), vec![coin(12, 95_000)], 1_000);
    manager.add_spend_bundle(low.clone(), &map).unwrap();
    manager.add_spend_bundle(mid.clone(), &map).unwrap();
    assert_eq!(manager.mempool().size(), 2);

    let high = bundle_spending(coins[2], puzzle(3), vec![coin(13, 50_000)], 1_000);
    let outcome = manager.add_spend_bundle(high, &map).unwrap();
    assert_eq!(outcome.removed, vec![low.name()]);
    assert!(manager.mempool().contains(&mid.name()));

    // a newcomer below the eviction floor is rejected outright
    let broke = coin(4, 100_000);
    map.insert(CoinRecord::created(broke, 1, common::GENESIS_TIMESTAMP, false));
    let cheap = bundle_spending(broke, puzzle(4), vec![coin(14, 99_999)], 1_000);
    let error = manager.add_spend_bundle(cheap, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::FeeBelowEvictionThreshold);
}

#[test]
fn test_new_peak_rebuild_drops_spent_items() {
    let kept_coin = coin(1, 10_000);
    let spent_coin = coin(2, 10_000);
    let (mut manager, mut map) = manager_with_coins(&[kept_coin, spent_coin]);

    let kept = bundle_spending(kept_coin, puzzle(1), vec![coin(9, 9_000)], 1_000);
    let doomed = bundle_spending(spent_coin, puzzle(2), vec![coin(10, 9_000)], 1_000);
    manager.add_spend_bundle(kept.clone(), &map).unwrap();
    manager.add_spend_bundle(doomed.clone(), &map).unwrap();

    // the new block spent one of the two coins
    let mut record = CoinRecord::created(spent_coin, 1, common::GENESIS_TIMESTAMP, false);
    record.spent_height = 6;
    map.insert(record);
    let result = manager.new_peak(&peak_record(6), &map);
    assert_eq!(result.kept, 1);
    assert_eq!(result.dropped.len(), 1);
    assert_eq!(result.dropped[0].0, doomed.name());
    assert_eq!(result.dropped[0].1.code, ErrorCode::DoubleSpend);
    assert!(manager.mempool().contains(&kept.name()));
    assert!(!manager.mempool().contains(&doomed.name()));
}

#[test]
fn test_timelocks() {
    let locked = coin(1, 10_000);
    let (mut manager, map) = manager_with_coins(&[locked]);

    // not yet valid at the next height
    let mut bundle = bundle_spending(locked, puzzle(1), vec![], 1_000);
    let solution = common::TestSolution {
        created_coins: vec![],
        agg_sig_pairs: vec![],
        assert_height_absolute: Some(100),
        assert_before_height_absolute: None,
        cost: 1_000,
    };
    bundle.coin_spends[0].solution =
        evg_core::blockchain::program::SerializedProgram::new(evg_serialize::Streamable::to_bytes(&solution));
    let error = manager.add_spend_bundle(bundle, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::AssertHeightFailed);

    // impossible constraints are rejected outright
    let mut bundle = bundle_spending(locked, puzzle(1), vec![], 1_000);
    let solution = common::TestSolution {
        created_coins: vec![],
        agg_sig_pairs: vec![],
        assert_height_absolute: Some(50),
        assert_before_height_absolute: Some(40),
        cost: 1_000,
    };
    bundle.coin_spends[0].solution =
        evg_core::blockchain::program::SerializedProgram::new(evg_serialize::Streamable::to_bytes(&solution));
    let error = manager.add_spend_bundle(bundle, &map).unwrap_err();
    assert_eq!(error.code, ErrorCode::ImpossibleTimelock);
}

#[test]
fn test_block_assembly_is_greedy_and_deterministic() {
    let coins: Vec<Coin> = (1..=4).map(|i| coin(i, 100_000)).collect();
    let (mut manager, map) = manager_with_coins(&coins);

    // fee rates: 10, 5, 2, 1 per cost unit
    let bundles = [
        bundle_spending(coins[0], puzzle(1), vec![coin(11, 90_000)], 1_000),
        bundle_spending(coins[1], puzzle(2), vec![coin(12, 95_000)], 1_000),
        bundle_spending(coins[2], puzzle(3), vec![coin(13, 98_000)], 1_000),
        bundle_spending(coins[3], puzzle(4), vec![coin(14, 99_000)], 1_000),
    ];
    for bundle in &bundles {
        manager.add_spend_bundle(bundle.clone(), &map).unwrap();
    }

    // room for only three items
    let assembly = manager.create_block_generator(3_000).unwrap();
    assert_eq!(assembly.cost, 3_000);
    assert_eq!(assembly.fees, 10_000 + 5_000 + 2_000);
    assert_eq!(assembly.coin_ids.len(), 3);
    // removed coins are exactly the union of the selected items' removals
    for selected in &coins[0..3] {
        assert!(assembly.coin_ids.contains(&selected.coin_id()));
    }
    assert!(!assembly.coin_ids.contains(&coins[3].coin_id()));

    // same pool state, same selection
    let again = manager.create_block_generator(3_000).unwrap();
    assert_eq!(again.coin_ids, assembly.coin_ids);
    assert_eq!(
        again.generator.as_slice(),
        assembly.generator.as_slice()
    );
}

#[test]
fn test_assembled_block_passes_full_validation() {
    // end to end: admit, assemble, build a block, commit it
    let mut harness = TestHarness::new();
    harness.advance(None);

    let pool_coin = harness.pre_farm_pool_coin();
    let change = Coin {
        parent_coin_info: pool_coin.coin_id(),
        puzzle_hash: puzzle(7).hash(),
        amount: pool_coin.amount - 5_000,
    };
    let bundle = bundle_spending(pool_coin, puzzle(1), vec![change], 2_000_000);

    let constants = Arc::new(test_constants());
    let mut manager = MempoolManager::new(constants, Arc::new(TestRunner));
    manager.new_peak(&harness.chain.peak_record().unwrap(), &harness.chain);
    manager
        .add_spend_bundle(bundle, &harness.chain)
        .unwrap();
    let assembly = manager
        .create_block_generator(harness.constants.max_block_cost)
        .unwrap();

    // the generator the mempool produced round-trips through the block
    // builder and the real validator
    let rebuilt = evg_core::blockchain::spend_bundle::SpendBundle {
        coin_spends: evg_serialize::Streamable::from_bytes(assembly.generator.as_slice()).unwrap(),
        aggregated_signature: assembly.aggregated_signature,
    };
    let (block, result) = harness.advance(Some(&rebuilt));
    assert!(matches!(
        result,
        evg_node::blockchain::AddResult::NewPeak { .. }
    ));
    assert_eq!(block.transactions_info.unwrap().fees, 5_000);
    assert!(harness
        .chain
        .get_coin_record(&change.coin_id())
        .unwrap()
        .is_some());
}
