//! Shared harness: deterministic stand-ins for the external verifiers and
//! a block builder that produces chains the real validator accepts.

use blst::min_pk::SecretKey;
use evg_core::blockchain::block_record::BlockRecord;
use evg_core::blockchain::coin::Coin;
use evg_core::blockchain::coin_record::CoinRecord;
use evg_core::blockchain::coin_spend::CoinSpend;
use evg_core::blockchain::conditions::BlockProgramOutput;
use evg_core::blockchain::end_of_subslot::{
    ChallengeChainSubSlot, EndOfSubSlotBundle, RewardChainSubSlot, SubSlotProofs,
};
use evg_core::blockchain::foliage::{Foliage, FoliageBlockData};
use evg_core::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::pool_target::PoolTarget;
use evg_core::blockchain::program::SerializedProgram;
use evg_core::blockchain::proof_of_space::{
    calculate_plot_id_public_key, calculate_pos_challenge, ProofOfSpace,
};
use evg_core::blockchain::reward_chain_block::RewardChainBlock;
use evg_core::blockchain::sized_bytes::{Bytes32, Bytes48, Bytes96};
use evg_core::blockchain::spend_bundle::SpendBundle;
use evg_core::blockchain::transactions_info::TransactionsInfo;
use evg_core::blockchain::vdf::{ClassgroupElement, VdfInfo, VdfProof};
use evg_core::bls::{secret_key_from_seed, sign};
use evg_core::consensus::block_rewards::{calculate_base_farmer_reward, calculate_pool_reward};
use evg_core::consensus::constants::{ConsensusConstants, MAINNET};
use evg_core::consensus::pot_iterations::{calculate_ip_iters, calculate_iterations_quality};
use evg_core::errors::ChainError;
use evg_node::block_validation::{
    commitment_root, expected_params, expected_reward_claims, ExpectedParams, UnspentView,
};
use evg_node::blockchain::{AddResult, Blockchain};
use evg_node::verifiers::{BlockProgramRunner, Verifiers};
use evg_serialize::Streamable;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_INTERVAL_SECS: u64 = 10;

/// Small, fast parameters: boundaries land within a handful of blocks, the
/// plot filter always passes and quality maps to a few dozen iterations.
pub fn test_constants() -> ConsensusConstants {
    let mut constants = MAINNET.clone();
    constants.sub_epoch_blocks = 4;
    constants.epoch_blocks = 8;
    constants.number_of_timestamps = 3;
    constants.number_zero_bits_plot_filter = 0;
    constants.sub_slot_iters_starting = 64_000;
    constants.difficulty_constant_factor = 1 << 40;
    constants.genesis_pre_farm_pool_puzzle_hash = puzzle(1).hash();
    constants.genesis_pre_farm_farmer_puzzle_hash = puzzle(2).hash();
    constants
}

pub fn puzzle(tag: u8) -> SerializedProgram {
    SerializedProgram::new(vec![tag, tag, tag])
}

// the simulator backends double as the test stand-ins
pub use evg_node::simulator::{
    simulator_quality as test_quality, simulator_verifiers as test_verifiers,
    SimulatorRunner as TestRunner, SimulatorSolution as TestSolution,
};

/// Unspent view over a plain map, for mempool tests that need no chain.
#[derive(Default)]
pub struct MapCoins {
    pub records: HashMap<Bytes32, CoinRecord>,
}

impl MapCoins {
    pub fn insert(&mut self, record: CoinRecord) {
        self.records.insert(record.name(), record);
    }
}

impl UnspentView for MapCoins {
    fn coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, ChainError> {
        Ok(self.records.get(coin_id).copied())
    }
}

/// Builds a spend bundle spending `coin` through `reveal`, creating
/// `created` and declaring `cost`.
pub fn bundle_spending(
    coin: Coin,
    reveal: SerializedProgram,
    created: Vec<Coin>,
    cost: u64,
) -> SpendBundle {
    let solution = TestSolution {
        created_coins: created,
        agg_sig_pairs: Vec::new(),
        assert_height_absolute: None,
        assert_before_height_absolute: None,
        cost,
    };
    SpendBundle {
        coin_spends: vec![CoinSpend {
            coin,
            puzzle_reveal: reveal,
            solution: SerializedProgram::new(solution.to_bytes()),
        }],
        aggregated_signature: Bytes96::default(),
    }
}

/// A chain plus the keys and counters needed to extend it with blocks the
/// validator accepts.
pub struct TestHarness {
    pub constants: Arc<ConsensusConstants>,
    pub verifiers: Verifiers,
    pub chain: Blockchain,
    pub plot_sk: SecretKey,
    pub pool_sk: SecretKey,
    pub next_timestamp: u64,
    _dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_constants(test_constants())
    }

    pub fn with_constants(constants: ConsensusConstants) -> Self {
        let constants = Arc::new(constants);
        let dir = tempfile::tempdir().expect("tempdir");
        let db = sled::Config::new()
            .path(dir.path())
            .temporary(true)
            .open()
            .expect("sled open");
        let verifiers = test_verifiers();
        let chain = Blockchain::open(&db, constants.clone(), verifiers.clone(), "testnet")
            .expect("open chain");
        TestHarness {
            constants,
            verifiers,
            chain,
            plot_sk: secret_key_from_seed(&[11u8; 32]).expect("plot key"),
            pool_sk: secret_key_from_seed(&[22u8; 32]).expect("pool key"),
            next_timestamp: GENESIS_TIMESTAMP,
            _dir: dir,
        }
    }

    pub fn now(&self) -> u64 {
        self.next_timestamp + 1
    }

    fn plot_public_key(&self) -> Bytes48 {
        Bytes48::from(&self.plot_sk.sk_to_pk())
    }

    fn pool_public_key(&self) -> Bytes48 {
        Bytes48::from(&self.pool_sk.sk_to_pk())
    }

    /// Builds a block on `parent` (None for genesis) with an optional
    /// transaction bundle, at the given timestamp.
    pub fn make_block_at(
        &self,
        parent: Option<&BlockRecord>,
        bundle: Option<&SpendBundle>,
        timestamp: u64,
    ) -> FullBlock {
        let constants = &self.constants;
        let params = match parent {
            Some(parent) => {
                expected_params(constants, &self.chain, parent).expect("expected params")
            }
            None => ExpectedParams {
                difficulty: constants.difficulty_starting,
                sub_slot_iters: constants.sub_slot_iters_starting,
                sub_epoch_summary: None,
            },
        };
        let height = parent.map_or(0, |record| record.height + 1);
        let weight = parent.map_or(0, |record| record.weight + u128::from(params.difficulty));

        // one fresh sub slot per block
        let prev_challenge = parent.map_or(constants.genesis_challenge, |record| {
            record.cc_challenge
        });
        let cc_sub_slot = ChallengeChainSubSlot {
            challenge_chain_end_of_slot_vdf: VdfInfo {
                challenge: prev_challenge,
                output: ClassgroupElement::default(),
                number_of_iterations: params.sub_slot_iters,
            },
            infused_challenge_chain_sub_slot_hash: None,
            subepoch_summary_hash: params
                .sub_epoch_summary
                .as_ref()
                .map(|summary| summary.get_hash()),
            new_sub_slot_iters: params
                .sub_epoch_summary
                .as_ref()
                .and_then(|summary| summary.new_sub_slot_iters),
            new_difficulty: params
                .sub_epoch_summary
                .as_ref()
                .and_then(|summary| summary.new_difficulty),
        };
        let cc_hash = cc_sub_slot.get_hash();
        let dummy_proof = VdfProof {
            witness_type: 0,
            witness: Vec::new(),
            normalized_to_identity: false,
        };
        let reward_sub_slot = RewardChainSubSlot {
            end_of_slot_vdf: VdfInfo {
                challenge: prev_challenge,
                output: ClassgroupElement::default(),
                number_of_iterations: params.sub_slot_iters,
            },
            challenge_chain_sub_slot_hash: cc_hash,
            infused_challenge_chain_sub_slot_hash: None,
            deficit: 0,
        };
        let sub_slot = EndOfSubSlotBundle {
            challenge_chain: cc_sub_slot,
            infused_challenge_chain: None,
            reward_chain: reward_sub_slot,
            proofs: SubSlotProofs {
                challenge_chain_slot_proof: dummy_proof.clone(),
                infused_challenge_chain_slot_proof: None,
                reward_chain_slot_proof: dummy_proof.clone(),
            },
        };

        // proof of space at signage point 0 of the new slot
        let plot_id = calculate_plot_id_public_key(&self.pool_public_key(), &self.plot_public_key());
        let pos_challenge = calculate_pos_challenge(&plot_id, &cc_hash, &cc_hash);
        let pos = ProofOfSpace {
            challenge: pos_challenge,
            pool_public_key: Some(self.pool_public_key()),
            pool_contract_puzzle_hash: None,
            plot_public_key: self.plot_public_key(),
            size: 32,
            proof: vec![7, 7, 7],
        };
        let quality = test_quality(&plot_id, &pos_challenge);
        let required_iters = calculate_iterations_quality(
            constants.difficulty_constant_factor,
            quality,
            32,
            params.difficulty,
            cc_hash,
        );
        let ip_iters = calculate_ip_iters(constants, params.sub_slot_iters, 0, required_iters)
            .expect("ip iters");
        let total_iters = match parent {
            Some(record) => {
                record.total_iters - u128::from(record.ip_iters)
                    + u128::from(params.sub_slot_iters)
                    + u128::from(ip_iters)
            }
            None => u128::from(params.sub_slot_iters) + u128::from(ip_iters),
        };

        // body
        let runner = TestRunner;
        let (generator, output, removal_amount) = match bundle {
            Some(bundle) => {
                let generator = SerializedProgram::new(bundle.coin_spends.to_bytes());
                let output = runner
                    .run_block_program(&generator, &[], constants.max_block_cost, height)
                    .expect("test generator runs");
                let removal_amount: u128 = bundle
                    .coin_spends
                    .iter()
                    .map(|spend| u128::from(spend.coin.amount))
                    .sum();
                (Some(generator), output, removal_amount)
            }
            None => (None, BlockProgramOutput::default(), 0),
        };
        let fees = (removal_amount - output.addition_amount()) as u64;
        let cost = match &generator {
            Some(generator) => output.cost + generator.len() as u64 * constants.cost_per_byte,
            None => 0,
        };
        let pool_target = PoolTarget {
            puzzle_hash: puzzle(1).hash(),
            max_height: 0,
        };
        let farmer_ph = puzzle(2).hash();
        let claims = expected_reward_claims(
            constants,
            &self.chain,
            parent,
            height,
            &pool_target.puzzle_hash,
            &farmer_ph,
            fees,
        )
        .expect("reward claims");
        let transactions_info = TransactionsInfo {
            generator_root: generator
                .as_ref()
                .map_or(Bytes32::default(), SerializedProgram::hash),
            generator_refs_root: Bytes32::default(),
            aggregated_signature: bundle
                .map_or(Bytes96::default(), |bundle| bundle.aggregated_signature),
            fees,
            cost,
            reward_claims_incorporated: claims.clone(),
        };
        let mut addition_ids: Vec<Bytes32> =
            output.additions().iter().map(Coin::coin_id).collect();
        addition_ids.extend(claims.iter().map(Coin::coin_id));
        let prev_tx_hash = match parent {
            Some(record) => {
                if record.is_transaction_block() {
                    record.header_hash
                } else {
                    record
                        .prev_transaction_block_hash
                        .unwrap_or(constants.genesis_challenge)
                }
            }
            None => constants.genesis_challenge,
        };
        let foliage_transaction_block = FoliageTransactionBlock {
            prev_transaction_block_hash: prev_tx_hash,
            timestamp,
            filter_hash: Bytes32::default(),
            additions_root: commitment_root(addition_ids),
            removals_root: commitment_root(output.removal_ids()),
            transactions_info_hash: transactions_info.get_hash(),
        };

        let reward_chain_block = RewardChainBlock {
            weight,
            height,
            total_iters,
            signage_point_index: 0,
            pos_ss_cc_challenge_hash: cc_hash,
            proof_of_space: pos,
            challenge_chain_sp_vdf: None,
            challenge_chain_sp_signature: Bytes96::default(),
            challenge_chain_ip_vdf: VdfInfo {
                challenge: cc_hash,
                output: ClassgroupElement::default(),
                number_of_iterations: ip_iters,
            },
            reward_chain_sp_vdf: None,
            reward_chain_sp_signature: Bytes96::default(),
            reward_chain_ip_vdf: VdfInfo {
                challenge: reward_sub_slot.get_hash(),
                output: ClassgroupElement::default(),
                number_of_iterations: ip_iters,
            },
            infused_challenge_chain_ip_vdf: None,
            is_transaction_block: true,
        };

        let foliage_block_data = FoliageBlockData {
            unfinished_reward_block_hash: reward_chain_block.get_unfinished().get_hash(),
            pool_target,
            pool_signature: Some(Bytes96::from(&sign(
                &self.pool_sk,
                &pool_target.to_bytes(),
            ))),
            farmer_reward_puzzle_hash: farmer_ph,
            extension_data: Bytes32::default(),
        };
        let foliage = Foliage {
            prev_block_hash: parent
                .map_or(constants.genesis_challenge, |record| record.header_hash),
            reward_block_hash: reward_chain_block.get_unfinished().get_hash(),
            foliage_block_data: foliage_block_data.clone(),
            foliage_block_data_signature: Bytes96::from(&sign(
                &self.plot_sk,
                foliage_block_data.get_hash().as_slice(),
            )),
            foliage_transaction_block_hash: Some(foliage_transaction_block.get_hash()),
            foliage_transaction_block_signature: Some(Bytes96::from(&sign(
                &self.plot_sk,
                foliage_transaction_block.get_hash().as_slice(),
            ))),
        };

        FullBlock {
            finished_sub_slots: vec![sub_slot],
            reward_chain_block,
            challenge_chain_sp_proof: None,
            challenge_chain_ip_proof: dummy_proof.clone(),
            reward_chain_sp_proof: None,
            reward_chain_ip_proof: dummy_proof,
            infused_challenge_chain_ip_proof: None,
            foliage,
            foliage_transaction_block: Some(foliage_transaction_block),
            transactions_info: Some(transactions_info),
            transactions_generator: generator,
            transactions_generator_ref_list: Vec::new(),
        }
    }

    /// Builds and commits the next block on the current peak.
    pub fn advance(&mut self, bundle: Option<&SpendBundle>) -> (FullBlock, AddResult) {
        let parent = self.chain.peak_record();
        self.next_timestamp += BLOCK_INTERVAL_SECS;
        let block = self.make_block_at(parent.as_ref(), bundle, self.next_timestamp);
        let result = self
            .chain
            .add_block(&block, self.next_timestamp + 1)
            .expect("add block");
        (block, result)
    }

    /// Builds `count` empty blocks on top of the peak.
    pub fn advance_many(&mut self, count: u32) -> Vec<FullBlock> {
        (0..count)
            .map(|_| {
                let (block, result) = self.advance(None);
                assert!(
                    matches!(result, AddResult::NewPeak { .. }),
                    "expected NewPeak, got {result:?}"
                );
                block
            })
            .collect()
    }

    /// The genesis pre-farm pool coin, spendable through `puzzle(1)`.
    pub fn pre_farm_pool_coin(&self) -> Coin {
        evg_core::consensus::coinbase::create_pool_coin(
            0,
            &self.constants.genesis_pre_farm_pool_puzzle_hash,
            calculate_pool_reward(0),
            &self.constants.genesis_challenge,
        )
    }

    pub fn pre_farm_farmer_coin(&self) -> Coin {
        evg_core::consensus::coinbase::create_farmer_coin(
            0,
            &self.constants.genesis_pre_farm_farmer_puzzle_hash,
            calculate_base_farmer_reward(0),
            &self.constants.genesis_challenge,
        )
    }
}
