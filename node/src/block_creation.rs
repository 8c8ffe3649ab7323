use crate::block_validation::{commitment_root, expected_params, expected_reward_claims, ExpectedParams};
use crate::blockchain::Blockchain;
use crate::mempool::BlockAssembly;
use crate::verifiers::Verifiers;
use evg_core::blockchain::block_record::BlockRecord;
use evg_core::blockchain::coin::Coin;
use evg_core::blockchain::foliage::{Foliage, FoliageBlockData};
use evg_core::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::pool_target::PoolTarget;
use evg_core::blockchain::reward_chain_block::{RewardChainBlock, RewardChainBlockUnfinished};
use evg_core::blockchain::sized_bytes::{Bytes32, Bytes96};
use evg_core::blockchain::transactions_info::TransactionsInfo;
use evg_core::blockchain::unfinished_block::UnfinishedBlock;
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::consensus::pot_iterations::{
    calculate_ip_iters, calculate_iterations_quality, is_overflow_block,
};
use evg_core::errors::{ChainError, ErrorCode, ValidationError};
use evg_core::protocols::farmer::{DeclareProofOfSpace, RequestSignedValues};
use evg_core::protocols::timelord::NewInfusionPointVdf;

/// A farmer declaration turned into an unfinished block awaiting the
/// farmer's foliage signatures.
pub struct UnfinishedDraft {
    pub unfinished: UnfinishedBlock,
    pub quality: Bytes32,
    pub request: RequestSignedValues,
}

fn params_for_next(
    constants: &ConsensusConstants,
    chain: &Blockchain,
    parent: Option<&BlockRecord>,
) -> Result<ExpectedParams, ChainError> {
    match parent {
        Some(parent) => expected_params(constants, chain, parent),
        None => Ok(ExpectedParams {
            difficulty: constants.difficulty_starting,
            sub_slot_iters: constants.sub_slot_iters_starting,
            sub_epoch_summary: None,
        }),
    }
}

/// Builds the block body and foliage for a declared proof of space, using
/// the mempool's assembly when one is available. The foliage signatures
/// are null until `SignedValues` comes back from the farmer.
pub fn create_unfinished_block(
    constants: &ConsensusConstants,
    chain: &Blockchain,
    verifiers: &Verifiers,
    declaration: &DeclareProofOfSpace,
    assembly: Option<&BlockAssembly>,
    now: u64,
) -> Result<UnfinishedDraft, ChainError> {
    let parent = chain.peak_record();
    let params = params_for_next(constants, chain, parent.as_ref())?;
    let height = parent.as_ref().map_or(0, |record| record.height + 1);

    let pos = &declaration.proof_of_space;
    let plot_id = pos.get_plot_id().ok_or_else(|| {
        ChainError::Validation(ValidationError::new(
            ErrorCode::InvalidProofOfSpace,
            "undefined plot id in declaration",
        ))
    })?;
    let quality = verifiers
        .pos
        .validate_proof(pos, &plot_id, &pos.challenge)
        .ok_or_else(|| {
            ChainError::Validation(ValidationError::new(
                ErrorCode::InvalidProofOfSpace,
                "declared proof rejected",
            ))
        })?;
    let required_iters = calculate_iterations_quality(
        constants.difficulty_constant_factor,
        quality,
        pos.size,
        params.difficulty,
        declaration.challenge_chain_sp,
    );
    let ip_iters = calculate_ip_iters(
        constants,
        params.sub_slot_iters,
        declaration.signage_point_index,
        required_iters,
    )
    .map_err(ChainError::Validation)?;
    let total_iters = match &parent {
        Some(record) => {
            record.total_iters - u128::from(record.ip_iters) + u128::from(ip_iters)
        }
        None => u128::from(ip_iters),
    };
    // overflow declarations are left to the next sub slot
    is_overflow_block(constants, declaration.signage_point_index)
        .map_err(ChainError::Validation)?;

    let reward_chain_block = RewardChainBlockUnfinished {
        total_iters,
        signage_point_index: declaration.signage_point_index,
        pos_ss_cc_challenge_hash: declaration.challenge_hash,
        proof_of_space: pos.clone(),
        challenge_chain_sp_vdf: None,
        challenge_chain_sp_signature: declaration.challenge_chain_sp_signature,
        reward_chain_sp_vdf: None,
        reward_chain_sp_signature: declaration.reward_chain_sp_signature,
    };
    let unfinished_reward_hash = reward_chain_block.get_hash();

    let pool_target = declaration.pool_target.unwrap_or(PoolTarget {
        puzzle_hash: pos.pool_contract_puzzle_hash.unwrap_or_default(),
        max_height: 0,
    });
    let foliage_block_data = FoliageBlockData {
        unfinished_reward_block_hash: unfinished_reward_hash,
        pool_target,
        pool_signature: declaration.pool_signature,
        farmer_reward_puzzle_hash: declaration.farmer_puzzle_hash,
        extension_data: Bytes32::default(),
    };

    // body
    let fees = assembly.map_or(0, |assembly| assembly.fees);
    let reward_claims = expected_reward_claims(
        constants,
        chain,
        parent.as_ref(),
        height,
        &pool_target.puzzle_hash,
        &declaration.farmer_puzzle_hash,
        fees,
    )?;
    let (generator, coin_ids, aggregated_signature, cost, addition_ids) = match assembly {
        Some(assembly) => (
            Some(assembly.generator.clone()),
            assembly.coin_ids.clone(),
            assembly.aggregated_signature,
            assembly.cost + assembly.generator.len() as u64 * constants.cost_per_byte,
            assembly.additions.iter().map(Coin::coin_id).collect::<Vec<_>>(),
        ),
        None => (None, Vec::new(), Bytes96::default(), 0, Vec::new()),
    };
    let transactions_info = TransactionsInfo {
        generator_root: generator
            .as_ref()
            .map_or(Bytes32::default(), |program| program.hash()),
        generator_refs_root: Bytes32::default(),
        aggregated_signature,
        fees,
        cost,
        reward_claims_incorporated: reward_claims.clone(),
    };
    let mut all_addition_ids = addition_ids;
    all_addition_ids.extend(reward_claims.iter().map(Coin::coin_id));
    let prev_transaction_block_hash = match &parent {
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
        prev_transaction_block_hash,
        timestamp: now,
        filter_hash: Bytes32::default(),
        additions_root: commitment_root(all_addition_ids),
        removals_root: commitment_root(coin_ids),
        transactions_info_hash: transactions_info.get_hash(),
    };

    let foliage = Foliage {
        prev_block_hash: parent
            .as_ref()
            .map_or(constants.genesis_challenge, |record| record.header_hash),
        reward_block_hash: unfinished_reward_hash,
        foliage_block_data: foliage_block_data.clone(),
        foliage_block_data_signature: Bytes96::default(),
        foliage_transaction_block_hash: Some(foliage_transaction_block.get_hash()),
        foliage_transaction_block_signature: Some(Bytes96::default()),
    };

    let request = RequestSignedValues {
        quality_string: quality,
        foliage_block_data_hash: foliage_block_data.get_hash(),
        foliage_transaction_block_hash: foliage_transaction_block.get_hash(),
    };
    let unfinished = UnfinishedBlock {
        finished_sub_slots: Vec::new(),
        reward_chain_block,
        challenge_chain_sp_proof: None,
        reward_chain_sp_proof: None,
        foliage,
        foliage_transaction_block: Some(foliage_transaction_block),
        transactions_info: Some(transactions_info),
        transactions_generator: generator,
        transactions_generator_ref_list: Vec::new(),
    };
    Ok(UnfinishedDraft {
        unfinished,
        quality,
        request,
    })
}

/// Combines an unfinished block with the timelord's infusion-point VDFs
/// into a full block ready for validation.
pub fn unfinished_to_full_block(
    constants: &ConsensusConstants,
    chain: &Blockchain,
    unfinished: &UnfinishedBlock,
    infusion: &NewInfusionPointVdf,
) -> Result<FullBlock, ChainError> {
    let parent = if unfinished.foliage.prev_block_hash == constants.genesis_challenge {
        None
    } else {
        Some(
            chain
                .get_block_record(&unfinished.foliage.prev_block_hash)
                .ok_or_else(|| {
                    ChainError::Peer(format!(
                        "unfinished block parent {} unknown",
                        unfinished.foliage.prev_block_hash
                    ))
                })?,
        )
    };
    let params = params_for_next(constants, chain, parent.as_ref())?;
    let height = parent.as_ref().map_or(0, |record| record.height + 1);
    let weight = match &parent {
        Some(record) => record.weight + u128::from(params.difficulty),
        None => 0,
    };
    let source = &unfinished.reward_chain_block;
    let reward_chain_block = RewardChainBlock {
        weight,
        height,
        total_iters: source.total_iters,
        signage_point_index: source.signage_point_index,
        pos_ss_cc_challenge_hash: source.pos_ss_cc_challenge_hash,
        proof_of_space: source.proof_of_space.clone(),
        challenge_chain_sp_vdf: source.challenge_chain_sp_vdf,
        challenge_chain_sp_signature: source.challenge_chain_sp_signature,
        challenge_chain_ip_vdf: infusion.challenge_chain_ip_vdf,
        reward_chain_sp_vdf: source.reward_chain_sp_vdf,
        reward_chain_sp_signature: source.reward_chain_sp_signature,
        reward_chain_ip_vdf: infusion.reward_chain_ip_vdf,
        infused_challenge_chain_ip_vdf: infusion.infused_challenge_chain_ip_vdf,
        is_transaction_block: unfinished.transactions_info.is_some(),
    };
    Ok(FullBlock {
        finished_sub_slots: unfinished.finished_sub_slots.clone(),
        reward_chain_block,
        challenge_chain_sp_proof: unfinished.challenge_chain_sp_proof.clone(),
        challenge_chain_ip_proof: infusion.challenge_chain_ip_proof.clone(),
        reward_chain_sp_proof: unfinished.reward_chain_sp_proof.clone(),
        reward_chain_ip_proof: infusion.reward_chain_ip_proof.clone(),
        infused_challenge_chain_ip_proof: infusion.infused_challenge_chain_ip_proof.clone(),
        foliage: unfinished.foliage.clone(),
        foliage_transaction_block: unfinished.foliage_transaction_block,
        transactions_info: unfinished.transactions_info.clone(),
        transactions_generator: unfinished.transactions_generator.clone(),
        transactions_generator_ref_list: unfinished.transactions_generator_ref_list.clone(),
    })
}
