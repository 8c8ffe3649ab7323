use crate::coin_store::BlockCoinDiff;
use crate::verifiers::Verifiers;
use blst::min_pk::PublicKey;
use evg_core::blockchain::block_record::BlockRecord;
use evg_core::blockchain::coin::Coin;
use evg_core::blockchain::coin_record::CoinRecord;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::proof_of_space::{
    calculate_pos_challenge, calculate_prefix_bits, passes_plot_filter,
};
use evg_core::blockchain::sized_bytes::{Bytes32, Bytes96};
use evg_core::blockchain::sub_epoch_summary::SubEpochSummary;
use evg_core::bls::{aggregate_verify_signature, verify_signature};
use evg_core::consensus::block_rewards::{calculate_base_farmer_reward, calculate_pool_reward};
use evg_core::consensus::coinbase::{create_farmer_coin, create_pool_coin};
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::consensus::difficulty::{
    finishes_epoch, finishes_sub_epoch, next_difficulty, next_sub_slot_iters,
};
use evg_core::consensus::pot_iterations::{
    calculate_ip_iters, calculate_iterations_quality, calculate_sp_iters, is_overflow_block,
};
use evg_core::errors::{ChainError, ErrorCode, ValidationError};
use evg_serialize::{hash_256, Streamable};
use std::collections::{HashMap, HashSet};

/// Read access to committed block records. Back-references are by hash;
/// implementations never hand out owning handles.
pub trait ChainView {
    fn block_record(&self, hash: &Bytes32) -> Option<BlockRecord>;
}

/// Read access to the unspent-coin set as of the block's parent, on the
/// branch being validated.
pub trait UnspentView {
    fn coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, ChainError>;
}

pub struct ValidatedBlock {
    pub record: BlockRecord,
    pub diff: BlockCoinDiff,
}

fn fail(code: ErrorCode, detail: impl Into<String>) -> ChainError {
    ChainError::Validation(ValidationError::new(code, detail))
}

/// Consensus parameters in force for the incoming block, recomputed at
/// epoch boundaries.
pub struct ExpectedParams {
    pub difficulty: u64,
    pub sub_slot_iters: u64,
    pub sub_epoch_summary: Option<SubEpochSummary>,
}

fn walk_back(
    chain: &dyn ChainView,
    from: &BlockRecord,
    target_height: u32,
) -> Result<BlockRecord, ChainError> {
    let mut cursor = from.clone();
    while cursor.height > target_height {
        cursor = chain.block_record(&cursor.prev_hash).ok_or_else(|| {
            ChainError::Corruption(format!(
                "missing ancestor {} below {}",
                cursor.prev_hash, cursor.height
            ))
        })?;
    }
    if cursor.height != target_height {
        return Err(ChainError::Corruption(format!(
            "ancestor walk from {} skipped height {target_height}",
            from.height
        )));
    }
    Ok(cursor)
}

/// Nearest transaction block at or below `record`, for timestamp anchors.
fn nearest_timestamp(chain: &dyn ChainView, record: &BlockRecord) -> Result<u64, ChainError> {
    if let Some(ts) = record.timestamp {
        return Ok(ts);
    }
    let mut cursor = record.clone();
    loop {
        let Some(prev_hash) = cursor.prev_transaction_block_hash else {
            return Ok(0);
        };
        cursor = chain.block_record(&prev_hash).ok_or_else(|| {
            ChainError::Corruption(format!("missing transaction ancestor {prev_hash}"))
        })?;
        if let Some(ts) = cursor.timestamp {
            return Ok(ts);
        }
    }
}

/// Difficulty of the parent's own era: the difficulty its block consumed.
fn parent_difficulty(
    constants: &ConsensusConstants,
    chain: &dyn ChainView,
    parent: &BlockRecord,
) -> Result<u64, ChainError> {
    if parent.height == 0 {
        return Ok(constants.difficulty_starting);
    }
    let grandparent = chain.block_record(&parent.prev_hash).ok_or_else(|| {
        ChainError::Corruption(format!("missing parent record {}", parent.prev_hash))
    })?;
    let difficulty = parent.weight - grandparent.weight;
    u64::try_from(difficulty)
        .map_err(|_| ChainError::Corruption(format!("difficulty overflow at {}", parent.height)))
}

/// Computes the difficulty, sub-slot iterations and (at sub-epoch
/// boundaries) the expected summary for the block at `parent.height + 1`.
pub fn expected_params(
    constants: &ConsensusConstants,
    chain: &dyn ChainView,
    parent: &BlockRecord,
) -> Result<ExpectedParams, ChainError> {
    let height = parent.height + 1;
    let mut difficulty = parent_difficulty(constants, chain, parent)?;
    let mut sub_slot_iters = parent.sub_slot_iters;

    let mut sub_epoch_summary = None;
    if finishes_sub_epoch(constants, height) {
        let mut new_difficulty = None;
        let mut new_ssi = None;
        if finishes_epoch(constants, height) {
            let epoch_start = walk_back(chain, parent, height - constants.epoch_blocks)?;
            let mut start_anchor = epoch_start.clone();
            start_anchor.timestamp = Some(nearest_timestamp(chain, &epoch_start)?);
            let mut end_anchor = parent.clone();
            end_anchor.timestamp = Some(nearest_timestamp(chain, parent)?);
            let adjusted =
                next_difficulty(constants, &start_anchor, &end_anchor, difficulty);
            let adjusted_ssi =
                next_sub_slot_iters(constants, &start_anchor, &end_anchor, sub_slot_iters);
            difficulty = adjusted;
            sub_slot_iters = adjusted_ssi;
            new_difficulty = Some(adjusted);
            new_ssi = Some(adjusted_ssi);
        }
        // count overflow blocks in the closing sub-epoch
        let sub_epoch_start = walk_back(chain, parent, height - constants.sub_epoch_blocks)?;
        let mut overflow_count = 0u8;
        let mut cursor = parent.clone();
        while cursor.height > sub_epoch_start.height {
            if cursor.overflow {
                overflow_count = overflow_count.saturating_add(1);
            }
            cursor = chain.block_record(&cursor.prev_hash).ok_or_else(|| {
                ChainError::Corruption(format!("missing ancestor {}", cursor.prev_hash))
            })?;
        }
        let prev_hash = previous_summary_hash(constants, chain, parent)?;
        sub_epoch_summary = Some(SubEpochSummary {
            prev_subepoch_summary_hash: prev_hash,
            reward_chain_hash: parent.header_hash,
            num_blocks_overflow: overflow_count,
            new_difficulty,
            new_sub_slot_iters: new_ssi,
        });
    }

    Ok(ExpectedParams {
        difficulty,
        sub_slot_iters,
        sub_epoch_summary,
    })
}

fn previous_summary_hash(
    constants: &ConsensusConstants,
    chain: &dyn ChainView,
    parent: &BlockRecord,
) -> Result<Bytes32, ChainError> {
    let mut cursor = parent.clone();
    loop {
        if let Some(summary) = &cursor.sub_epoch_summary_included {
            return Ok(summary.get_hash());
        }
        if cursor.height == 0 {
            return Ok(constants.genesis_challenge);
        }
        cursor = chain.block_record(&cursor.prev_hash).ok_or_else(|| {
            ChainError::Corruption(format!("missing ancestor {}", cursor.prev_hash))
        })?;
    }
}

/// Root commitment over a set of coin ids: the digest of the sorted,
/// concatenated ids.
pub fn commitment_root(mut ids: Vec<Bytes32>) -> Bytes32 {
    ids.sort();
    let mut buf = Vec::with_capacity(ids.len() * 32);
    for id in ids {
        buf.extend(id.as_slice());
    }
    Bytes32::new(hash_256(buf))
}

/// The reward coins a transaction block at `height` must incorporate:
/// everything from just above the previous transaction block through
/// itself. Genesis incorporates the pre-farm.
pub fn expected_reward_claims(
    constants: &ConsensusConstants,
    chain: &dyn ChainView,
    parent: Option<&BlockRecord>,
    height: u32,
    pool_puzzle_hash: &Bytes32,
    farmer_puzzle_hash: &Bytes32,
    fees: u64,
) -> Result<Vec<Coin>, ChainError> {
    let genesis = &constants.genesis_challenge;
    if height == 0 {
        return Ok(vec![
            create_pool_coin(
                0,
                &constants.genesis_pre_farm_pool_puzzle_hash,
                calculate_pool_reward(0),
                genesis,
            ),
            create_farmer_coin(
                0,
                &constants.genesis_pre_farm_farmer_puzzle_hash,
                calculate_base_farmer_reward(0),
                genesis,
            ),
        ]);
    }
    let parent = parent.expect("non-genesis block must have a parent");
    let prev_tx_height = if parent.is_transaction_block() {
        parent.height
    } else {
        parent.prev_transaction_block_height
    };
    let mut claims = Vec::new();
    for claim_height in (prev_tx_height + 1)..=height {
        let (pool_ph, farmer_ph, farmer_amount) = if claim_height == height {
            (
                *pool_puzzle_hash,
                *farmer_puzzle_hash,
                calculate_base_farmer_reward(claim_height)
                    .checked_add(fees)
                    .ok_or_else(|| fail(ErrorCode::AmountOverflow, "farmer reward overflow"))?,
            )
        } else {
            let record = walk_back(chain, parent, claim_height)?;
            (
                record.pool_puzzle_hash,
                record.farmer_puzzle_hash,
                calculate_base_farmer_reward(claim_height),
            )
        };
        claims.push(create_pool_coin(
            claim_height,
            &pool_ph,
            calculate_pool_reward(claim_height),
            genesis,
        ));
        claims.push(create_farmer_coin(
            claim_height,
            &farmer_ph,
            farmer_amount,
            genesis,
        ));
    }
    Ok(claims)
}

/// Pure block validation: the consensus checks run in a fixed order,
/// stopping at the first failure. Never mutates external state; `now` is
/// the caller's wall clock, passed in so results are reproducible.
pub fn validate_block(
    constants: &ConsensusConstants,
    chain: &dyn ChainView,
    coins: &dyn UnspentView,
    block: &FullBlock,
    verifiers: &Verifiers,
    now: u64,
) -> Result<ValidatedBlock, ChainError> {
    let header_hash = block.header_hash();
    let height = block.height();
    let rc_block = &block.reward_chain_block;

    // 1. Shape and encoding
    let encoded = block.to_bytes();
    if encoded.len() > constants.max_block_size as usize {
        return Err(fail(
            ErrorCode::BlockTooLarge,
            format!("{} bytes", encoded.len()),
        ));
    }
    let reparsed = FullBlock::from_bytes(&encoded)
        .map_err(|e| fail(ErrorCode::InvalidEncoding, e.to_string()))?;
    if &reparsed != block {
        return Err(fail(
            ErrorCode::InvalidEncoding,
            "encoding does not round-trip",
        ));
    }
    if let Some(generator) = &block.transactions_generator {
        if generator.len() > constants.max_generator_size as usize {
            return Err(fail(
                ErrorCode::GeneratorTooLarge,
                format!("{} bytes", generator.len()),
            ));
        }
    }
    if block.transactions_generator_ref_list.len()
        > constants.max_generator_ref_list_size as usize
    {
        return Err(fail(ErrorCode::GeneratorTooLarge, "too many generator refs"));
    }

    // 2. Ancestry
    let parent = if height == 0 {
        if block.prev_header_hash() != constants.genesis_challenge {
            return Err(fail(
                ErrorCode::UnknownPrev,
                "genesis prev must be the genesis challenge",
            ));
        }
        if block.weight() != 0 {
            return Err(fail(ErrorCode::InvalidWeight, "genesis weight must be 0"));
        }
        None
    } else {
        let parent = chain
            .block_record(&block.prev_header_hash())
            .ok_or_else(|| {
                fail(
                    ErrorCode::UnknownPrev,
                    format!("unknown parent {}", block.prev_header_hash()),
                )
            })?;
        if height != parent.height + 1 {
            return Err(fail(
                ErrorCode::InvalidHeight,
                format!("height {height} after parent {}", parent.height),
            ));
        }
        Some(parent)
    };

    let params = match &parent {
        Some(parent) => expected_params(constants, chain, parent)?,
        None => ExpectedParams {
            difficulty: constants.difficulty_starting,
            sub_slot_iters: constants.sub_slot_iters_starting,
            sub_epoch_summary: None,
        },
    };
    if let Some(parent) = &parent {
        let expected_weight = parent.weight + u128::from(params.difficulty);
        if block.weight() != expected_weight {
            return Err(fail(
                ErrorCode::InvalidWeight,
                format!("weight {} != {expected_weight}", block.weight()),
            ));
        }
    }

    // 3. Signage point and sub-slot consistency
    let sp_index = rc_block.signage_point_index;
    if u32::from(sp_index) >= constants.num_sps_sub_slot {
        return Err(fail(ErrorCode::InvalidSpIndex, format!("index {sp_index}")));
    }
    let overflow = is_overflow_block(constants, sp_index).map_err(ChainError::Validation)?;
    let mut expected_challenge = match &parent {
        Some(parent) => parent.cc_challenge,
        None => constants.genesis_challenge,
    };
    for sub_slot in &block.finished_sub_slots {
        let cc = &sub_slot.challenge_chain;
        if cc.challenge_chain_end_of_slot_vdf.challenge != expected_challenge {
            return Err(fail(
                ErrorCode::InvalidSubSlotChallenge,
                format!(
                    "sub slot challenge {} != {expected_challenge}",
                    cc.challenge_chain_end_of_slot_vdf.challenge
                ),
            ));
        }
        if !verifiers.vdf.validate_vdf(
            &cc.challenge_chain_end_of_slot_vdf,
            &sub_slot.proofs.challenge_chain_slot_proof,
        ) {
            return Err(fail(ErrorCode::InvalidVdf, "challenge chain slot vdf"));
        }
        if !verifiers.vdf.validate_vdf(
            &sub_slot.reward_chain.end_of_slot_vdf,
            &sub_slot.proofs.reward_chain_slot_proof,
        ) {
            return Err(fail(ErrorCode::InvalidVdf, "reward chain slot vdf"));
        }
        match (
            &sub_slot.infused_challenge_chain,
            &sub_slot.proofs.infused_challenge_chain_slot_proof,
        ) {
            (Some(infused), Some(proof)) => {
                if !verifiers
                    .vdf
                    .validate_vdf(&infused.infused_challenge_chain_end_of_slot_vdf, proof)
                {
                    return Err(fail(ErrorCode::InvalidVdf, "infused challenge chain vdf"));
                }
            }
            (None, None) => {}
            _ => {
                return Err(fail(
                    ErrorCode::InvalidVdf,
                    "infused challenge chain and its proof must come together",
                ))
            }
        }
        expected_challenge = cc.get_hash();
    }
    if rc_block.pos_ss_cc_challenge_hash != expected_challenge {
        return Err(fail(
            ErrorCode::InvalidSubSlotChallenge,
            format!(
                "pos challenge {} != {expected_challenge}",
                rc_block.pos_ss_cc_challenge_hash
            ),
        ));
    }

    let cc_sp_hash = match (&rc_block.challenge_chain_sp_vdf, sp_index) {
        (None, 0) => rc_block.pos_ss_cc_challenge_hash,
        (Some(vdf), index) if index > 0 => {
            if vdf.challenge != rc_block.pos_ss_cc_challenge_hash {
                return Err(fail(
                    ErrorCode::InvalidSignagePointVdf,
                    "signage point vdf challenge mismatch",
                ));
            }
            let expected_iters =
                calculate_sp_iters(constants, params.sub_slot_iters, index)
                    .map_err(ChainError::Validation)?;
            if vdf.number_of_iterations != expected_iters {
                return Err(fail(
                    ErrorCode::InvalidSignagePointVdf,
                    format!(
                        "signage point iterations {} != {expected_iters}",
                        vdf.number_of_iterations
                    ),
                ));
            }
            let proof = block.challenge_chain_sp_proof.as_ref().ok_or_else(|| {
                fail(ErrorCode::InvalidSignagePointVdf, "missing sp proof")
            })?;
            if !verifiers.vdf.validate_vdf(vdf, proof) {
                return Err(fail(ErrorCode::InvalidSignagePointVdf, "sp vdf invalid"));
            }
            vdf.output.get_hash()
        }
        _ => {
            return Err(fail(
                ErrorCode::InvalidSignagePointVdf,
                "signage point vdf must be present iff index > 0",
            ))
        }
    };

    // 4. Proof of space
    let pos = &rc_block.proof_of_space;
    if pos.size < constants.min_plot_size || pos.size > constants.max_plot_size {
        return Err(fail(
            ErrorCode::PlotSizeOutOfRange,
            format!("k={}", pos.size),
        ));
    }
    let plot_id = pos
        .get_plot_id()
        .ok_or_else(|| fail(ErrorCode::InvalidProofOfSpace, "undefined plot id"))?;
    let pos_challenge = calculate_pos_challenge(
        &plot_id,
        &rc_block.pos_ss_cc_challenge_hash,
        &cc_sp_hash,
    );
    if pos.challenge != pos_challenge {
        return Err(fail(
            ErrorCode::InvalidProofOfSpace,
            "challenge does not match signage point",
        ));
    }
    let prefix_bits = calculate_prefix_bits(constants, height);
    if !passes_plot_filter(
        prefix_bits,
        &plot_id,
        &rc_block.pos_ss_cc_challenge_hash,
        &cc_sp_hash,
    ) {
        return Err(fail(ErrorCode::PlotFilterFailed, format!("plot {plot_id}")));
    }
    let quality = verifiers
        .pos
        .validate_proof(pos, &plot_id, &pos_challenge)
        .ok_or_else(|| fail(ErrorCode::InvalidProofOfSpace, "proof rejected"))?;
    let required_iters = calculate_iterations_quality(
        constants.difficulty_constant_factor,
        quality,
        pos.size,
        params.difficulty,
        cc_sp_hash,
    );
    let ip_iters = calculate_ip_iters(
        constants,
        params.sub_slot_iters,
        sp_index,
        required_iters,
    )
    .map_err(ChainError::Validation)?;

    // 5. Infusion point VDFs
    let cc_ip = &rc_block.challenge_chain_ip_vdf;
    if cc_ip.challenge != rc_block.pos_ss_cc_challenge_hash {
        return Err(fail(ErrorCode::InvalidVdf, "ip vdf challenge mismatch"));
    }
    if cc_ip.number_of_iterations != ip_iters {
        return Err(fail(
            ErrorCode::InvalidVdf,
            format!(
                "ip iterations {} != {ip_iters}",
                cc_ip.number_of_iterations
            ),
        ));
    }
    if !verifiers
        .vdf
        .validate_vdf(cc_ip, &block.challenge_chain_ip_proof)
    {
        return Err(fail(ErrorCode::InvalidVdf, "challenge chain ip vdf"));
    }
    if !verifiers
        .vdf
        .validate_vdf(&rc_block.reward_chain_ip_vdf, &block.reward_chain_ip_proof)
    {
        return Err(fail(ErrorCode::InvalidVdf, "reward chain ip vdf"));
    }
    match (
        &rc_block.infused_challenge_chain_ip_vdf,
        &block.infused_challenge_chain_ip_proof,
    ) {
        (Some(vdf), Some(proof)) => {
            if !verifiers.vdf.validate_vdf(vdf, proof) {
                return Err(fail(ErrorCode::InvalidVdf, "infused ip vdf"));
            }
        }
        (None, None) => {}
        _ => {
            return Err(fail(
                ErrorCode::InvalidVdf,
                "infused ip vdf and proof must come together",
            ))
        }
    }
    let slot_count = block.finished_sub_slots.len() as u128;
    let expected_total_iters = match &parent {
        Some(parent) => {
            let slot_start = parent.total_iters - u128::from(parent.ip_iters);
            if slot_count == 0 && ip_iters <= parent.ip_iters {
                return Err(fail(
                    ErrorCode::InvalidTotalIters,
                    "infusion must advance within the sub slot",
                ));
            }
            slot_start + slot_count * u128::from(params.sub_slot_iters) + u128::from(ip_iters)
        }
        None => slot_count * u128::from(params.sub_slot_iters) + u128::from(ip_iters),
    };
    if block.total_iters() != expected_total_iters {
        return Err(fail(
            ErrorCode::InvalidTotalIters,
            format!("{} != {expected_total_iters}", block.total_iters()),
        ));
    }

    // 6. Foliage
    // the farmer signs before infusion, so the foliage commits to the
    // unfinished form of the reward chain block
    let foliage = &block.foliage;
    if foliage.reward_block_hash != rc_block.get_unfinished().get_hash() {
        return Err(fail(ErrorCode::InvalidRewardBlockHash, "foliage link"));
    }
    let plot_key = PublicKey::try_from(&pos.plot_public_key)
        .map_err(|e| fail(ErrorCode::InvalidFoliageSignature, e.to_string()))?;
    let data_signature = (&foliage.foliage_block_data_signature)
        .try_into()
        .map_err(|e: std::io::Error| fail(ErrorCode::InvalidFoliageSignature, e.to_string()))?;
    if !verify_signature(
        &plot_key,
        foliage.foliage_block_data.get_hash().as_slice(),
        &data_signature,
    ) {
        return Err(fail(
            ErrorCode::InvalidFoliageSignature,
            "foliage block data signature",
        ));
    }
    let pool_target = &foliage.foliage_block_data.pool_target;
    if pool_target.max_height != 0 && pool_target.max_height < height {
        return Err(fail(ErrorCode::InvalidPoolTarget, "pool target expired"));
    }
    match (&pos.pool_public_key, &foliage.foliage_block_data.pool_signature) {
        (Some(pool_key_bytes), Some(pool_signature)) => {
            let pool_key = PublicKey::try_from(pool_key_bytes)
                .map_err(|e| fail(ErrorCode::InvalidPoolSignature, e.to_string()))?;
            let pool_signature = pool_signature
                .try_into()
                .map_err(|e: std::io::Error| fail(ErrorCode::InvalidPoolSignature, e.to_string()))?;
            if !verify_signature(
                &pool_key,
                pool_target.to_bytes().as_slice(),
                &pool_signature,
            ) {
                return Err(fail(ErrorCode::InvalidPoolSignature, "pool signature"));
            }
        }
        (None, None) => {}
        _ => {
            return Err(fail(
                ErrorCode::InvalidPoolSignature,
                "pool signature must be present iff a pool key is used",
            ))
        }
    }
    if foliage.foliage_block_data.farmer_reward_puzzle_hash.is_null() {
        return Err(fail(
            ErrorCode::InvalidRewardPuzzleHash,
            "null farmer reward puzzle hash",
        ));
    }

    if rc_block.is_transaction_block != block.is_transaction_block()
        || block.is_transaction_block() != block.transactions_info.is_some()
    {
        return Err(fail(
            ErrorCode::InvalidEncoding,
            "transaction block flags disagree",
        ));
    }

    let mut timestamp = None;
    if let Some(ftb) = &block.foliage_transaction_block {
        match &foliage.foliage_transaction_block_hash {
            Some(hash) if *hash == ftb.get_hash() => {}
            _ => {
                return Err(fail(
                    ErrorCode::InvalidEncoding,
                    "foliage transaction block hash mismatch",
                ))
            }
        }
        let ftb_signature: &Bytes96 = foliage
            .foliage_transaction_block_signature
            .as_ref()
            .ok_or_else(|| {
                fail(
                    ErrorCode::InvalidFoliageSignature,
                    "missing transaction block signature",
                )
            })?;
        let ftb_signature = ftb_signature
            .try_into()
            .map_err(|e: std::io::Error| fail(ErrorCode::InvalidFoliageSignature, e.to_string()))?;
        if !verify_signature(&plot_key, ftb.get_hash().as_slice(), &ftb_signature) {
            return Err(fail(
                ErrorCode::InvalidFoliageSignature,
                "transaction block signature",
            ));
        }
        let info = block
            .transactions_info
            .as_ref()
            .expect("flag equality checked above");
        if ftb.transactions_info_hash != info.get_hash() {
            return Err(fail(
                ErrorCode::InvalidTransactionsInfoHash,
                "transactions info hash mismatch",
            ));
        }
        // timestamp window
        if let Some(parent) = &parent {
            let expected_prev_tx = if parent.is_transaction_block() {
                parent.header_hash
            } else {
                parent
                    .prev_transaction_block_hash
                    .unwrap_or(constants.genesis_challenge)
            };
            if ftb.prev_transaction_block_hash != expected_prev_tx {
                return Err(fail(
                    ErrorCode::InvalidPrevTransactionBlockHash,
                    "previous transaction block link",
                ));
            }
            let mut recent = Vec::new();
            let mut cursor = Some(parent.clone());
            while recent.len() < constants.number_of_timestamps as usize {
                let Some(record) = cursor else { break };
                if let Some(ts) = record.timestamp {
                    recent.push(ts);
                }
                cursor = record
                    .prev_transaction_block_hash
                    .and_then(|hash| chain.block_record(&hash));
                if !record.is_transaction_block() && record.prev_transaction_block_hash.is_none()
                {
                    break;
                }
            }
            if !recent.is_empty() {
                recent.sort_unstable();
                let median = recent[recent.len() / 2];
                if ftb.timestamp <= median {
                    return Err(fail(
                        ErrorCode::TimestampTooFarInPast,
                        format!("{} <= median {median}", ftb.timestamp),
                    ));
                }
            }
        } else if ftb.prev_transaction_block_hash != constants.genesis_challenge {
            return Err(fail(
                ErrorCode::InvalidPrevTransactionBlockHash,
                "genesis previous transaction block link",
            ));
        }
        if ftb.timestamp > now + constants.max_future_time {
            return Err(fail(
                ErrorCode::TimestampTooFarInFuture,
                format!("{} > {}", ftb.timestamp, now + constants.max_future_time),
            ));
        }
        timestamp = Some(ftb.timestamp);
    }

    // 7. Transactions body
    let mut diff = BlockCoinDiff::default();
    let mut fees = None;
    let mut reward_claims = None;
    if let Some(info) = &block.transactions_info {
        let ftb = block
            .foliage_transaction_block
            .as_ref()
            .expect("flag equality checked above");
        let expected_generator_root = match &block.transactions_generator {
            Some(generator) => generator.hash(),
            None => Bytes32::default(),
        };
        if info.generator_root != expected_generator_root {
            return Err(fail(ErrorCode::InvalidEncoding, "generator root mismatch"));
        }

        let output = match &block.transactions_generator {
            Some(generator) => {
                let byte_cost = generator.len() as u64 * constants.cost_per_byte;
                if byte_cost >= constants.max_block_cost {
                    return Err(fail(ErrorCode::CostTooHigh, "generator byte cost"));
                }
                let mut output = verifiers
                    .program_runner
                    .run_block_program(
                        generator,
                        &[],
                        constants.max_block_cost - byte_cost,
                        height,
                    )
                    .map_err(ChainError::Validation)?;
                output.cost = output
                    .cost
                    .checked_add(byte_cost)
                    .ok_or_else(|| fail(ErrorCode::AmountOverflow, "cost overflow"))?;
                output
            }
            None => Default::default(),
        };
        if output.cost > constants.max_block_cost {
            return Err(fail(
                ErrorCode::CostTooHigh,
                format!("{} > {}", output.cost, constants.max_block_cost),
            ));
        }
        if info.cost != output.cost {
            return Err(fail(
                ErrorCode::InvalidCost,
                format!("declared {} computed {}", info.cost, output.cost),
            ));
        }

        // removals and additions against the parent's unspent set
        let additions = output.additions();
        let mut addition_ids: HashMap<Bytes32, Coin> = HashMap::new();
        for coin in &additions {
            if coin.amount > constants.max_coin_amount {
                return Err(fail(
                    ErrorCode::CoinAmountExceedsMax,
                    format!("{}", coin.amount),
                ));
            }
            if addition_ids.insert(coin.coin_id(), *coin).is_some() {
                return Err(fail(
                    ErrorCode::DuplicateAddition,
                    format!("{}", coin.coin_id()),
                ));
            }
            if let Some(existing) = coins.coin_record(&coin.coin_id())? {
                if !existing.is_spent() {
                    return Err(fail(
                        ErrorCode::DuplicateAddition,
                        format!("{} already exists unspent", coin.coin_id()),
                    ));
                }
            }
        }
        let mut removal_amount: u128 = 0;
        let mut seen_removals = HashSet::new();
        for spend in &output.spends {
            if !seen_removals.insert(spend.coin_id) {
                return Err(fail(ErrorCode::DoubleSpend, format!("{}", spend.coin_id)));
            }
            let removed_coin = match coins.coin_record(&spend.coin_id)? {
                Some(record) => {
                    if record.is_spent() {
                        return Err(fail(
                            ErrorCode::DoubleSpend,
                            format!("{} spent at {}", spend.coin_id, record.spent_height),
                        ));
                    }
                    record.coin
                }
                // ephemeral: created and spent in the same block
                None => *addition_ids.get(&spend.coin_id).ok_or_else(|| {
                    fail(ErrorCode::UnknownUnspent, format!("{}", spend.coin_id))
                })?,
            };
            if spend.puzzle_hash != removed_coin.puzzle_hash {
                return Err(fail(
                    ErrorCode::WrongPuzzleHash,
                    format!("{}", spend.coin_id),
                ));
            }
            if let Some(assert_height) = spend.assert_height_absolute {
                if height <= assert_height {
                    return Err(fail(
                        ErrorCode::AssertHeightFailed,
                        format!("requires height > {assert_height}"),
                    ));
                }
            }
            if let Some(before) = spend.assert_before_height_absolute {
                if height >= before {
                    return Err(fail(
                        ErrorCode::AssertBeforeHeightFailed,
                        format!("requires height < {before}"),
                    ));
                }
            }
            removal_amount += u128::from(removed_coin.amount);
        }
        let addition_amount = output.addition_amount();
        if addition_amount > removal_amount {
            return Err(fail(ErrorCode::AmountOverflow, "spends mint value"));
        }
        let computed_fees = removal_amount - addition_amount;
        let computed_fees = u64::try_from(computed_fees)
            .map_err(|_| fail(ErrorCode::InvalidFeeAmount, "fee overflow"))?;
        if info.fees != computed_fees {
            return Err(fail(
                ErrorCode::InvalidFeeAmount,
                format!("declared {} computed {computed_fees}", info.fees),
            ));
        }

        // reward claims
        let expected_claims = expected_reward_claims(
            constants,
            chain,
            parent.as_ref(),
            height,
            &pool_target.puzzle_hash,
            &foliage.foliage_block_data.farmer_reward_puzzle_hash,
            computed_fees,
        )?;
        let mut declared: Vec<Bytes32> =
            info.reward_claims_incorporated.iter().map(Coin::coin_id).collect();
        let mut expected_ids: Vec<Bytes32> =
            expected_claims.iter().map(Coin::coin_id).collect();
        declared.sort();
        expected_ids.sort();
        if declared != expected_ids {
            return Err(fail(ErrorCode::InvalidRewardClaims, "reward claim set"));
        }

        // aggregate signature over salted messages
        let mut pairs = Vec::new();
        for spend in &output.spends {
            for (public_key, msg) in &spend.agg_sig_pairs {
                let mut salted = Vec::with_capacity(msg.len() + 64);
                salted.extend(msg);
                salted.extend(spend.coin_id.as_slice());
                salted.extend(constants.agg_sig_me_additional_data.as_slice());
                pairs.push((*public_key, salted));
            }
        }
        let signature_ok = aggregate_verify_signature(&pairs, &info.aggregated_signature)
            .map_err(|e| fail(ErrorCode::BadAggregateSignature, e.to_string()))?;
        if !signature_ok {
            return Err(fail(
                ErrorCode::BadAggregateSignature,
                "aggregate signature",
            ));
        }

        // roots commit to the final coin set of the block
        let mut all_addition_ids: Vec<Bytes32> = additions.iter().map(Coin::coin_id).collect();
        all_addition_ids.extend(expected_claims.iter().map(Coin::coin_id));
        if ftb.additions_root != commitment_root(all_addition_ids) {
            return Err(fail(ErrorCode::InvalidAdditionsRoot, "additions root"));
        }
        if ftb.removals_root != commitment_root(output.removal_ids()) {
            return Err(fail(ErrorCode::InvalidRemovalsRoot, "removals root"));
        }

        diff = BlockCoinDiff {
            height,
            timestamp: ftb.timestamp,
            additions: expected_claims
                .iter()
                .map(|coin| (*coin, true))
                .chain(additions.iter().map(|coin| (*coin, false)))
                .collect(),
            removal_ids: output.removal_ids(),
        };
        fees = Some(info.fees);
        reward_claims = Some(info.reward_claims_incorporated.clone());
    }

    // 8. Sub-epoch boundary consistency
    if let Some(expected_summary) = &params.sub_epoch_summary {
        if let Some(first_slot) = block.finished_sub_slots.first() {
            let cc = &first_slot.challenge_chain;
            if let Some(declared) = &cc.subepoch_summary_hash {
                if *declared != expected_summary.get_hash() {
                    return Err(fail(
                        ErrorCode::InvalidSubEpochSummary,
                        "declared summary hash",
                    ));
                }
            }
            if cc.new_difficulty.is_some()
                && cc.new_difficulty != expected_summary.new_difficulty
            {
                return Err(fail(ErrorCode::InvalidNewDifficulty, "declared difficulty"));
            }
            if cc.new_sub_slot_iters.is_some()
                && cc.new_sub_slot_iters != expected_summary.new_sub_slot_iters
            {
                return Err(fail(
                    ErrorCode::InvalidNewSubSlotIters,
                    "declared sub slot iters",
                ));
            }
        }
    }

    let (prev_tx_hash, prev_tx_height) = match &parent {
        Some(parent) => {
            if parent.is_transaction_block() {
                (Some(parent.header_hash), parent.height)
            } else {
                (
                    parent.prev_transaction_block_hash,
                    parent.prev_transaction_block_height,
                )
            }
        }
        None => (None, 0),
    };

    let record = BlockRecord {
        header_hash,
        prev_hash: block.prev_header_hash(),
        height,
        weight: block.weight(),
        total_iters: block.total_iters(),
        signage_point_index: sp_index,
        cc_challenge: rc_block.pos_ss_cc_challenge_hash,
        sub_slot_iters: params.sub_slot_iters,
        required_iters,
        ip_iters,
        overflow,
        pool_puzzle_hash: pool_target.puzzle_hash,
        farmer_puzzle_hash: foliage.foliage_block_data.farmer_reward_puzzle_hash,
        prev_transaction_block_hash: prev_tx_hash,
        prev_transaction_block_height: prev_tx_height,
        timestamp,
        fees,
        reward_claims_incorporated: reward_claims,
        sub_epoch_summary_included: params.sub_epoch_summary,
    };

    Ok(ValidatedBlock { record, diff })
}
