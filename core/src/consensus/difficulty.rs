use crate::blockchain::block_record::BlockRecord;
use crate::consensus::constants::ConsensusConstants;

/// True at heights where a sub-epoch ends and the next block must embed a
/// sub-epoch summary.
pub fn finishes_sub_epoch(constants: &ConsensusConstants, height: u32) -> bool {
    height > 0 && height % constants.sub_epoch_blocks == 0
}

/// True at heights where difficulty and sub-slot iterations are recomputed.
pub fn finishes_epoch(constants: &ConsensusConstants, height: u32) -> bool {
    height > 0 && height % constants.epoch_blocks == 0
}

/// Keeps only the top `significant_bits` bits of `value`, zeroing the rest.
/// Both adjusted parameters are truncated this way so all nodes agree on
/// the post-adjustment values regardless of intermediate precision.
pub fn truncate_to_significant_bits(value: u128, significant_bits: u32) -> u128 {
    if value == 0 {
        return 0;
    }
    let bits = 128 - value.leading_zeros();
    if bits <= significant_bits {
        return value;
    }
    let shift = bits - significant_bits;
    (value >> shift) << shift
}

fn clamp_factor(new: u128, old: u128, max_factor: u128) -> u128 {
    let low = (old / max_factor).max(1);
    let high = old.saturating_mul(max_factor);
    new.clamp(low, high)
}

/// Recomputes the difficulty for the next epoch from the observed duration
/// of the previous one. Faster-than-target epochs raise difficulty, capped
/// at `difficulty_change_max_factor` per epoch.
pub fn next_difficulty(
    constants: &ConsensusConstants,
    epoch_start: &BlockRecord,
    epoch_end: &BlockRecord,
    current_difficulty: u64,
) -> u64 {
    let target_seconds = u128::from(constants.epoch_blocks)
        * u128::from(constants.sub_slot_time_target)
        / u128::from(constants.slot_blocks_target);
    let actual_seconds = epoch_duration_seconds(epoch_start, epoch_end);
    let raw = u128::from(current_difficulty) * target_seconds / actual_seconds;
    let clamped = clamp_factor(
        raw.max(1),
        u128::from(current_difficulty),
        u128::from(constants.difficulty_change_max_factor),
    );
    truncate_to_significant_bits(clamped, constants.significant_bits).max(1) as u64
}

/// Recomputes sub-slot iterations so a sub-slot keeps taking
/// `sub_slot_time_target` seconds at the observed VDF speed. The result is
/// kept a multiple of the signage point count so signage point intervals
/// stay whole.
pub fn next_sub_slot_iters(
    constants: &ConsensusConstants,
    epoch_start: &BlockRecord,
    epoch_end: &BlockRecord,
    current_ssi: u64,
) -> u64 {
    let actual_seconds = epoch_duration_seconds(epoch_start, epoch_end);
    let iters_delta = epoch_end.total_iters.saturating_sub(epoch_start.total_iters);
    let raw = iters_delta * u128::from(constants.sub_slot_time_target) / actual_seconds;
    let clamped = clamp_factor(
        raw.max(1),
        u128::from(current_ssi),
        u128::from(constants.difficulty_change_max_factor),
    );
    let truncated = truncate_to_significant_bits(clamped, constants.significant_bits) as u64;
    let interval = truncated / u64::from(constants.num_sps_sub_slot);
    (interval.max(1)) * u64::from(constants.num_sps_sub_slot)
}

fn epoch_duration_seconds(epoch_start: &BlockRecord, epoch_end: &BlockRecord) -> u128 {
    let start = epoch_start.timestamp.unwrap_or(0);
    let end = epoch_end.timestamp.unwrap_or(start + 1);
    u128::from(end.saturating_sub(start)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::sized_bytes::Bytes32;
    use crate::consensus::constants::MAINNET;

    fn record(height: u32, total_iters: u128, timestamp: u64) -> BlockRecord {
        BlockRecord {
            header_hash: Bytes32::default(),
            prev_hash: Bytes32::default(),
            height,
            weight: 0,
            total_iters,
            signage_point_index: 0,
            cc_challenge: Bytes32::default(),
            sub_slot_iters: MAINNET.sub_slot_iters_starting,
            required_iters: 1,
            ip_iters: 0,
            overflow: false,
            pool_puzzle_hash: Bytes32::default(),
            farmer_puzzle_hash: Bytes32::default(),
            prev_transaction_block_hash: None,
            prev_transaction_block_height: 0,
            timestamp: Some(timestamp),
            fees: None,
            reward_claims_incorporated: None,
            sub_epoch_summary_included: None,
        }
    }

    #[test]
    fn test_boundaries() {
        assert!(!finishes_sub_epoch(&MAINNET, 0));
        assert!(!finishes_sub_epoch(&MAINNET, MAINNET.sub_epoch_blocks - 1));
        assert!(finishes_sub_epoch(&MAINNET, MAINNET.sub_epoch_blocks));
        assert!(finishes_epoch(&MAINNET, MAINNET.epoch_blocks));
        assert!(!finishes_epoch(&MAINNET, MAINNET.sub_epoch_blocks));
    }

    #[test]
    fn test_truncate_to_significant_bits() {
        assert_eq!(truncate_to_significant_bits(0b1111_1111, 4), 0b1111_0000);
        assert_eq!(truncate_to_significant_bits(0b101, 8), 0b101);
        assert_eq!(truncate_to_significant_bits(0, 8), 0);
    }

    #[test]
    fn test_fast_epoch_raises_difficulty() {
        // target epoch duration: 4608 blocks / 32 per slot * 600s = 86400s
        let start = record(0, 0, 1_000_000);
        let fast_end = record(MAINNET.epoch_blocks, 1 << 40, 1_000_000 + 43_200);
        let next = next_difficulty(&MAINNET, &start, &fast_end, 1000);
        assert!(next > 1000);

        let slow_end = record(MAINNET.epoch_blocks, 1 << 40, 1_000_000 + 86_400 * 2);
        let next = next_difficulty(&MAINNET, &start, &slow_end, 1000);
        assert!(next < 1000);
    }

    #[test]
    fn test_adjustment_is_clamped() {
        let start = record(0, 0, 1_000_000);
        // an absurdly fast epoch cannot raise difficulty more than the max factor
        let end = record(MAINNET.epoch_blocks, 1 << 40, 1_000_001);
        let next = next_difficulty(&MAINNET, &start, &end, 1024);
        assert!(next <= 1024 * u64::from(MAINNET.difficulty_change_max_factor));
    }

    #[test]
    fn test_ssi_stays_multiple_of_sp_count() {
        let start = record(0, 0, 1_000_000);
        let end = record(
            MAINNET.epoch_blocks,
            u128::from(MAINNET.sub_slot_iters_starting) * 150,
            1_000_000 + 86_400,
        );
        let ssi = next_sub_slot_iters(&MAINNET, &start, &end, MAINNET.sub_slot_iters_starting);
        assert_eq!(ssi % u64::from(MAINNET.num_sps_sub_slot), 0);
        assert!(ssi > 0);
    }
}
