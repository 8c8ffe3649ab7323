use crate::blockchain::sized_bytes::Bytes32;
use crate::consensus::constants::ConsensusConstants;
use crate::errors::{ErrorCode, ValidationError};
use evg_serialize::hash_256;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::cmp::max;

/// Overflow blocks have their signage point in the previous sub-slot.
pub fn is_overflow_block(
    constants: &ConsensusConstants,
    signage_point_index: u8,
) -> Result<bool, ValidationError> {
    if u32::from(signage_point_index) >= constants.num_sps_sub_slot {
        return Err(ValidationError::new(
            ErrorCode::InvalidSpIndex,
            format!("signage point index {signage_point_index} too high"),
        ));
    }
    Ok(u64::from(signage_point_index)
        >= u64::from(constants.num_sps_sub_slot) - u64::from(constants.num_sp_intervals_extra))
}

pub fn calculate_sp_interval_iters(
    constants: &ConsensusConstants,
    sub_slot_iters: u64,
) -> Result<u64, ValidationError> {
    if sub_slot_iters % u64::from(constants.num_sps_sub_slot) != 0 {
        return Err(ValidationError::new(
            ErrorCode::InvalidSubSlotIters,
            format!("sub slot iters {sub_slot_iters} not divisible by signage point count"),
        ));
    }
    Ok(sub_slot_iters / u64::from(constants.num_sps_sub_slot))
}

pub fn calculate_sp_iters(
    constants: &ConsensusConstants,
    sub_slot_iters: u64,
    signage_point_index: u8,
) -> Result<u64, ValidationError> {
    if u32::from(signage_point_index) >= constants.num_sps_sub_slot {
        return Err(ValidationError::new(
            ErrorCode::InvalidSpIndex,
            format!("signage point index {signage_point_index} too high"),
        ));
    }
    Ok(calculate_sp_interval_iters(constants, sub_slot_iters)? * u64::from(signage_point_index))
}

/// Iterations from the sub-slot start to the infusion point: the signage
/// point, plus the fixed gap, plus the proof-dependent `required_iters`,
/// wrapping for overflow blocks.
pub fn calculate_ip_iters(
    constants: &ConsensusConstants,
    sub_slot_iters: u64,
    signage_point_index: u8,
    required_iters: u64,
) -> Result<u64, ValidationError> {
    let sp_iters = calculate_sp_iters(constants, sub_slot_iters, signage_point_index)?;
    let sp_interval_iters = calculate_sp_interval_iters(constants, sub_slot_iters)?;
    if required_iters == 0 || required_iters >= sp_interval_iters {
        return Err(ValidationError::new(
            ErrorCode::RequiredItersTooHigh,
            format!(
                "required iters {required_iters} not in (0, {sp_interval_iters})"
            ),
        ));
    }
    Ok(
        (sp_iters + u64::from(constants.num_sp_intervals_extra) * sp_interval_iters
            + required_iters)
            % sub_slot_iters,
    )
}

#[must_use]
pub fn expected_plot_size(k: u8) -> u64 {
    ((2 * u64::from(k)) + 1) * 2u64.pow(u32::from(k) - 1)
}

/// Converts a proof-of-space quality into the number of iterations the
/// farmer must wait before infusion. Lower is better; the distribution is
/// weighted by difficulty and plot size.
#[must_use]
pub fn calculate_iterations_quality(
    difficulty_constant_factor: u128,
    quality_string: Bytes32,
    size: u8,
    difficulty: u64,
    cc_sp_output_hash: Bytes32,
) -> u64 {
    let mut to_hash = Vec::with_capacity(64);
    to_hash.extend(quality_string);
    to_hash.extend(cc_sp_output_hash);
    let quality_int = BigUint::from_bytes_be(&hash_256(to_hash));
    let top = BigUint::from(difficulty)
        * BigUint::from(difficulty_constant_factor)
        * quality_int;
    let bottom = (BigUint::from(1u8) << 256u32) * expected_plot_size(size);
    let iters: BigUint = top / bottom;
    max(1, iters.to_u64().unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::constants::MAINNET;

    #[test]
    fn test_overflow_blocks() {
        assert!(!is_overflow_block(&MAINNET, 27).unwrap());
        assert!(!is_overflow_block(&MAINNET, 60).unwrap());
        assert!(is_overflow_block(&MAINNET, 61).unwrap());
        assert!(is_overflow_block(&MAINNET, 62).unwrap());
        assert!(is_overflow_block(&MAINNET, 63).unwrap());
        assert!(is_overflow_block(&MAINNET, 64).is_err());
    }

    #[test]
    fn test_calculate_sp_iters() {
        let ssi: u64 = 100_001 * 64 * 4;
        assert!(calculate_sp_iters(&MAINNET, ssi, 64).is_err());
        calculate_sp_iters(&MAINNET, ssi, 63).unwrap();
    }

    #[test]
    fn test_calculate_ip_iters() {
        let ssi: u64 = 100_001 * 64 * 4;
        let sp_interval_iters = ssi / u64::from(MAINNET.num_sps_sub_slot);

        // invalid signage point index
        assert!(calculate_ip_iters(&MAINNET, ssi, 123, 100_000).is_err());
        // required iters out of range
        assert!(calculate_ip_iters(&MAINNET, ssi, 13, sp_interval_iters).is_err());
        assert!(calculate_ip_iters(&MAINNET, ssi, 13, sp_interval_iters * 12).is_err());
        assert!(calculate_ip_iters(&MAINNET, ssi, 13, 0).is_err());

        let sp_iters = sp_interval_iters * 13;
        let ip_iters =
            calculate_ip_iters(&MAINNET, ssi, 13, sp_interval_iters - 1).unwrap();
        assert_eq!(
            ip_iters,
            sp_iters
                + u64::from(MAINNET.num_sp_intervals_extra) * sp_interval_iters
                + sp_interval_iters
                - 1
        );

        // overflow wraps around the sub slot
        let ip_iters = calculate_ip_iters(&MAINNET, ssi, 63, sp_interval_iters - 1).unwrap();
        assert_eq!(
            ip_iters,
            (sp_interval_iters * 63
                + u64::from(MAINNET.num_sp_intervals_extra) * sp_interval_iters
                + sp_interval_iters
                - 1)
                % ssi
        );
    }

    #[test]
    fn test_expected_plot_size_grows() {
        assert!(expected_plot_size(33) > expected_plot_size(32));
    }

    #[test]
    fn test_iterations_quality_scales_with_difficulty() {
        let quality = Bytes32::new([5u8; 32]);
        let sp_hash = Bytes32::new([6u8; 32]);
        let low = calculate_iterations_quality(2u128.pow(67), quality, 32, 100, sp_hash);
        let high = calculate_iterations_quality(2u128.pow(67), quality, 32, 10_000, sp_hash);
        assert!(high >= low);
        assert!(low >= 1);
    }
}
