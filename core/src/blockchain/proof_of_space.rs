use crate::blockchain::sized_bytes::{Bytes32, Bytes48};
use crate::consensus::constants::ConsensusConstants;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::max;

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ProofOfSpace {
    pub challenge: Bytes32,
    pub pool_public_key: Option<Bytes48>,
    pub pool_contract_puzzle_hash: Option<Bytes32>,
    pub plot_public_key: Bytes48,
    pub size: u8,
    pub proof: Vec<u8>,
}

impl ProofOfSpace {
    /// Exactly one of pool key / pool contract must be present; both or
    /// neither makes the plot id undefined.
    pub fn get_plot_id(&self) -> Option<Bytes32> {
        match (&self.pool_public_key, &self.pool_contract_puzzle_hash) {
            (Some(_), Some(_)) | (None, None) => None,
            (Some(pool_key), None) => Some(calculate_plot_id_public_key(
                pool_key,
                &self.plot_public_key,
            )),
            (None, Some(contract)) => Some(calculate_plot_id_puzzle_hash(
                contract,
                &self.plot_public_key,
            )),
        }
    }
}

fn hash_pair(left: impl AsRef<[u8]>, right: impl AsRef<[u8]>) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let digest: [u8; 32] = hasher.finalize().into();
    Bytes32::new(digest)
}

pub fn calculate_plot_id_public_key(
    pool_public_key: &Bytes48,
    plot_public_key: &Bytes48,
) -> Bytes32 {
    hash_pair(pool_public_key, plot_public_key)
}

pub fn calculate_plot_id_puzzle_hash(
    pool_contract_puzzle_hash: &Bytes32,
    plot_public_key: &Bytes48,
) -> Bytes32 {
    hash_pair(pool_contract_puzzle_hash, plot_public_key)
}

/// The plot filter loosens over time: each scheduled height halves the
/// number of zero bits a plot must match.
pub fn calculate_prefix_bits(constants: &ConsensusConstants, height: u32) -> i8 {
    let mut prefix_bits = constants.number_zero_bits_plot_filter as i8;
    if height >= constants.plot_filter_32_height {
        prefix_bits -= 4;
    } else if height >= constants.plot_filter_64_height {
        prefix_bits -= 3;
    } else if height >= constants.plot_filter_128_height {
        prefix_bits -= 2;
    } else if height >= constants.hard_fork_height {
        prefix_bits -= 1;
    }
    max(0, prefix_bits)
}

pub fn calculate_plot_filter_input(
    plot_id: &Bytes32,
    challenge_hash: &Bytes32,
    signage_point: &Bytes32,
) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(plot_id);
    hasher.update(challenge_hash);
    hasher.update(signage_point);
    let digest: [u8; 32] = hasher.finalize().into();
    Bytes32::new(digest)
}

pub fn passes_plot_filter(
    prefix_bits: i8,
    plot_id: &Bytes32,
    challenge_hash: &Bytes32,
    signage_point: &Bytes32,
) -> bool {
    if prefix_bits <= 0 {
        return true;
    }
    let input = calculate_plot_filter_input(plot_id, challenge_hash, signage_point);
    let mut checked = 0i8;
    for byte in input.as_slice() {
        for shift in (0..8).rev() {
            if (byte >> shift) & 1 == 1 {
                return false;
            }
            checked += 1;
            if checked == prefix_bits {
                return true;
            }
        }
    }
    true
}

pub fn calculate_pos_challenge(
    plot_id: &Bytes32,
    challenge_hash: &Bytes32,
    signage_point: &Bytes32,
) -> Bytes32 {
    let input = calculate_plot_filter_input(plot_id, challenge_hash, signage_point);
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest: [u8; 32] = hasher.finalize().into();
    Bytes32::new(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::constants::MAINNET;

    #[test]
    fn test_plot_id_requires_exactly_one_source() {
        let pos = ProofOfSpace {
            challenge: Bytes32::default(),
            pool_public_key: None,
            pool_contract_puzzle_hash: None,
            plot_public_key: Bytes48::default(),
            size: 32,
            proof: vec![],
        };
        assert!(pos.get_plot_id().is_none());

        let mut both = pos.clone();
        both.pool_public_key = Some(Bytes48::default());
        both.pool_contract_puzzle_hash = Some(Bytes32::default());
        assert!(both.get_plot_id().is_none());

        let mut pool_key = pos.clone();
        pool_key.pool_public_key = Some(Bytes48::default());
        let mut contract = pos;
        contract.pool_contract_puzzle_hash = Some(Bytes32::default());
        let a = pool_key.get_plot_id().unwrap();
        let b = contract.get_plot_id().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_prefix_bits_always_passes() {
        assert!(passes_plot_filter(
            0,
            &Bytes32::new([0xFF; 32]),
            &Bytes32::new([0xFF; 32]),
            &Bytes32::new([0xFF; 32]),
        ));
    }

    #[test]
    fn test_prefix_bits_schedule_is_monotone() {
        let mut last = i8::MAX;
        for height in [
            0,
            MAINNET.hard_fork_height,
            MAINNET.plot_filter_128_height,
            MAINNET.plot_filter_64_height,
            MAINNET.plot_filter_32_height,
        ] {
            let bits = calculate_prefix_bits(&MAINNET, height);
            assert!(bits <= last);
            assert!(bits >= 0);
            last = bits;
        }
    }
}
