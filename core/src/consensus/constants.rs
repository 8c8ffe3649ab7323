use crate::blockchain::sized_bytes::Bytes32;
use lazy_static::lazy_static;

#[derive(Clone, Debug)]
pub struct ConsensusConstants {
    pub slot_blocks_target: u32, //How many blocks to target per sub-slot
    //Max number of blocks that can be infused into a single sub-slot
    pub max_sub_slot_blocks: u32,
    pub num_sps_sub_slot: u32, //Signage points per sub-slot, including the 0th at the slot start

    pub sub_slot_iters_starting: u64, //The sub_slot_iters for the first epoch
    pub difficulty_constant_factor: u128, //Multiplied by the difficulty to get iterations
    pub difficulty_starting: u64,     //The difficulty for the first epoch
    //The maximum factor by which difficulty and sub_slot_iters can change per epoch
    pub difficulty_change_max_factor: u32,
    pub sub_epoch_blocks: u32, //The number of blocks per sub-epoch
    pub epoch_blocks: u32, //Blocks per epoch; must be a multiple of sub_epoch_blocks

    pub significant_bits: u32, //Bits of precision kept when adjusting difficulty and iterations
    pub number_zero_bits_plot_filter: u8,
    pub min_plot_size: u8,
    pub max_plot_size: u8,
    pub sub_slot_time_target: u64, //Target seconds per sub-slot
    pub num_sp_intervals_extra: u8, //Gap between signage point and infusion point in SP intervals
    pub max_future_time: u64, //Seconds a timestamp may run ahead of the wall clock
    pub number_of_timestamps: u8, //Timestamp must exceed the median of this many prior tx blocks

    //Initial challenge for both chains; overridden per network
    pub genesis_challenge: Bytes32,
    //Distinct per network so signatures cannot be replayed across networks
    pub agg_sig_me_additional_data: Bytes32,
    pub genesis_pre_farm_pool_puzzle_hash: Bytes32,
    pub genesis_pre_farm_farmer_puzzle_hash: Bytes32,
    pub max_vdf_witness_size: u8,
    //Mempool capacity in blocks worth of cost
    pub mempool_block_buffer: u8,
    pub max_coin_amount: u64,
    pub max_block_cost: u64, //Cost limit for one block's generator
    pub cost_per_byte: u64,  //Cost charged per byte of generator program
    pub max_block_size: u32, //Encoded size limit for a full block

    pub weight_proof_threshold: u8,
    pub weight_proof_recent_blocks: u32,
    pub max_block_count_per_requests: u32,
    pub max_generator_size: u32,
    pub max_generator_ref_list_size: u32,

    //Plot filter halving schedule
    pub hard_fork_height: u32,
    pub plot_filter_128_height: u32,
    pub plot_filter_64_height: u32,
    pub plot_filter_32_height: u32,

    pub bech32_prefix: String,
    pub is_testnet: bool,
}

impl Default for ConsensusConstants {
    fn default() -> Self {
        MAINNET.clone()
    }
}

lazy_static! {
    pub static ref MAINNET: ConsensusConstants = ConsensusConstants {
        slot_blocks_target: 32,
        max_sub_slot_blocks: 128,
        num_sps_sub_slot: 64,
        sub_slot_iters_starting: 2u64.pow(27),
        difficulty_constant_factor: 2u128.pow(67),
        difficulty_starting: 7,
        difficulty_change_max_factor: 3,
        sub_epoch_blocks: 384,
        epoch_blocks: 4608,
        significant_bits: 8,
        number_zero_bits_plot_filter: 9,
        min_plot_size: 32,
        max_plot_size: 50,
        sub_slot_time_target: 600,
        num_sp_intervals_extra: 3,
        max_future_time: 5 * 60,
        number_of_timestamps: 11,
        genesis_challenge: Bytes32::new(hex_literal(
            "ccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb"
        )),
        agg_sig_me_additional_data: Bytes32::new(hex_literal(
            "49f4afb189342858dba5c1bb6b50b0deaa706088474f0c5431d65b857d54ddb5"
        )),
        genesis_pre_farm_pool_puzzle_hash: Bytes32::new(hex_literal(
            "d23da14695a188ae5708dd152263c4db883eb27edeb936178d4d988b8f3ce5fc"
        )),
        genesis_pre_farm_farmer_puzzle_hash: Bytes32::new(hex_literal(
            "3d8765d3a597ec1d99663f6c9816d915b9f68613ac94009884c4addaefcce6af"
        )),
        max_vdf_witness_size: 64,
        mempool_block_buffer: 10,
        max_coin_amount: u64::MAX,
        max_block_cost: 11_000_000_000,
        cost_per_byte: 12_000,
        max_block_size: 4 * 1024 * 1024,
        weight_proof_threshold: 2,
        weight_proof_recent_blocks: 1000,
        max_block_count_per_requests: 32,
        max_generator_size: 1_000_000,
        max_generator_ref_list_size: 512,
        hard_fork_height: 5_496_000,
        plot_filter_128_height: 10_542_000,
        plot_filter_64_height: 15_592_000,
        plot_filter_32_height: 20_643_000,
        bech32_prefix: String::from("evg"),
        is_testnet: false,
    };
    pub static ref TESTNET: ConsensusConstants = ConsensusConstants {
        genesis_challenge: Bytes32::new(hex_literal(
            "ae83525ba8d1dd3f09b277de136ee86a5a775e275fd9f1ba52305ecb28eb9e8a"
        )),
        agg_sig_me_additional_data: Bytes32::new(hex_literal(
            "ae83525ba8d1dd3f09b277de136ee86a5a775e275fd9f1ba52305ecb28eb9e8a"
        )),
        difficulty_constant_factor: 10_052_721_566_054,
        min_plot_size: 18,
        mempool_block_buffer: 50,
        bech32_prefix: String::from("tevg"),
        is_testnet: true,
        ..MAINNET.clone()
    };
}

/// Constants for the named network, defaulting to mainnet.
pub fn constants_for_network(name: &str) -> &'static ConsensusConstants {
    match name {
        "testnet" => &TESTNET,
        _ => &MAINNET,
    }
}

const fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit"),
    }
}

/// Const hex decoding so network constants stay readable as literals.
const fn hex_literal(s: &str) -> [u8; 32] {
    let bytes = s.as_bytes();
    assert!(bytes.len() == 64, "expected 64 hex chars");
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = hex_val(bytes[i * 2]) * 16 + hex_val(bytes[i * 2 + 1]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_identity() {
        assert_eq!(
            MAINNET.genesis_challenge.to_string(),
            "0xccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb"
        );
        // signature salt must differ per network
        assert_ne!(
            MAINNET.agg_sig_me_additional_data,
            TESTNET.agg_sig_me_additional_data
        );
        assert_ne!(MAINNET.genesis_challenge, TESTNET.genesis_challenge);
    }

    #[test]
    fn test_epoch_is_multiple_of_sub_epoch() {
        assert_eq!(MAINNET.epoch_blocks % MAINNET.sub_epoch_blocks, 0);
        assert_eq!(TESTNET.epoch_blocks % TESTNET.sub_epoch_blocks, 0);
    }

    #[test]
    fn test_network_lookup() {
        assert!(constants_for_network("testnet").is_testnet);
        assert!(!constants_for_network("mainnet").is_testnet);
    }
}
