pub mod block_record;
pub mod coin;
pub mod coin_record;
pub mod coin_spend;
pub mod conditions;
pub mod end_of_subslot;
pub mod foliage;
pub mod foliage_transaction_block;
pub mod full_block;
pub mod header_block;
pub mod mempool_item;
pub mod peer_info;
pub mod pool_target;
pub mod proof_of_space;
pub mod program;
pub mod reward_chain_block;
pub mod signage_point;
pub mod sized_bytes;
pub mod spend_bundle;
pub mod sub_epoch_summary;
pub mod transactions_info;
pub mod unfinished_block;
pub mod vdf;
pub mod weight_proof;
