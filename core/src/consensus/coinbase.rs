use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::Bytes32;

/// Reward coin parents are synthetic ids derived from the genesis challenge
/// and the height, so they can never collide with real coins and every node
/// derives the same set.
pub fn pool_parent_id(block_height: u32, genesis_challenge: &Bytes32) -> Bytes32 {
    let mut buf = [0u8; 32];
    buf[0..16].copy_from_slice(&genesis_challenge.as_slice()[0..16]);
    buf[28..32].copy_from_slice(&block_height.to_be_bytes());
    Bytes32::new(buf)
}

pub fn farmer_parent_id(block_height: u32, genesis_challenge: &Bytes32) -> Bytes32 {
    let mut buf = [0u8; 32];
    buf[0..16].copy_from_slice(&genesis_challenge.as_slice()[16..32]);
    buf[28..32].copy_from_slice(&block_height.to_be_bytes());
    Bytes32::new(buf)
}

pub fn create_pool_coin(
    block_height: u32,
    puzzle_hash: &Bytes32,
    amount: u64,
    genesis_challenge: &Bytes32,
) -> Coin {
    Coin {
        parent_coin_info: pool_parent_id(block_height, genesis_challenge),
        puzzle_hash: *puzzle_hash,
        amount,
    }
}

pub fn create_farmer_coin(
    block_height: u32,
    puzzle_hash: &Bytes32,
    amount: u64,
    genesis_challenge: &Bytes32,
) -> Coin {
    Coin {
        parent_coin_info: farmer_parent_id(block_height, genesis_challenge),
        puzzle_hash: *puzzle_hash,
        amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_ids_differ_by_role_and_height() {
        let mut raw = [9u8; 32];
        raw[16..].fill(7);
        let genesis = Bytes32::new(raw);
        assert_ne!(pool_parent_id(5, &genesis), farmer_parent_id(5, &genesis));
        assert_ne!(pool_parent_id(5, &genesis), pool_parent_id(6, &genesis));
    }
}
