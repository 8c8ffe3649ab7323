pub const MOTES_PER_LEAF: u64 = 1_000_000_000_000;
pub const BLOCKS_PER_YEAR: u32 = 1_681_920;
/// Coins minted at genesis, split between the pre-farm pool and farmer
/// puzzle hashes.
pub const PRE_FARM_COINS: u64 = 21_000_000;

/// The pool earns 7/8 of each block reward; a solo farmer acts as its own
/// pool and collects both parts. Halvings land near, not exactly on, the
/// three-year marks because difficulty drifts.
pub const fn calculate_pool_reward(height: u32) -> u64 {
    if height == 0 {
        (7 * MOTES_PER_LEAF / 8) * PRE_FARM_COINS
    } else if height < 3 * BLOCKS_PER_YEAR {
        7 * MOTES_PER_LEAF / 4
    } else if height < 6 * BLOCKS_PER_YEAR {
        7 * MOTES_PER_LEAF / 8
    } else if height < 9 * BLOCKS_PER_YEAR {
        7 * MOTES_PER_LEAF / 16
    } else if height < 12 * BLOCKS_PER_YEAR {
        7 * MOTES_PER_LEAF / 32
    } else {
        7 * MOTES_PER_LEAF / 64
    }
}

/// The farmer's base reward is the remaining 1/8, before fees.
pub const fn calculate_base_farmer_reward(height: u32) -> u64 {
    if height == 0 {
        (MOTES_PER_LEAF / 8) * PRE_FARM_COINS
    } else if height < 3 * BLOCKS_PER_YEAR {
        MOTES_PER_LEAF / 4
    } else if height < 6 * BLOCKS_PER_YEAR {
        MOTES_PER_LEAF / 8
    } else if height < 9 * BLOCKS_PER_YEAR {
        MOTES_PER_LEAF / 16
    } else if height < 12 * BLOCKS_PER_YEAR {
        MOTES_PER_LEAF / 32
    } else {
        MOTES_PER_LEAF / 64
    }
}

#[test]
fn test_reward_schedule() {
    //Pool rewards
    assert_eq!(calculate_pool_reward(0), 18_375_000_000_000_000_000);
    assert_eq!(calculate_pool_reward(1), 1_750_000_000_000);
    assert_eq!(calculate_pool_reward(3 * BLOCKS_PER_YEAR), 875_000_000_000);
    assert_eq!(calculate_pool_reward(6 * BLOCKS_PER_YEAR), 437_500_000_000);
    assert_eq!(calculate_pool_reward(9 * BLOCKS_PER_YEAR), 218_750_000_000);
    assert_eq!(calculate_pool_reward(12 * BLOCKS_PER_YEAR), 109_375_000_000);
    //Farmer rewards
    assert_eq!(calculate_base_farmer_reward(0), 2_625_000_000_000_000_000);
    assert_eq!(calculate_base_farmer_reward(1), 250_000_000_000);
    //The two parts always sum to the full block reward
    let mut height = 1;
    while height < 13 * BLOCKS_PER_YEAR {
        let total = calculate_pool_reward(height) + calculate_base_farmer_reward(height);
        assert_eq!(total % 8, 0);
        assert_eq!(calculate_pool_reward(height), total / 8 * 7);
        height += BLOCKS_PER_YEAR;
    }
}
