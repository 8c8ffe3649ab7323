use evg_core::protocols::ProtocolMessageTypes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Per-message-type budget over one window: how many messages, and how
/// many payload bytes in total.
#[derive(Clone, Copy, Debug)]
pub struct Budget {
    pub count: u32,
    pub total_bytes: u64,
}

/// Fixed per-minute budgets for each message family. Chatty inventory
/// messages get large counts; bulk responses get large byte allowances
/// instead.
pub fn default_budget(msg_type: ProtocolMessageTypes) -> Budget {
    use ProtocolMessageTypes::*;
    match msg_type {
        Handshake => Budget {
            count: 5,
            total_bytes: 100 * 1024,
        },
        NewPeak | NewPeakWallet | NewPeakTimelord => Budget {
            count: 200,
            total_bytes: 2 * 1024 * 1024,
        },
        NewTransaction | RequestTransaction => Budget {
            count: 5000,
            total_bytes: 5 * 1024 * 1024,
        },
        RespondTransaction | SendTransaction => Budget {
            count: 5000,
            total_bytes: 50 * 1024 * 1024,
        },
        NewSignagePointOrEndOfSubSlot | RespondSignagePoint | RespondEndOfSubSlot
        | NewSignagePoint | NewSignagePointVdf | NewEndOfSubSlotVdf => Budget {
            count: 1000,
            total_bytes: 50 * 1024 * 1024,
        },
        RequestBlock | RejectBlock | RequestBlocks | RejectBlocks | RequestUnfinishedBlock
        | RequestSignagePointOrEndOfSubSlot | RequestBlockHeader | RejectHeaderRequest => {
            Budget {
                count: 1000,
                total_bytes: 2 * 1024 * 1024,
            }
        }
        RespondBlock | RespondBlocks | RespondUnfinishedBlock | NewUnfinishedBlock
        | NewUnfinishedBlockTimelord | RespondBlockHeader | NewInfusionPointVdf => Budget {
            count: 500,
            total_bytes: 200 * 1024 * 1024,
        },
        RequestProofOfWeight | RespondProofOfWeight => Budget {
            count: 10,
            total_bytes: 500 * 1024 * 1024,
        },
        RequestMempoolTransactions | RequestPeers | RespondPeers => Budget {
            count: 60,
            total_bytes: 10 * 1024 * 1024,
        },
        DeclareProofOfSpace | RequestSignedValues | SignedValues => Budget {
            count: 1000,
            total_bytes: 10 * 1024 * 1024,
        },
        CoinStateUpdate | RegisterForPhUpdates | RespondToPhUpdates | RegisterForCoinUpdates
        | RespondToCoinUpdates | TransactionAck => Budget {
            count: 1000,
            total_bytes: 100 * 1024 * 1024,
        },
    }
}

#[derive(Default)]
struct WindowUsage {
    window_start: Option<Instant>,
    count: u32,
    bytes: u64,
}

/// Enforces per-message-type budgets for one connection, scaled by the
/// configured percentage. Exceeding a budget is a protocol violation.
pub struct RateLimiter {
    percent: u8,
    usage: HashMap<ProtocolMessageTypes, WindowUsage>,
}

impl RateLimiter {
    pub fn new(percent: u8) -> Self {
        RateLimiter {
            percent,
            usage: HashMap::new(),
        }
    }

    /// Accounts for one message of `size` bytes; `false` means the budget
    /// is exhausted and the message must be refused.
    pub fn accept(&mut self, msg_type: ProtocolMessageTypes, size: usize, now: Instant) -> bool {
        let budget = default_budget(msg_type);
        let allowed_count =
            u64::from(budget.count) * u64::from(self.percent) / 100;
        let allowed_bytes = budget.total_bytes * u64::from(self.percent) / 100;
        let usage = self.usage.entry(msg_type).or_default();
        match usage.window_start {
            Some(start) if now.duration_since(start) < RATE_LIMIT_WINDOW => {}
            _ => {
                usage.window_start = Some(now);
                usage.count = 0;
                usage.bytes = 0;
            }
        }
        if u64::from(usage.count) + 1 > allowed_count
            || usage.bytes + size as u64 > allowed_bytes
        {
            return false;
        }
        usage.count += 1;
        usage.bytes += size as u64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_budget_enforced() {
        let mut limiter = RateLimiter::new(100);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.accept(ProtocolMessageTypes::Handshake, 10, now));
        }
        assert!(!limiter.accept(ProtocolMessageTypes::Handshake, 10, now));
    }

    #[test]
    fn test_window_resets() {
        let mut limiter = RateLimiter::new(100);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.accept(ProtocolMessageTypes::Handshake, 10, now));
        }
        let later = now + RATE_LIMIT_WINDOW + Duration::from_secs(1);
        assert!(limiter.accept(ProtocolMessageTypes::Handshake, 10, later));
    }

    #[test]
    fn test_percent_scales_budget() {
        let mut limiter = RateLimiter::new(30);
        let now = Instant::now();
        // 30% of 5 handshakes rounds down to 1
        assert!(limiter.accept(ProtocolMessageTypes::Handshake, 10, now));
        assert!(!limiter.accept(ProtocolMessageTypes::Handshake, 10, now));
    }

    #[test]
    fn test_byte_budget_enforced() {
        let mut limiter = RateLimiter::new(100);
        let now = Instant::now();
        assert!(!limiter.accept(
            ProtocolMessageTypes::RequestPeers,
            11 * 1024 * 1024,
            now
        ));
    }
}
