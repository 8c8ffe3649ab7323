use thiserror::Error;

/// Closed set of reasons a block, spend bundle or proof can be rejected.
///
/// These travel inside `ValidationError` so callers can match on the kind
/// without parsing strings; the set is append-only across protocol
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // shape / encoding
    InvalidEncoding,
    BlockTooLarge,
    GeneratorTooLarge,
    // ancestry
    UnknownPrev,
    InvalidHeight,
    InvalidWeight,
    InvalidTotalIters,
    // signage point / sub slots
    InvalidSpIndex,
    InvalidSubSlotIters,
    InvalidSubSlotChallenge,
    InvalidSignagePointVdf,
    // proof of space
    InvalidProofOfSpace,
    PlotFilterFailed,
    PlotSizeOutOfRange,
    RequiredItersTooHigh,
    // proof of time
    InvalidVdf,
    // foliage
    InvalidRewardBlockHash,
    InvalidFoliageSignature,
    InvalidPoolSignature,
    InvalidPoolTarget,
    InvalidRewardPuzzleHash,
    TimestampTooFarInPast,
    TimestampTooFarInFuture,
    InvalidTransactionsInfoHash,
    InvalidPrevTransactionBlockHash,
    // body
    GeneratorRunError,
    UnknownUnspent,
    DoubleSpend,
    DuplicateAddition,
    WrongPuzzleHash,
    AmountOverflow,
    CoinAmountExceedsMax,
    InvalidFeeAmount,
    InvalidRewardClaims,
    InvalidAdditionsRoot,
    InvalidRemovalsRoot,
    BadAggregateSignature,
    CostTooHigh,
    InvalidCost,
    // sub-epoch boundary
    InvalidSubEpochSummary,
    InvalidNewDifficulty,
    InvalidNewSubSlotIters,
    // mempool
    EmptyBundle,
    ConflictingBundle,
    FeeTooLowToReplace,
    FeeBelowEvictionThreshold,
    AssertHeightFailed,
    AssertSecondsFailed,
    AssertBeforeHeightFailed,
    ImpossibleTimelock,
    MempoolNotInitialized,
    // weight proofs
    InvalidWeightProof,
}

/// A typed validation failure. Validation never panics and never raises
/// through the scheduler; it returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed ({code:?}): {detail}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub detail: String,
}

impl ValidationError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// Failures at the framed-message layer. These score the peer down and close
/// the connection; they never reach core chain state.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes is below the fixed header size")]
    FrameTooShort(usize),
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("unexpected {got:?} while waiting for {expected:?}")]
    UnexpectedMessage {
        expected: crate::protocols::ProtocolMessageTypes,
        got: crate::protocols::ProtocolMessageTypes,
    },
    #[error("rate limit exceeded for {0:?}")]
    RateLimitExceeded(crate::protocols::ProtocolMessageTypes),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Node-level failures. Only `Corruption` is fatal to the process; the rest
/// are recovered locally or surfaced to the offending peer.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("database error: {0}")]
    Database(String),
    #[error("database corruption: {0}")]
    Corruption(String),
    #[error("peer error: {0}")]
    Peer(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("shutting down")]
    Shutdown,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChainError {
    /// Distinct exit code for out-of-band recovery, per the corruption
    /// handling policy.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChainError::Corruption(_) => 66,
            _ => 1,
        }
    }
}
