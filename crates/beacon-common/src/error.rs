use thiserror::Error;

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("conflicting definition for metric: {0}")]
    DuplicateNameConflict(String),
    #[error("counter delta must be non-negative, got {0}")]
    InvalidDelta(f64),
    #[error("invalid histogram buckets: {0}")]
    InvalidBucketConfiguration(String),
    #[error("invalid summary quantiles: {0}")]
    InvalidQuantileConfiguration(String),
    #[error("label arity mismatch for {metric}: expected {expected} values, got {actual}")]
    LabelArityMismatch {
        metric: String,
        expected: usize,
        actual: usize,
    },
    #[error("collector timed out: {0}")]
    CollectorTimeout(String),
    #[error("collector failed: {0}")]
    CollectorError(String),
    #[error("exposition encoding failed: {0}")]
    EncoderFault(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BeaconError>;
