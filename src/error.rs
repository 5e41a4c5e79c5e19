use thiserror::Error;

/// Error taxonomy for the summation core.
///
/// Mirrors the `logic_error`/`assert`/stderr-warning mix of the original
/// reference implementation with a single typed enum so the driver can
/// decide exit codes and log levels without inspecting error text.
#[derive(Debug, Error)]
pub enum SummationError {
    #[error("invalid index {index}: {reason}")]
    InvalidIndex { index: u64, reason: &'static str },

    #[error("bad distribution: {reason}")]
    BadDistribution { reason: String },

    #[error("I/O failure reading {path}: {reason}")]
    IoFailure { path: String, reason: String },

    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },

    #[error("usage error: {reason}")]
    UsageError { reason: String },
}

pub type Result<T> = std::result::Result<T, SummationError>;
