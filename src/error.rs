use thiserror::Error;

/// Rejected input, raised when a value is constructed rather than when it is
/// used.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("constraint `{name}` has an invalid pattern: {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("constraint `{name}` pattern is {len} chars; limit is {limit}")]
    PatternTooLong {
        name: String,
        len: usize,
        limit: usize,
    },

    #[error("belief mean has {mean} entries but precision is {rows}x{cols}")]
    DimensionMismatch {
        mean: usize,
        rows: usize,
        cols: usize,
    },

    #[error("precision matrix must be square, got {rows}x{cols}")]
    NonSquarePrecision { rows: usize, cols: usize },

    #[error("sample arrays differ in length: {internal} internal vs {active} active")]
    SampleLengthMismatch { internal: usize, active: usize },

    #[error("{which} samples have inconsistent dimensions")]
    RaggedSamples { which: &'static str },

    #[error("invalid modulation: {0}")]
    InvalidModulation(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Structural failure of the particle classifier. Never carries a partial
/// classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cognitive-core violation: nesting depth {depth} exceeds maximum {max}")]
pub struct CognitiveCoreViolation {
    pub depth: usize,
    pub max: usize,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Violation(#[from] CognitiveCoreViolation),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
