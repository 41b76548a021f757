//! Library-wide error and result types.

use thiserror::Error as ThisError;

/// Result alias used throughout coldboot.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Construction-time errors (inconsistent parameters, missing keys) prevent
/// instantiation; runtime errors name the failing circuit stage so callers
/// can tell a mis-sized input from a mis-generated key set.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A parameter literal is internally inconsistent.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// A required evaluation key is absent.
    #[error("missing key: {0}")]
    MissingKey(String),
    /// The ciphertext does not carry enough levels for the operation.
    #[error("{stage}: insufficient levels (have {have}, need {need})")]
    InsufficientLevels {
        stage: &'static str,
        have: usize,
        need: usize,
    },
    /// The input scale cannot be brought into the bootstrappable range.
    #[error("ScaleDown: Q/Scale too small (ratio {ratio})")]
    ScaleOutOfRange { ratio: f64 },
    /// Operand scales differ where they must match.
    #[error("{op}: scale mismatch ({lhs} vs {rhs})")]
    ScaleMismatch { op: &'static str, lhs: f64, rhs: f64 },
    /// Meta-BTS stopped before the requested precision was reached. The
    /// best refresh obtained so far is carried along so the caller may
    /// decide to keep it.
    #[error("iterative bootstrapping stopped early after {completed} iteration(s)")]
    IterationStopped {
        completed: usize,
        best: Box<crate::ckks::Ciphertext>,
    },
    /// A polynomial or power basis was queried for state it does not hold.
    #[error("polynomial evaluation: {0}")]
    PolynomialEvaluation(String),
    /// A slot index was mapped by more than one polynomial of a vector.
    #[error("polynomial vector maps slot {0} twice")]
    DuplicateSlotIndex(usize),
}
