//! Shared error types for agent identity, configuration and discovery data.

use thiserror::Error;

/// Errors raised while building or parsing the shared agent types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value fell outside its permitted range.
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        /// The offending field.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Inclusive lower bound.
        min: u64,
        /// Inclusive upper bound.
        max: u64,
    },

    /// A PSK presentation string could not be decoded.
    #[error("Invalid PSK code: {0}")]
    InvalidPskCode(String),

    /// A discovery record was malformed or missing.
    #[error("TXT record error: {0}")]
    TxtRecord(String),

    /// A variable-length integer could not be decoded.
    #[error("Invalid varint: {0}")]
    Varint(String),

    /// A peer fingerprint did not match any presented certificate.
    #[error("Fingerprint mismatch: {0}")]
    FingerprintMismatch(String),
}

/// Alias for Result with TypesError.
pub type TypesResult<T> = Result<T, TypesError>;
