use thiserror::Error;

/// Failure to parse an info-hash from its hex rendering.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InfoHashError {
    /// The hex string length matched neither SHA-1 (40) nor SHA-256 (64).
    #[error("info-hash hex must be 40 or 64 characters, got {0}")]
    Length(usize),
    /// The string contained a non-hexadecimal character.
    #[error("info-hash contains non-hex characters")]
    NonHex,
}
