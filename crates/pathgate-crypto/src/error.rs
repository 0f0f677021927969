//! Crypto errors

use thiserror::Error;

/// Errors raised by crypto primitives and the key service
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Ciphertext is empty, not block-aligned, or carries bad padding
    #[error("bad ciphertext: {0}")]
    BadCiphertext(String),

    /// Key has an unsupported length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: &'static str, actual: usize },

    /// Buffer too small for in-place padding
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Key service lookup failed
    #[error("key service: {0}")]
    Service(String),
}

/// Result alias for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
