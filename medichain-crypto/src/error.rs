//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in key handling, envelope and wrap operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("invalid peer key: {0}")]
    InvalidPeerKey(String),

    /// AEAD tag mismatch. Carries no detail on purpose.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("master secret unavailable: {0}")]
    MasterSecretUnavailable(String),

    #[error("invalid envelope: {0}")]
    EnvelopeInvalid(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("KDF iteration count {actual} below minimum {minimum}")]
    WeakKdfParams { actual: u32, minimum: u32 },

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
