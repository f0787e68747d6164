//! Access protocol error types.

use medichain_crypto::CryptoError;
use medichain_ledger::LedgerError;
use std::time::Duration;
use thiserror::Error;

/// Result type for access operations.
pub type AccessResult<T> = Result<T, AccessError>;

/// Errors that can occur in grant, upload and query operations.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Any cryptographic failure while opening or producing an envelope.
    #[error("invalid envelope: {0}")]
    EnvelopeInvalid(String),

    #[error("record signature verification failed")]
    SignatureInvalid,

    #[error("master secret unavailable: {0}")]
    MasterSecretUnavailable(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CryptoError> for AccessError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MasterSecretUnavailable(msg) => AccessError::MasterSecretUnavailable(msg),
            CryptoError::SignatureInvalid => AccessError::SignatureInvalid,
            other => AccessError::EnvelopeInvalid(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AccessError {
    fn from(err: tokio::task::JoinError) -> Self {
        AccessError::Internal(format!("blocking task failed: {err}"))
    }
}
