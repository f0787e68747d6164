//! Ledger error types.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] duckdb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted row could not be turned back into a block.
    #[error("corrupt block {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("ledger lock poisoned")]
    LockPoisoned,
}
