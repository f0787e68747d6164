//! Append-only hash-chain ledger for MediChain.
//!
//! Every record upload and every access grant or revocation is committed as
//! a [`Block`] whose hash covers its own fields plus the previous block's
//! hash, so any retroactive edit is detectable by [`Ledger::verify_chain`].
//!
//! This is a tamper-evidence log with a single writer (the backend), not a
//! consensus system.
//!
//! # Architecture
//!
//! - [`Ledger`] stamps appends and owns the verifiers
//! - [`LedgerStore::append_linked`] is the append critical section: tail read
//!   and insert under one lock shared by every handle onto the same storage
//! - [`LedgerStore`] is the persistence seam, with [`MemoryLedgerStore`] and
//!   [`DuckDbLedgerStore`] implementations
//! - Block ids are store-assigned and strictly increasing; verification walks
//!   in ascending id order

mod block;
mod duckdb_store;
mod error;
mod ledger;
mod store;

pub use block::{
    Block, GENESIS_HASH, NewBlock, block_timestamp, compute_hash, format_timestamp,
};
pub use duckdb_store::DuckDbLedgerStore;
pub use error::{LedgerError, LedgerResult};
pub use ledger::{ChainVerification, Ledger, verify_chain, verify_linkage};
pub use store::{BlockFilter, LedgerStore, MemoryLedgerStore};
