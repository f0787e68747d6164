//! Role-gated access control for MediChain records.
//!
//! Provides:
//! - Record upload with the content key sealed for the patient
//! - Doctor access requests with patient approval or rejection
//! - Per-record key grants by re-sealing the content key for a doctor
//! - Revocation, access checks and per-participant access logs
//! - Patient/doctor connections
//! - Ledger commits of every upload, grant and revocation
//!
//! Persistence sits behind the async traits in [`store`]; [`memory`] holds
//! the in-process implementations.

pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod role;
pub mod service;
pub mod store;
pub mod types;

pub use config::AccessConfig;
pub use error::{AccessError, AccessResult};
pub use events::{AccessEvent, LedgerAction};
pub use memory::{
    MemoryAccessLog, MemoryConnectionStore, MemoryGrantStore, MemoryIdentityStore,
    MemoryRecordStore,
};
pub use role::{Operation, Principal, Role, authorize};
pub use service::AccessService;
pub use store::{AccessLogStore, ConnectionStore, GrantStore, IdentityStore, RecordStore, Stores};
pub use types::*;
