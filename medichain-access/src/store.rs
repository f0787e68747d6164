//! Persistence seams for the access service.
//!
//! Read-modify-write steps that must not interleave (re-request of a grant,
//! a status transition, a duplicate connection check) are single trait
//! methods so an implementation can make each one atomic.

use crate::error::AccessResult;
use crate::types::{
    AccessGrant, AccessLogEntry, Connection, ConnectionStatus, GrantStatus, PrincipalKeyMaterial,
    Record,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Resolves principal ids to their key material.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fails with `NotFound` for an unknown id.
    async fn fetch_principal(&self, id: &str) -> AccessResult<PrincipalKeyMaterial>;

    /// Fails with `Conflict` if the id is taken.
    async fn insert_principal(&self, material: PrincipalKeyMaterial) -> AccessResult<()>;

    /// Replaces stored material, e.g. after a password change. `NotFound` if absent.
    async fn replace_principal(&self, material: PrincipalKeyMaterial) -> AccessResult<()>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, record: Record) -> AccessResult<()>;

    async fn get_record(&self, id: &str) -> AccessResult<Option<Record>>;

    async fn records_for_patient(&self, patient_id: &str) -> AccessResult<Vec<Record>>;
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn get_grant(&self, id: &str) -> AccessResult<Option<AccessGrant>>;

    async fn find_grant(
        &self,
        patient_id: &str,
        doctor_id: &str,
        record_id: Option<&str>,
    ) -> AccessResult<Option<AccessGrant>>;

    /// Inserts `grant`, or if a grant with the same `(patient, doctor,
    /// record)` exists, overwrites its status, envelope and `updated_at`
    /// while keeping its id and `created_at`. Returns the stored grant and
    /// the one it replaced.
    async fn upsert_grant(
        &self,
        grant: AccessGrant,
    ) -> AccessResult<(AccessGrant, Option<AccessGrant>)>;

    /// Moves a grant from `from` to `to`. `NotFound` if absent,
    /// `InvalidTransition` if its status is not `from`.
    async fn transition_grant(
        &self,
        id: &str,
        from: GrantStatus,
        to: GrantStatus,
        at: DateTime<Utc>,
    ) -> AccessResult<AccessGrant>;

    /// Deletes a grant, optionally only if it currently has status `expected`.
    async fn delete_grant(
        &self,
        id: &str,
        expected: Option<GrantStatus>,
    ) -> AccessResult<AccessGrant>;

    /// Puts back a grant exactly as given, replacing any grant with the same key.
    async fn restore_grant(&self, grant: AccessGrant) -> AccessResult<()>;

    async fn grants_for_patient(&self, patient_id: &str) -> AccessResult<Vec<AccessGrant>>;

    async fn grants_for_doctor(&self, doctor_id: &str) -> AccessResult<Vec<AccessGrant>>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// `Conflict` if any connection already exists for the pair.
    async fn insert_connection(&self, connection: Connection) -> AccessResult<()>;

    async fn get_connection(&self, id: &str) -> AccessResult<Option<Connection>>;

    /// Moves a connection out of `Pending`. `InvalidTransition` otherwise.
    async fn resolve_connection(
        &self,
        id: &str,
        to: ConnectionStatus,
    ) -> AccessResult<Connection>;

    async fn connections_for_patient(&self, patient_id: &str) -> AccessResult<Vec<Connection>>;

    async fn connections_for_doctor(&self, doctor_id: &str) -> AccessResult<Vec<Connection>>;
}

#[async_trait]
pub trait AccessLogStore: Send + Sync {
    async fn append_entry(&self, entry: AccessLogEntry) -> AccessResult<()>;

    /// Entries involving the patient, newest first.
    async fn entries_for_patient(&self, patient_id: &str) -> AccessResult<Vec<AccessLogEntry>>;

    /// Entries involving the doctor, newest first.
    async fn entries_for_doctor(&self, doctor_id: &str) -> AccessResult<Vec<AccessLogEntry>>;
}

/// The full set of stores the service runs against.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub records: Arc<dyn RecordStore>,
    pub grants: Arc<dyn GrantStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub access_log: Arc<dyn AccessLogStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        use crate::memory::*;
        Self {
            identities: Arc::new(MemoryIdentityStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
            grants: Arc::new(MemoryGrantStore::new()),
            connections: Arc::new(MemoryConnectionStore::new()),
            access_log: Arc::new(MemoryAccessLog::new()),
        }
    }
}
