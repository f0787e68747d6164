//! In-memory store implementations.
//!
//! Each store is a cloneable handle over an `Arc<RwLock<..>>`; clones share
//! the same data. Every trait method takes the lock once, so the atomic
//! operations of [`crate::store`] hold for concurrent callers.

use crate::error::{AccessError, AccessResult};
use crate::store::{AccessLogStore, ConnectionStore, GrantStore, IdentityStore, RecordStore};
use crate::types::{
    AccessGrant, AccessLogEntry, Connection, ConnectionStatus, GrantStatus, PrincipalKeyMaterial,
    Record,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ── Identities ──

#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    principals: Arc<RwLock<HashMap<String, PrincipalKeyMaterial>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn fetch_principal(&self, id: &str) -> AccessResult<PrincipalKeyMaterial> {
        self.principals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AccessError::NotFound(format!("principal {id}")))
    }

    async fn insert_principal(&self, material: PrincipalKeyMaterial) -> AccessResult<()> {
        let mut principals = self.principals.write().await;
        if principals.contains_key(&material.id) {
            return Err(AccessError::Conflict(format!(
                "principal {} already registered",
                material.id
            )));
        }
        principals.insert(material.id.clone(), material);
        Ok(())
    }

    async fn replace_principal(&self, material: PrincipalKeyMaterial) -> AccessResult<()> {
        let mut principals = self.principals.write().await;
        match principals.get_mut(&material.id) {
            Some(slot) => {
                *slot = material;
                Ok(())
            }
            None => Err(AccessError::NotFound(format!("principal {}", material.id))),
        }
    }
}

// ── Records ──

#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<String, Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_record(&self, record: Record) -> AccessResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AccessError::Conflict(format!("record {} exists", record.id)));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_record(&self, id: &str) -> AccessResult<Option<Record>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn records_for_patient(&self, patient_id: &str) -> AccessResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.patient_id == patient_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| (a.uploaded_at, &a.id).cmp(&(b.uploaded_at, &b.id)));
        Ok(records)
    }
}

// ── Grants ──

#[derive(Clone, Default)]
pub struct MemoryGrantStore {
    grants: Arc<RwLock<HashMap<String, AccessGrant>>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect(&self, pred: impl Fn(&AccessGrant) -> bool) -> Vec<AccessGrant> {
        let mut grants: Vec<AccessGrant> = self
            .grants
            .read()
            .await
            .values()
            .filter(|g| pred(g))
            .cloned()
            .collect();
        grants.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        grants
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn get_grant(&self, id: &str) -> AccessResult<Option<AccessGrant>> {
        Ok(self.grants.read().await.get(id).cloned())
    }

    async fn find_grant(
        &self,
        patient_id: &str,
        doctor_id: &str,
        record_id: Option<&str>,
    ) -> AccessResult<Option<AccessGrant>> {
        Ok(self
            .grants
            .read()
            .await
            .values()
            .find(|g| {
                g.patient_id == patient_id
                    && g.doctor_id == doctor_id
                    && g.record_id.as_deref() == record_id
            })
            .cloned())
    }

    async fn upsert_grant(
        &self,
        grant: AccessGrant,
    ) -> AccessResult<(AccessGrant, Option<AccessGrant>)> {
        let mut grants = self.grants.write().await;
        if let Some(existing) = grants.values_mut().find(|g| g.same_key(&grant)) {
            let previous = existing.clone();
            existing.status = grant.status;
            existing.doctor_envelope = grant.doctor_envelope;
            existing.updated_at = grant.updated_at;
            return Ok((existing.clone(), Some(previous)));
        }
        grants.insert(grant.id.clone(), grant.clone());
        Ok((grant, None))
    }

    async fn transition_grant(
        &self,
        id: &str,
        from: GrantStatus,
        to: GrantStatus,
        at: DateTime<Utc>,
    ) -> AccessResult<AccessGrant> {
        let mut grants = self.grants.write().await;
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| AccessError::NotFound(format!("grant {id}")))?;
        if grant.status != from {
            return Err(AccessError::InvalidTransition(format!(
                "grant {id} is {}, expected {from}",
                grant.status
            )));
        }
        grant.status = to;
        grant.updated_at = at;
        Ok(grant.clone())
    }

    async fn delete_grant(
        &self,
        id: &str,
        expected: Option<GrantStatus>,
    ) -> AccessResult<AccessGrant> {
        let mut grants = self.grants.write().await;
        let status = grants
            .get(id)
            .map(|g| g.status)
            .ok_or_else(|| AccessError::NotFound(format!("grant {id}")))?;
        match expected {
            Some(expected) if status != expected => {
                return Err(AccessError::InvalidTransition(format!(
                    "grant {id} is {status}, expected {expected}"
                )));
            }
            _ => {}
        }
        grants
            .remove(id)
            .ok_or_else(|| AccessError::NotFound(format!("grant {id}")))
    }

    async fn restore_grant(&self, grant: AccessGrant) -> AccessResult<()> {
        let mut grants = self.grants.write().await;
        grants.retain(|_, g| !g.same_key(&grant));
        grants.insert(grant.id.clone(), grant);
        Ok(())
    }

    async fn grants_for_patient(&self, patient_id: &str) -> AccessResult<Vec<AccessGrant>> {
        Ok(self.collect(|g| g.patient_id == patient_id).await)
    }

    async fn grants_for_doctor(&self, doctor_id: &str) -> AccessResult<Vec<AccessGrant>> {
        Ok(self.collect(|g| g.doctor_id == doctor_id).await)
    }
}

// ── Connections ──

#[derive(Clone, Default)]
pub struct MemoryConnectionStore {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect(&self, pred: impl Fn(&Connection) -> bool) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self
            .connections
            .read()
            .await
            .values()
            .filter(|c| pred(c))
            .cloned()
            .collect();
        connections.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        connections
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn insert_connection(&self, connection: Connection) -> AccessResult<()> {
        let mut connections = self.connections.write().await;
        let duplicate = connections.values().any(|c| {
            c.patient_id == connection.patient_id && c.doctor_id == connection.doctor_id
        });
        if duplicate {
            return Err(AccessError::Conflict(format!(
                "connection between {} and {} already exists",
                connection.patient_id, connection.doctor_id
            )));
        }
        connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> AccessResult<Option<Connection>> {
        Ok(self.connections.read().await.get(id).cloned())
    }

    async fn resolve_connection(
        &self,
        id: &str,
        to: ConnectionStatus,
    ) -> AccessResult<Connection> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(id)
            .ok_or_else(|| AccessError::NotFound(format!("connection {id}")))?;
        if connection.status != ConnectionStatus::Pending {
            return Err(AccessError::InvalidTransition(format!(
                "connection {id} is already {:?}",
                connection.status
            )));
        }
        connection.status = to;
        Ok(connection.clone())
    }

    async fn connections_for_patient(&self, patient_id: &str) -> AccessResult<Vec<Connection>> {
        Ok(self.collect(|c| c.patient_id == patient_id).await)
    }

    async fn connections_for_doctor(&self, doctor_id: &str) -> AccessResult<Vec<Connection>> {
        Ok(self.collect(|c| c.doctor_id == doctor_id).await)
    }
}

// ── Access log ──

/// Append-ordered access log.
#[derive(Clone, Default)]
pub struct MemoryAccessLog {
    entries: Arc<RwLock<Vec<AccessLogEntry>>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessLogStore for MemoryAccessLog {
    async fn append_entry(&self, entry: AccessLogEntry) -> AccessResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn entries_for_patient(&self, patient_id: &str) -> AccessResult<Vec<AccessLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn entries_for_doctor(&self, doctor_id: &str) -> AccessResult<Vec<AccessLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.doctor_id == doctor_id)
            .cloned()
            .collect())
    }
}
