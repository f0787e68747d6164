//! Ledger blocks and their hash.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `previous_hash` of the first block in a chain.
pub const GENESIS_HASH: &str = "0";

/// A committed block. `id` is assigned by the store and strictly increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub doctor_id: String,
    pub patient_id: String,
    pub content_ref: String,
    pub data_hash: String,
    pub previous_hash: String,
    pub hash_value: String,
    pub timestamp: DateTime<Utc>,
}

impl Block {
    /// Recomputes this block's hash from its stored fields.
    pub fn recompute_hash(&self) -> String {
        compute_hash(
            &self.doctor_id,
            &self.patient_id,
            &self.content_ref,
            &self.previous_hash,
            &self.data_hash,
            &self.timestamp,
        )
    }
}

/// Caller input for [`crate::Ledger::append_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub doctor_id: String,
    pub patient_id: String,
    pub content_ref: String,
    pub data_hash: String,
}

impl NewBlock {
    pub fn new(
        doctor_id: impl Into<String>,
        patient_id: impl Into<String>,
        content_ref: impl Into<String>,
        data_hash: impl Into<String>,
    ) -> Self {
        Self {
            doctor_id: doctor_id.into(),
            patient_id: patient_id.into(),
            content_ref: content_ref.into(),
            data_hash: data_hash.into(),
        }
    }

    /// Links this entry onto `previous_hash`, stamping and hashing it.
    pub(crate) fn seal(self, previous_hash: String, timestamp: DateTime<Utc>) -> SealedBlock {
        let hash_value = compute_hash(
            &self.doctor_id,
            &self.patient_id,
            &self.content_ref,
            &previous_hash,
            &self.data_hash,
            &timestamp,
        );
        SealedBlock {
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            content_ref: self.content_ref,
            data_hash: self.data_hash,
            previous_hash,
            hash_value,
            timestamp,
        }
    }
}

/// A hashed block waiting for the store to assign its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SealedBlock {
    pub doctor_id: String,
    pub patient_id: String,
    pub content_ref: String,
    pub data_hash: String,
    pub previous_hash: String,
    pub hash_value: String,
    pub timestamp: DateTime<Utc>,
}

impl SealedBlock {
    pub(crate) fn with_id(self, id: i64) -> Block {
        Block {
            id,
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            content_ref: self.content_ref,
            data_hash: self.data_hash,
            previous_hash: self.previous_hash,
            hash_value: self.hash_value,
            timestamp: self.timestamp,
        }
    }
}

/// Current time at the precision blocks are hashed and stored with.
pub fn block_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Canonical text form of a block timestamp, e.g. `2024-05-01T12:00:00.000000Z`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SHA-256 over `doctor|patient|content_ref|previous_hash|data_hash|timestamp`, lowercase hex.
pub fn compute_hash(
    doctor_id: &str,
    patient_id: &str,
    content_ref: &str,
    previous_hash: &str,
    data_hash: &str,
    timestamp: &DateTime<Utc>,
) -> String {
    let input = format!(
        "{doctor_id}|{patient_id}|{content_ref}|{previous_hash}|{data_hash}|{}",
        format_timestamp(timestamp)
    );
    hex::encode(Sha256::digest(input.as_bytes()))
}
