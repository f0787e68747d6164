//! Access events committed to the ledger.

use crate::error::AccessResult;
use medichain_ledger::NewBlock;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Grant,
    Revoke,
}

/// Canonical descriptor of a grant or revocation. Its SHA-256 becomes the
/// block's `data_hash`.
///
/// A revocation removing several grants is one event listing all of them.
#[derive(Debug, Clone, Serialize)]
pub struct AccessEvent<'a> {
    pub action: LedgerAction,
    pub patient_id: &'a str,
    pub doctor_id: &'a str,
    pub record_id: Option<&'a str>,
    pub grant_ids: Vec<&'a str>,
    /// Fingerprint of the doctor's envelope, for grants.
    pub envelope_fingerprint: Option<String>,
}

impl AccessEvent<'_> {
    pub fn data_hash(&self) -> AccessResult<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// The block recording this event against `content_ref`.
    pub fn to_block(&self, content_ref: &str) -> AccessResult<NewBlock> {
        Ok(NewBlock::new(
            self.doctor_id,
            self.patient_id,
            content_ref,
            self.data_hash()?,
        ))
    }
}
