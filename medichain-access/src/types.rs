//! Shared types for the access protocol.

use crate::error::{AccessError, AccessResult};
use crate::role::Role;
use chrono::{DateTime, Utc};
use medichain_crypto::{
    EciesEnvelope, KdfParams, KeyPair, MasterSecret, ProtectedPrivateKey, PublicKey, SecretKey,
    public_key_from_spki_b64, public_key_to_spki_b64,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Key material the identity store holds for one principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalKeyMaterial {
    pub id: String,
    pub role: Role,
    pub public_key_spki_b64: String,
    pub private_key: ProtectedPrivateKey,
}

impl PrincipalKeyMaterial {
    /// Protects `keys` for storage: password wrap always, master wrap when
    /// a master secret is given.
    pub fn protect(
        id: impl Into<String>,
        role: Role,
        keys: &KeyPair,
        password: &str,
        master: Option<&MasterSecret>,
        params: &KdfParams,
    ) -> AccessResult<Self> {
        Ok(Self {
            id: id.into(),
            role,
            public_key_spki_b64: public_key_to_spki_b64(&keys.public)?,
            private_key: ProtectedPrivateKey::protect(&keys.secret, password, master, params)?,
        })
    }

    pub fn public_key(&self) -> AccessResult<PublicKey> {
        public_key_from_spki_b64(&self.public_key_spki_b64).map_err(|e| {
            AccessError::EnvelopeInvalid(format!("stored public key for {}: {e}", self.id))
        })
    }
}

/// An uploaded medical record. The content itself lives in external
/// content-addressed storage; only its reference and hash are kept here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub patient_id: String,
    pub uploaded_by: String,
    pub filename: String,
    pub content_ref: String,
    pub data_hash: String,
    /// The content key sealed for the patient.
    pub patient_envelope: EciesEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_der_b64: Option<String>,
    pub block_id: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Input for [`crate::AccessService::upload_record`].
pub struct RecordUpload {
    pub patient_id: String,
    pub filename: String,
    pub content_ref: String,
    pub data_hash: String,
    pub content_key: Zeroizing<Vec<u8>>,
    /// DER ECDSA signature by the uploader over `data_hash`.
    pub signature: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrantStatus::Pending => "pending",
            GrantStatus::Approved => "approved",
            GrantStatus::Rejected => "rejected",
        })
    }
}

/// A patient's answer to a pending access request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn status(self) -> GrantStatus {
        match self {
            Decision::Approve => GrantStatus::Approved,
            Decision::Reject => GrantStatus::Rejected,
        }
    }
}

/// Access of one doctor to one patient, either connection-wide
/// (`record_id == None`) or for a single record.
///
/// At most one grant exists per `(patient_id, doctor_id, record_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub record_id: Option<String>,
    pub status: GrantStatus,
    /// The record's content key sealed for the doctor.
    pub doctor_envelope: Option<EciesEnvelope>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessGrant {
    pub fn new(
        patient_id: impl Into<String>,
        doctor_id: impl Into<String>,
        record_id: Option<String>,
        status: GrantStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            record_id,
            status,
            doctor_envelope: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == GrantStatus::Approved
    }

    pub fn same_key(&self, other: &AccessGrant) -> bool {
        self.patient_id == other.patient_id
            && self.doctor_id == other.doctor_id
            && self.record_id == other.record_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A patient's request to be treated by a doctor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(patient_id: impl Into<String>, doctor_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            status: ConnectionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    RecordUploaded,
    AccessRequested,
    RequestCancelled,
    RequestApproved,
    RequestRejected,
    KeyGranted,
    AccessRevoked,
    RecordKeyFetched,
    ConnectionRequested,
    ConnectionAccepted,
    ConnectionRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub record_id: Option<String>,
    pub action: AccessAction,
    pub timestamp: DateTime<Utc>,
}

impl AccessLogEntry {
    pub fn new(
        patient_id: impl Into<String>,
        doctor_id: impl Into<String>,
        record_id: Option<String>,
        action: AccessAction,
    ) -> Self {
        Self {
            id: new_id(),
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            record_id,
            action,
            timestamp: Utc::now(),
        }
    }
}

/// How a patient proves control of their private key during a grant.
pub enum PatientCredential {
    /// The unlocked key, held client-side.
    PrivateKey(SecretKey),
    /// The patient's password; unlocks the stored password wrap.
    Password(Zeroizing<String>),
    /// Backend-mediated: unlocks the stored master wrap.
    MasterFallback,
}

impl PatientCredential {
    pub fn password(password: impl Into<String>) -> Self {
        PatientCredential::Password(Zeroizing::new(password.into()))
    }
}

impl fmt::Debug for PatientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatientCredential::PrivateKey(_) => "PrivateKey([REDACTED])",
            PatientCredential::Password(_) => "Password([REDACTED])",
            PatientCredential::MasterFallback => "MasterFallback",
        })
    }
}

/// Time-ordered unique id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
