//! The access grant protocol.
//!
//! Orchestrates the identity, record, grant, connection and access-log
//! stores together with the envelope primitives and the ledger:
//!
//! - doctors upload records, sealing the content key for the patient
//! - doctors request access, patients approve or reject
//! - patients grant a record key by re-sealing it for a doctor
//! - patients (or admins) revoke grants
//!
//! Every operation checks the role table once on entry. The content key is
//! only ever in memory for the duration of a single upload or grant.

use crate::config::AccessConfig;
use crate::error::{AccessError, AccessResult};
use crate::events::{AccessEvent, LedgerAction};
use crate::role::{Operation, Principal, Role, authorize};
use crate::store::Stores;
use crate::types::{
    AccessAction, AccessGrant, AccessLogEntry, Connection, ConnectionStatus, Decision,
    GrantStatus, PatientCredential, PrincipalKeyMaterial, Record, RecordUpload, new_id,
};
use chrono::Utc;
use medichain_crypto::{
    CryptoError, EciesEnvelope, KEY_SIZE, KdfParams, KeyPair, MasterSecret, ProtectedPrivateKey,
    SecretKey, encode_b64, unwrap_with_private, verify_record_signature, wrap_for_recipient,
};
use medichain_ledger::{Block, ChainVerification, Ledger, NewBlock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Entry point for every access operation.
pub struct AccessService {
    stores: Stores,
    ledger: Arc<Ledger>,
    config: AccessConfig,
    kdf_params: KdfParams,
    master: Option<Arc<MasterSecret>>,
}

impl AccessService {
    /// Builds the service, reading the master secret from the environment
    /// variable named in `config`.
    pub fn new(config: AccessConfig, stores: Stores, ledger: Arc<Ledger>) -> AccessResult<Self> {
        config.validate()?;
        let master = config.load_master_secret()?;
        Self::with_master_secret(config, stores, ledger, master)
    }

    /// Builds the service with an explicitly supplied master secret.
    ///
    /// Fails with `MasterSecretUnavailable` when `require_master_wrap` is set
    /// and no secret is given.
    pub fn with_master_secret(
        config: AccessConfig,
        stores: Stores,
        ledger: Arc<Ledger>,
        master: Option<MasterSecret>,
    ) -> AccessResult<Self> {
        config.validate()?;
        if config.require_master_wrap && master.is_none() {
            return Err(AccessError::MasterSecretUnavailable(
                "require_master_wrap is set but no master secret is configured".into(),
            ));
        }
        let kdf_params = config.kdf_params()?;
        info!(
            master_wrap = master.is_some(),
            kdf_iterations = kdf_params.iterations,
            "access service ready"
        );
        Ok(Self {
            stores,
            ledger,
            config,
            kdf_params,
            master: master.map(Arc::new),
        })
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    // ── Registration ──

    /// Stores a new principal's public key and protected private key.
    ///
    /// The private key is always password-wrapped, and also master-wrapped
    /// when the service has a master secret.
    pub async fn register_principal(
        &self,
        id: impl Into<String>,
        role: Role,
        keys: &KeyPair,
        password: &str,
    ) -> AccessResult<PrincipalKeyMaterial> {
        let id = id.into();
        let secret = keys.secret.clone();
        let public = keys.public;
        let password = Zeroizing::new(password.to_owned());
        let master = self.master.clone();
        let params = self.kdf_params;

        let material = spawn_blocking(move || {
            let keys = KeyPair { secret, public };
            PrincipalKeyMaterial::protect(id, role, &keys, &password, master.as_deref(), &params)
        })
        .await??;

        self.stores.identities.insert_principal(material.clone()).await?;
        info!(
            principal = %material.id,
            %role,
            master_wrapped = material.private_key.master.is_some(),
            "registered principal"
        );
        Ok(material)
    }

    /// Re-wraps the caller's private key under a new password, upgrading
    /// stale iteration counts on both wrap layers.
    pub async fn change_password(
        &self,
        actor: &Principal,
        old_password: &str,
        new_password: &str,
    ) -> AccessResult<()> {
        let mut material = self.stores.identities.fetch_principal(&actor.id).await?;
        let protected = material.private_key.clone();
        let old = Zeroizing::new(old_password.to_owned());
        let new = Zeroizing::new(new_password.to_owned());
        let master = self.master.clone();
        let params = self.kdf_params;

        let updated = spawn_blocking(move || -> Result<ProtectedPrivateKey, CryptoError> {
            let mut updated = protected.rewrap_password(&old, &new, &params)?;
            if let Some(master) = master.as_deref() {
                if updated.master.is_none() || updated.needs_rewrap(&params) {
                    updated = updated.rewrap_master(&new, master, &params)?;
                }
            }
            Ok(updated)
        })
        .await?
        .map_err(|e| match e {
            CryptoError::AuthenticationFailed => {
                AccessError::Forbidden("current password is incorrect".into())
            }
            other => other.into(),
        })?;

        material.private_key = updated;
        self.stores.identities.replace_principal(material).await?;
        info!(principal = %actor.id, "password changed");
        Ok(())
    }

    // ── Records ──

    /// Stores a record uploaded by a doctor for a patient.
    ///
    /// The content key is sealed for the patient, an optional uploader
    /// signature over `data_hash` is verified, and the upload is committed
    /// to the ledger.
    pub async fn upload_record(
        &self,
        actor: &Principal,
        upload: RecordUpload,
    ) -> AccessResult<Record> {
        authorize(actor, Operation::UploadRecord)?;
        let patient = self.fetch_with_role(&upload.patient_id, Role::Patient).await?;

        if upload.content_key.len() != KEY_SIZE {
            return Err(AccessError::EnvelopeInvalid(format!(
                "content key must be {KEY_SIZE} bytes, got {}",
                upload.content_key.len()
            )));
        }

        let signature_der_b64 = match &upload.signature {
            Some(signature) => {
                let uploader = self.fetch_with_role(&actor.id, Role::Doctor).await?;
                verify_record_signature(
                    &uploader.public_key()?,
                    upload.data_hash.as_bytes(),
                    signature,
                )?;
                Some(encode_b64(signature))
            }
            None => None,
        };

        let patient_envelope = wrap_for_recipient(&patient.public_key()?, &upload.content_key)?;
        let block = self
            .append_block(NewBlock::new(
                &actor.id,
                &patient.id,
                &upload.content_ref,
                &upload.data_hash,
            ))
            .await?;

        let record = Record {
            id: new_id(),
            patient_id: patient.id,
            uploaded_by: actor.id.clone(),
            filename: upload.filename,
            content_ref: upload.content_ref,
            data_hash: upload.data_hash,
            patient_envelope,
            signature_der_b64,
            block_id: block.id,
            uploaded_at: Utc::now(),
        };
        self.stores.records.insert_record(record.clone()).await?;
        self.log(AccessLogEntry::new(
            &record.patient_id,
            &actor.id,
            Some(record.id.clone()),
            AccessAction::RecordUploaded,
        ))
        .await?;

        info!(
            record = %record.id,
            patient = %record.patient_id,
            doctor = %actor.id,
            block = block.id,
            "record uploaded"
        );
        Ok(record)
    }

    // ── Access requests ──

    /// A doctor asks a patient for access.
    ///
    /// Re-requesting resets the existing grant for the pair to pending and
    /// refreshes its timestamp; it never creates a second row.
    pub async fn request_access(
        &self,
        actor: &Principal,
        patient_id: &str,
    ) -> AccessResult<AccessGrant> {
        authorize(actor, Operation::RequestAccess)?;
        self.fetch_with_role(patient_id, Role::Patient).await?;

        let (grant, previous) = self
            .stores
            .grants
            .upsert_grant(AccessGrant::new(
                patient_id,
                &actor.id,
                None,
                GrantStatus::Pending,
            ))
            .await?;
        self.log(AccessLogEntry::new(
            patient_id,
            &actor.id,
            None,
            AccessAction::AccessRequested,
        ))
        .await?;

        debug!(
            grant = %grant.id,
            patient = patient_id,
            doctor = %actor.id,
            renewed = previous.is_some(),
            "access requested"
        );
        Ok(grant)
    }

    /// Withdraws the caller's own pending request.
    pub async fn cancel_request(&self, actor: &Principal, grant_id: &str) -> AccessResult<()> {
        authorize(actor, Operation::CancelRequest)?;
        let grant = self.grant_by_id(grant_id).await?;
        if grant.doctor_id != actor.id {
            return Err(AccessError::Forbidden(format!(
                "grant {grant_id} was not requested by {}",
                actor.id
            )));
        }

        let removed = self
            .stores
            .grants
            .delete_grant(grant_id, Some(GrantStatus::Pending))
            .await?;
        self.log(AccessLogEntry::new(
            &removed.patient_id,
            &actor.id,
            removed.record_id.clone(),
            AccessAction::RequestCancelled,
        ))
        .await?;
        debug!(grant = grant_id, "access request cancelled");
        Ok(())
    }

    /// The owning patient approves or rejects a pending request.
    pub async fn respond_to_request(
        &self,
        actor: &Principal,
        grant_id: &str,
        decision: Decision,
    ) -> AccessResult<AccessGrant> {
        authorize(actor, Operation::RespondToRequest)?;
        let grant = self.grant_by_id(grant_id).await?;
        if grant.patient_id != actor.id {
            return Err(AccessError::Forbidden(format!(
                "grant {grant_id} does not belong to {}",
                actor.id
            )));
        }

        let updated = self
            .stores
            .grants
            .transition_grant(grant_id, GrantStatus::Pending, decision.status(), Utc::now())
            .await?;
        let action = match decision {
            Decision::Approve => AccessAction::RequestApproved,
            Decision::Reject => AccessAction::RequestRejected,
        };
        self.log(AccessLogEntry::new(
            &updated.patient_id,
            &updated.doctor_id,
            updated.record_id.clone(),
            action,
        ))
        .await?;

        info!(grant = grant_id, status = %updated.status, "access request answered");
        Ok(updated)
    }

    // ── Key grants ──

    /// Re-seals a record's content key for a doctor.
    ///
    /// The patient's envelope is opened with the key obtained from
    /// `credential`, the content key is sealed for the doctor's public key,
    /// and the resulting grant is persisted and committed to the ledger. Any
    /// cryptographic failure aborts before anything is written.
    ///
    /// The configured grant timeout bounds the lookups and the key
    /// re-wrap only. Once the grant is being written the operation runs to
    /// completion, so a `Timeout` always means nothing was persisted.
    pub async fn grant_record_key(
        &self,
        actor: &Principal,
        doctor_id: &str,
        record_id: &str,
        credential: PatientCredential,
    ) -> AccessResult<AccessGrant> {
        authorize(actor, Operation::GrantRecordKey)?;
        let deadline = self.config.grant_timeout();

        let (record, doctor_envelope) = match timeout(
            deadline,
            self.reseal_for_doctor(actor, doctor_id, record_id, credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    patient = %actor.id,
                    doctor = doctor_id,
                    record = record_id,
                    ?deadline,
                    "record key grant timed out"
                );
                return Err(AccessError::Timeout(deadline));
            }
        };

        self.commit_record_grant(actor, doctor_id, &record, doctor_envelope)
            .await
    }

    /// Looks up the doctor and the patient's record and seals the record's
    /// content key for the doctor. Writes nothing.
    async fn reseal_for_doctor(
        &self,
        actor: &Principal,
        doctor_id: &str,
        record_id: &str,
        credential: PatientCredential,
    ) -> AccessResult<(Record, EciesEnvelope)> {
        let doctor = self.fetch_with_role(doctor_id, Role::Doctor).await?;
        let record = self
            .stores
            .records
            .get_record(record_id)
            .await?
            .filter(|r| r.patient_id == actor.id)
            .ok_or_else(|| {
                AccessError::NotFound(format!("record {record_id} of patient {}", actor.id))
            })?;
        let doctor_public = doctor.public_key()?;

        let patient_secret = self.unlock_patient_key(&actor.id, credential).await?;
        let doctor_envelope = {
            let content_key = unwrap_with_private(&patient_secret, &record.patient_envelope)?;
            wrap_for_recipient(&doctor_public, &content_key)?
        };
        drop(patient_secret);
        Ok((record, doctor_envelope))
    }

    async fn commit_record_grant(
        &self,
        actor: &Principal,
        doctor_id: &str,
        record: &Record,
        doctor_envelope: EciesEnvelope,
    ) -> AccessResult<AccessGrant> {
        let fingerprint = doctor_envelope.fingerprint();
        let mut grant = AccessGrant::new(
            &actor.id,
            doctor_id,
            Some(record.id.clone()),
            GrantStatus::Approved,
        );
        grant.doctor_envelope = Some(doctor_envelope);
        let (grant, previous) = self.stores.grants.upsert_grant(grant).await?;

        let event = AccessEvent {
            action: LedgerAction::Grant,
            patient_id: &actor.id,
            doctor_id,
            record_id: Some(record.id.as_str()),
            grant_ids: vec![grant.id.as_str()],
            envelope_fingerprint: Some(fingerprint),
        };
        if let Err(err) = self.commit_event(&event, &record.content_ref).await {
            warn!(grant = %grant.id, error = %err, "ledger append failed, rolling back grant");
            match previous {
                Some(previous) => self.restore_grants(vec![previous]).await,
                None => {
                    if let Err(e) = self.stores.grants.delete_grant(&grant.id, None).await {
                        warn!(grant = %grant.id, error = %e, "grant rollback failed");
                    }
                }
            }
            return Err(err);
        }

        self.log(AccessLogEntry::new(
            &actor.id,
            doctor_id,
            Some(record.id.clone()),
            AccessAction::KeyGranted,
        ))
        .await?;
        info!(
            grant = %grant.id,
            patient = %actor.id,
            doctor = doctor_id,
            record = %record.id,
            "record key granted"
        );
        Ok(grant)
    }

    async fn unlock_patient_key(
        &self,
        patient_id: &str,
        credential: PatientCredential,
    ) -> AccessResult<SecretKey> {
        match credential {
            PatientCredential::PrivateKey(secret) => Ok(secret),
            PatientCredential::Password(password) => {
                let material = self.stores.identities.fetch_principal(patient_id).await?;
                Ok(spawn_blocking(move || material.private_key.unlock_with_password(&password))
                    .await??)
            }
            PatientCredential::MasterFallback => {
                let master = self.master.clone().ok_or_else(|| {
                    AccessError::MasterSecretUnavailable("no master secret configured".into())
                })?;
                let material = self.stores.identities.fetch_principal(patient_id).await?;
                Ok(spawn_blocking(move || material.private_key.unlock_with_master(&master))
                    .await??)
            }
        }
    }

    /// Removes a doctor's access to a patient.
    ///
    /// With a `record_id`, deletes that record's grant together with the
    /// pair's connection-wide approval; other record grants stay. Without
    /// one, deletes every grant between the pair. The whole removal is
    /// committed to the ledger as a single block naming every revoked grant;
    /// if any delete or the append fails, the grants already removed are
    /// restored.
    ///
    /// The content key is not rotated: an envelope the doctor already
    /// fetched stays decryptable with the doctor's private key.
    pub async fn revoke_access(
        &self,
        actor: &Principal,
        patient_id: &str,
        doctor_id: &str,
        record_id: Option<&str>,
    ) -> AccessResult<Vec<AccessGrant>> {
        authorize(actor, Operation::RevokeAccess)?;
        if actor.role == Role::Patient && actor.id != patient_id {
            return Err(AccessError::Forbidden(format!(
                "patient {} cannot revoke access to patient {patient_id}",
                actor.id
            )));
        }

        let targets: Vec<AccessGrant> = match record_id {
            Some(record_id) => {
                let record_grant = self
                    .stores
                    .grants
                    .find_grant(patient_id, doctor_id, Some(record_id))
                    .await?
                    .ok_or_else(|| {
                        AccessError::NotFound(format!(
                            "grant of record {record_id} to doctor {doctor_id}"
                        ))
                    })?;
                let connection_grant = self
                    .stores
                    .grants
                    .find_grant(patient_id, doctor_id, None)
                    .await?;
                std::iter::once(record_grant).chain(connection_grant).collect()
            }
            None => self
                .stores
                .grants
                .grants_for_patient(patient_id)
                .await?
                .into_iter()
                .filter(|g| g.doctor_id == doctor_id)
                .collect(),
        };
        if targets.is_empty() {
            return Err(AccessError::NotFound(format!(
                "grants of patient {patient_id} to doctor {doctor_id}"
            )));
        }

        let content_ref = if record_id.is_some() || targets.len() == 1 {
            self.content_ref_for(&targets[0]).await?
        } else {
            format!("pair:{patient_id}:{doctor_id}")
        };

        let mut removed = Vec::with_capacity(targets.len());
        for grant in &targets {
            match self.stores.grants.delete_grant(&grant.id, None).await {
                Ok(grant) => removed.push(grant),
                Err(err) => {
                    warn!(grant = %grant.id, error = %err, "revoke failed, restoring removed grants");
                    self.restore_grants(removed).await;
                    return Err(err);
                }
            }
        }

        let committed = {
            let event = AccessEvent {
                action: LedgerAction::Revoke,
                patient_id,
                doctor_id,
                record_id,
                grant_ids: removed.iter().map(|g| g.id.as_str()).collect(),
                envelope_fingerprint: None,
            };
            self.commit_event(&event, &content_ref).await
        };
        if let Err(err) = committed {
            warn!(
                patient = patient_id,
                doctor = doctor_id,
                error = %err,
                "ledger append failed, restoring revoked grants"
            );
            self.restore_grants(removed).await;
            return Err(err);
        }

        for grant in &removed {
            self.log(AccessLogEntry::new(
                patient_id,
                doctor_id,
                grant.record_id.clone(),
                AccessAction::AccessRevoked,
            ))
            .await?;
        }
        info!(
            patient = patient_id,
            doctor = doctor_id,
            revoked = removed.len(),
            "access revoked"
        );
        Ok(removed)
    }

    /// Whether the doctor holds any approved grant from the patient.
    pub async fn check_access(
        &self,
        actor: &Principal,
        doctor_id: &str,
        patient_id: &str,
    ) -> AccessResult<bool> {
        authorize(actor, Operation::CheckAccess)?;
        if actor.role == Role::Doctor && actor.id != doctor_id {
            return Err(AccessError::Forbidden(format!(
                "doctor {} cannot check access of doctor {doctor_id}",
                actor.id
            )));
        }
        Ok(self
            .stores
            .grants
            .grants_for_patient(patient_id)
            .await?
            .iter()
            .any(|g| g.doctor_id == doctor_id && g.is_approved()))
    }

    /// Returns the envelope sealed for the calling doctor for `record_id`.
    pub async fn doctor_record_key(
        &self,
        actor: &Principal,
        record_id: &str,
    ) -> AccessResult<EciesEnvelope> {
        authorize(actor, Operation::FetchRecordKey)?;
        let record = self
            .stores
            .records
            .get_record(record_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("record {record_id}")))?;

        let envelope = self
            .stores
            .grants
            .find_grant(&record.patient_id, &actor.id, Some(record_id))
            .await?
            .filter(AccessGrant::is_approved)
            .and_then(|g| g.doctor_envelope)
            .ok_or_else(|| {
                AccessError::Forbidden(format!(
                    "no key for record {record_id} has been granted to {}",
                    actor.id
                ))
            })?;

        self.log(AccessLogEntry::new(
            &record.patient_id,
            &actor.id,
            Some(record.id.clone()),
            AccessAction::RecordKeyFetched,
        ))
        .await?;
        Ok(envelope)
    }

    // ── Grant queries ──

    /// The caller's pending requests, oldest first.
    pub async fn pending_requests(&self, actor: &Principal) -> AccessResult<Vec<AccessGrant>> {
        authorize(actor, Operation::ListPendingRequests)?;
        Ok(self
            .stores
            .grants
            .grants_for_patient(&actor.id)
            .await?
            .into_iter()
            .filter(|g| g.status == GrantStatus::Pending)
            .collect())
    }

    /// Doctors holding an approved grant from the calling patient.
    pub async fn authorized_doctors(&self, actor: &Principal) -> AccessResult<Vec<String>> {
        authorize(actor, Operation::ListAuthorized)?;
        self.require_role(actor, Role::Patient)?;
        let doctors: BTreeSet<String> = self
            .stores
            .grants
            .grants_for_patient(&actor.id)
            .await?
            .into_iter()
            .filter(AccessGrant::is_approved)
            .map(|g| g.doctor_id)
            .collect();
        Ok(doctors.into_iter().collect())
    }

    /// Patients who granted the calling doctor access.
    pub async fn authorized_patients(&self, actor: &Principal) -> AccessResult<Vec<String>> {
        authorize(actor, Operation::ListAuthorized)?;
        self.require_role(actor, Role::Doctor)?;
        let patients: BTreeSet<String> = self
            .stores
            .grants
            .grants_for_doctor(&actor.id)
            .await?
            .into_iter()
            .filter(AccessGrant::is_approved)
            .map(|g| g.patient_id)
            .collect();
        Ok(patients.into_iter().collect())
    }

    // ── Connections ──

    /// A patient asks to be connected with a doctor.
    pub async fn request_connection(
        &self,
        actor: &Principal,
        doctor_id: &str,
    ) -> AccessResult<Connection> {
        authorize(actor, Operation::RequestConnection)?;
        self.fetch_with_role(doctor_id, Role::Doctor).await?;

        let connection = Connection::new(&actor.id, doctor_id);
        self.stores
            .connections
            .insert_connection(connection.clone())
            .await?;
        self.log(AccessLogEntry::new(
            &actor.id,
            doctor_id,
            None,
            AccessAction::ConnectionRequested,
        ))
        .await?;
        debug!(connection = %connection.id, "connection requested");
        Ok(connection)
    }

    /// The addressed doctor accepts or rejects a connection. Accepting
    /// approves the pair's connection-wide grant.
    pub async fn respond_connection(
        &self,
        actor: &Principal,
        connection_id: &str,
        accept: bool,
    ) -> AccessResult<Connection> {
        authorize(actor, Operation::RespondConnection)?;
        let connection = self
            .stores
            .connections
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("connection {connection_id}")))?;
        if connection.doctor_id != actor.id {
            return Err(AccessError::Forbidden(format!(
                "connection {connection_id} is not addressed to {}",
                actor.id
            )));
        }

        let status = if accept {
            ConnectionStatus::Accepted
        } else {
            ConnectionStatus::Rejected
        };
        let resolved = self
            .stores
            .connections
            .resolve_connection(connection_id, status)
            .await?;

        if accept {
            self.stores
                .grants
                .upsert_grant(AccessGrant::new(
                    &resolved.patient_id,
                    &resolved.doctor_id,
                    None,
                    GrantStatus::Approved,
                ))
                .await?;
        }
        let action = if accept {
            AccessAction::ConnectionAccepted
        } else {
            AccessAction::ConnectionRejected
        };
        self.log(AccessLogEntry::new(
            &resolved.patient_id,
            &resolved.doctor_id,
            None,
            action,
        ))
        .await?;

        info!(connection = connection_id, accepted = accept, "connection answered");
        Ok(resolved)
    }

    /// The caller's connections, oldest first.
    pub async fn connections(&self, actor: &Principal) -> AccessResult<Vec<Connection>> {
        authorize(actor, Operation::ListAuthorized)?;
        match actor.role {
            Role::Patient => self.stores.connections.connections_for_patient(&actor.id).await,
            Role::Doctor => self.stores.connections.connections_for_doctor(&actor.id).await,
            Role::Admin => Err(AccessError::Forbidden("admins have no connections".into())),
        }
    }

    // ── Access log ──

    /// Log entries involving `patient_id`, newest first. Patients may only
    /// read their own.
    pub async fn patient_logs(
        &self,
        actor: &Principal,
        patient_id: &str,
    ) -> AccessResult<Vec<AccessLogEntry>> {
        authorize(actor, Operation::ViewAccessLog)?;
        if actor.role != Role::Admin && !(actor.role == Role::Patient && actor.id == patient_id) {
            return Err(AccessError::Forbidden(format!(
                "{} {} cannot read the log of patient {patient_id}",
                actor.role, actor.id
            )));
        }
        self.stores.access_log.entries_for_patient(patient_id).await
    }

    /// Log entries involving `doctor_id`, newest first. Doctors may only
    /// read their own.
    pub async fn doctor_logs(
        &self,
        actor: &Principal,
        doctor_id: &str,
    ) -> AccessResult<Vec<AccessLogEntry>> {
        authorize(actor, Operation::ViewAccessLog)?;
        if actor.role != Role::Admin && !(actor.role == Role::Doctor && actor.id == doctor_id) {
            return Err(AccessError::Forbidden(format!(
                "{} {} cannot read the log of doctor {doctor_id}",
                actor.role, actor.id
            )));
        }
        self.stores.access_log.entries_for_doctor(doctor_id).await
    }

    // ── Ledger ──

    /// Strict verification of the whole chain.
    pub async fn verify_ledger(&self, actor: &Principal) -> AccessResult<ChainVerification> {
        authorize(actor, Operation::VerifyLedger)?;
        let ledger = Arc::clone(&self.ledger);
        Ok(spawn_blocking(move || ledger.verify_chain()).await??)
    }

    /// Linkage-only verification of the whole chain.
    pub async fn verify_ledger_linkage(
        &self,
        actor: &Principal,
    ) -> AccessResult<ChainVerification> {
        authorize(actor, Operation::VerifyLedger)?;
        let ledger = Arc::clone(&self.ledger);
        Ok(spawn_blocking(move || ledger.verify_linkage()).await??)
    }

    // ── Helpers ──

    fn require_role(&self, actor: &Principal, role: Role) -> AccessResult<()> {
        if actor.role == role {
            Ok(())
        } else {
            Err(AccessError::Forbidden(format!("{} {} is not a {role}", actor.role, actor.id)))
        }
    }

    async fn fetch_with_role(&self, id: &str, role: Role) -> AccessResult<PrincipalKeyMaterial> {
        let material = self
            .stores
            .identities
            .fetch_principal(id)
            .await
            .map_err(|e| match e {
                AccessError::NotFound(_) => AccessError::NotFound(format!("{role} {id}")),
                other => other,
            })?;
        if material.role != role {
            return Err(AccessError::NotFound(format!("{role} {id}")));
        }
        Ok(material)
    }

    async fn grant_by_id(&self, id: &str) -> AccessResult<AccessGrant> {
        self.stores
            .grants
            .get_grant(id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("grant {id}")))
    }

    async fn content_ref_for(&self, grant: &AccessGrant) -> AccessResult<String> {
        let record = match &grant.record_id {
            Some(record_id) => self.stores.records.get_record(record_id).await?,
            None => None,
        };
        Ok(match record {
            Some(record) => record.content_ref,
            None => format!("grant:{}", grant.id),
        })
    }

    async fn append_block(&self, block: NewBlock) -> AccessResult<Block> {
        let ledger = Arc::clone(&self.ledger);
        Ok(spawn_blocking(move || ledger.append_block(block)).await??)
    }

    async fn commit_event(&self, event: &AccessEvent<'_>, content_ref: &str) -> AccessResult<Block> {
        self.append_block(event.to_block(content_ref)?).await
    }

    async fn restore_grants(&self, grants: Vec<AccessGrant>) {
        for grant in grants {
            let id = grant.id.clone();
            if let Err(e) = self.stores.grants.restore_grant(grant).await {
                warn!(grant = %id, error = %e, "grant rollback failed");
            }
        }
    }

    async fn log(&self, entry: AccessLogEntry) -> AccessResult<()> {
        self.stores.access_log.append_entry(entry).await
    }
}
