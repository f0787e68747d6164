//! End-to-end tests for upload, key grant, key fetch and revocation.

mod support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medichain_access::{
    AccessConfig, AccessError, AccessResult, AccessService, Decision, IdentityStore,
    MemoryIdentityStore, PatientCredential, PrincipalKeyMaterial, Role, Stores,
};
use medichain_crypto::{
    MIN_KDF_ITERATIONS, generate_content_key, generate_keypair, sign_record, unwrap_with_private,
};
use medichain_ledger::{
    Block, BlockFilter, Ledger, LedgerError, LedgerResult, LedgerStore, MemoryLedgerStore,
    NewBlock,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use support::{
    PASSWORD, harness, harness_with, harness_with_ledger_store, harness_with_master, test_config,
    test_master, upload_for,
};

#[tokio::test]
async fn patient_and_doctor_recover_the_same_content_key() {
    let h = harness().await;
    let key = generate_content_key();
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &key).await;

    let from_patient = unwrap_with_private(&h.patient.keys.secret, &record.patient_envelope).unwrap();
    assert_eq!(&from_patient[..], &key.as_bytes()[..]);

    let grant = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap();
    assert!(grant.is_approved());
    assert_eq!(grant.record_id.as_deref(), Some(record.id.as_str()));

    let envelope = h
        .service
        .doctor_record_key(&h.doctor.principal, &record.id)
        .await
        .unwrap();
    assert_eq!(Some(&envelope), grant.doctor_envelope.as_ref());
    let from_doctor = unwrap_with_private(&h.doctor.keys.secret, &envelope).unwrap();
    assert_eq!(&from_doctor[..], &key.as_bytes()[..]);

    assert!(
        h.service
            .check_access(&h.doctor.principal, h.doctor.id(), h.patient.id())
            .await
            .unwrap()
    );

    // Upload block plus grant block, both intact.
    let verification = h.service.verify_ledger(&h.admin.principal).await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.total_blocks, 2);
    let blocks = h.ledger.blocks_for_record(&record.content_ref).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].data_hash, record.data_hash);
    assert_eq!(blocks[1].previous_hash, blocks[0].hash_value);
}

#[tokio::test]
async fn revocation_removes_access_but_not_fetched_keys() {
    let h = harness().await;
    let key = generate_content_key();
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &key).await;

    let request = h
        .service
        .request_access(&h.doctor.principal, h.patient.id())
        .await
        .unwrap();
    h.service
        .respond_to_request(&h.patient.principal, &request.id, Decision::Approve)
        .await
        .unwrap();
    h.service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap();
    let fetched = h
        .service
        .doctor_record_key(&h.doctor.principal, &record.id)
        .await
        .unwrap();

    let removed = h
        .service
        .revoke_access(&h.patient.principal, h.patient.id(), h.doctor.id(), Some(&record.id))
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);

    assert!(
        !h.service
            .check_access(&h.doctor.principal, h.doctor.id(), h.patient.id())
            .await
            .unwrap()
    );
    let row = h
        .stores
        .grants
        .find_grant(h.patient.id(), h.doctor.id(), Some(&record.id))
        .await
        .unwrap();
    assert!(row.is_none());

    let err = h
        .service
        .doctor_record_key(&h.doctor.principal, &record.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    // The key is not rotated: an envelope fetched earlier still opens.
    let still = unwrap_with_private(&h.doctor.keys.secret, &fetched).unwrap();
    assert_eq!(&still[..], &key.as_bytes()[..]);

    // Upload, grant, and a single revoke block for both removed grants.
    assert_eq!(h.ledger_len(), 3);
    assert!(h.service.verify_ledger(&h.admin.principal).await.unwrap().valid);
}

#[tokio::test]
async fn record_revoke_keeps_other_record_grants() {
    let h = harness().await;
    let first = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;
    let second = h.upload(&h.doctor, h.patient.id(), "scan-2", &generate_content_key()).await;
    for record in [&first, &second] {
        h.service
            .grant_record_key(
                &h.patient.principal,
                h.doctor.id(),
                &record.id,
                PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
            )
            .await
            .unwrap();
    }

    h.service
        .revoke_access(&h.patient.principal, h.patient.id(), h.doctor.id(), Some(&first.id))
        .await
        .unwrap();

    assert!(
        h.service
            .check_access(&h.doctor.principal, h.doctor.id(), h.patient.id())
            .await
            .unwrap()
    );
    assert!(h.service.doctor_record_key(&h.doctor.principal, &second.id).await.is_ok());
}

#[tokio::test]
async fn full_revoke_removes_every_grant_for_the_pair() {
    let h = harness().await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;
    h.service
        .request_access(&h.doctor.principal, h.patient.id())
        .await
        .unwrap();
    h.service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap();

    let removed = h
        .service
        .revoke_access(&h.admin.principal, h.patient.id(), h.doctor.id(), None)
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert!(h.stores.grants.grants_for_patient(h.patient.id()).await.unwrap().is_empty());

    let err = h
        .service
        .revoke_access(&h.admin.principal, h.patient.id(), h.doctor.id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn revoke_of_missing_record_grant_is_not_found() {
    let h = harness().await;
    let err = h
        .service
        .revoke_access(&h.patient.principal, h.patient.id(), h.doctor.id(), Some("no-such-record"))
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{err}");
    assert_eq!(h.ledger_len(), 0);
}

#[tokio::test]
async fn patients_cannot_revoke_for_other_patients() {
    let h = harness().await;
    let other = h.register("patient-2", Role::Patient).await;
    let err = h
        .service
        .revoke_access(&other.principal, h.patient.id(), h.doctor.id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");
}

#[tokio::test]
async fn wrong_private_key_aborts_without_side_effects() {
    let h = harness().await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;

    let impostor = generate_keypair();
    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(impostor.secret),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::EnvelopeInvalid(_)), "{err}");

    assert!(h.stores.grants.grants_for_patient(h.patient.id()).await.unwrap().is_empty());
    assert_eq!(h.ledger_len(), 1);
}

#[tokio::test]
async fn grant_with_password_credential() {
    let h = harness().await;
    let key = generate_content_key();
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &key).await;

    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::password("not the password"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::EnvelopeInvalid(_)), "{err}");

    let grant = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::password(PASSWORD),
        )
        .await
        .unwrap();
    let envelope = grant.doctor_envelope.expect("approved grant carries an envelope");
    let opened = unwrap_with_private(&h.doctor.keys.secret, &envelope).unwrap();
    assert_eq!(&opened[..], &key.as_bytes()[..]);
}

#[tokio::test]
async fn master_fallback_requires_a_master_secret() {
    let h = harness().await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;
    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::MasterFallback,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::MasterSecretUnavailable(_)), "{err}");

    let h = harness_with_master().await;
    let key = generate_content_key();
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &key).await;
    let grant = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::MasterFallback,
        )
        .await
        .unwrap();
    let opened =
        unwrap_with_private(&h.doctor.keys.secret, grant.doctor_envelope.as_ref().unwrap()).unwrap();
    assert_eq!(&opened[..], &key.as_bytes()[..]);
}

#[tokio::test]
async fn required_master_wrap_without_secret_fails_at_startup() {
    let config = AccessConfig {
        require_master_wrap: true,
        ..test_config()
    };
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStore::new())));
    let result = AccessService::with_master_secret(config, Stores::in_memory(), ledger, None);
    assert!(matches!(result, Err(AccessError::MasterSecretUnavailable(_))));
}

#[tokio::test]
async fn regranting_replaces_the_envelope_in_place() {
    let h = harness().await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;
    let first = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap();
    let second = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::password(PASSWORD),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.doctor_envelope, second.doctor_envelope);
    assert_eq!(h.stores.grants.grants_for_doctor(h.doctor.id()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn grant_checks_record_and_doctor() {
    let h = harness().await;
    let other = h.register("patient-2", Role::Patient).await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;

    // Another patient's record looks absent.
    let err = h
        .service
        .grant_record_key(
            &other.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(other.keys.secret.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{err}");

    // A patient id is not a doctor.
    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            other.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{err}");

    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            "no-such-record",
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn roles_gate_every_entry_point() {
    let h = harness().await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;

    let err = h
        .service
        .upload_record(
            &h.patient.principal,
            upload_for(h.patient.id(), "self", &generate_content_key()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    let err = h
        .service
        .grant_record_key(
            &h.doctor.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.doctor.keys.secret.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    let err = h.service.verify_ledger(&h.doctor.principal).await.unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    let err = h
        .service
        .request_access(&h.patient.principal, h.patient.id())
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    let other = h.register("doctor-2", Role::Doctor).await;
    let err = h
        .service
        .check_access(&other.principal, h.doctor.id(), h.patient.id())
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    assert!(
        !h.service
            .check_access(&h.admin.principal, h.doctor.id(), h.patient.id())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn upload_verifies_optional_signature() {
    let h = harness().await;
    let key = generate_content_key();

    let mut upload = upload_for(h.patient.id(), "signed", &key);
    upload.signature = Some(sign_record(&h.doctor.keys.secret, upload.data_hash.as_bytes()));
    let record = h.service.upload_record(&h.doctor.principal, upload).await.unwrap();
    assert!(record.signature_der_b64.is_some());
    assert_eq!(record.block_id, 1);

    let mut forged = upload_for(h.patient.id(), "forged", &key);
    forged.signature = Some(sign_record(&h.patient.keys.secret, forged.data_hash.as_bytes()));
    let err = h
        .service
        .upload_record(&h.doctor.principal, forged)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::SignatureInvalid), "{err}");

    assert_eq!(h.ledger_len(), 1);
    assert_eq!(h.stores.records.records_for_patient(h.patient.id()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn upload_rejects_short_content_key_and_unknown_patient() {
    let h = harness().await;
    let mut upload = upload_for(h.patient.id(), "short", &generate_content_key());
    upload.content_key.truncate(16);
    let err = h
        .service
        .upload_record(&h.doctor.principal, upload)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::EnvelopeInvalid(_)), "{err}");

    let err = h
        .service
        .upload_record(
            &h.doctor.principal,
            upload_for("patient-404", "lost", &generate_content_key()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{err}");
    assert_eq!(h.ledger_len(), 0);
}

#[tokio::test]
async fn password_change_rewraps_the_private_key() {
    let h = harness().await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;

    let err = h
        .service
        .change_password(&h.patient.principal, "wrong", "new secret")
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Forbidden(_)), "{err}");

    h.service
        .change_password(&h.patient.principal, PASSWORD, "new secret")
        .await
        .unwrap();

    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::password(PASSWORD),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::EnvelopeInvalid(_)), "{err}");

    h.service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::password("new secret"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn password_change_adds_a_missing_master_wrap() {
    let h = harness().await;
    let before = h.stores.identities.fetch_principal(h.patient.id()).await.unwrap();
    assert!(before.private_key.master.is_none());

    // Same stores and ledger, now running with a master secret and a
    // higher iteration count.
    let iterations = MIN_KDF_ITERATIONS + 1_000;
    let upgraded = AccessService::with_master_secret(
        AccessConfig {
            kdf_iterations: iterations,
            ..test_config()
        },
        h.stores.clone(),
        Arc::clone(&h.ledger),
        Some(test_master()),
    )
    .unwrap();
    upgraded
        .change_password(&h.patient.principal, PASSWORD, "new secret")
        .await
        .unwrap();

    let after = h.stores.identities.fetch_principal(h.patient.id()).await.unwrap();
    assert_eq!(after.private_key.password.kdf_iterations, iterations);
    let master = after.private_key.master.as_ref().expect("master wrap added");
    assert_eq!(master.kdf_iterations, iterations);
    assert!(after.private_key.unlock_with_master(&test_master()).is_ok());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let h = harness().await;
    let err = h
        .service
        .register_principal(h.patient.id(), Role::Patient, &generate_keypair(), PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Conflict(_)), "{err}");
}

/// Identity store whose lookups take longer than any test grant deadline.
#[derive(Default)]
struct SlowIdentityStore {
    inner: MemoryIdentityStore,
}

#[async_trait]
impl IdentityStore for SlowIdentityStore {
    async fn fetch_principal(&self, id: &str) -> AccessResult<PrincipalKeyMaterial> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.inner.fetch_principal(id).await
    }

    async fn insert_principal(&self, material: PrincipalKeyMaterial) -> AccessResult<()> {
        self.inner.insert_principal(material).await
    }

    async fn replace_principal(&self, material: PrincipalKeyMaterial) -> AccessResult<()> {
        self.inner.replace_principal(material).await
    }
}

#[tokio::test]
async fn grant_times_out_without_persisting() {
    let stores = Stores {
        identities: Arc::new(SlowIdentityStore::default()),
        ..Stores::in_memory()
    };
    let config = AccessConfig {
        grant_timeout_ms: 50,
        ..test_config()
    };
    let h = harness_with(config, stores, None).await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;

    let err = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Timeout(d) if d == Duration::from_millis(50)), "{err}");

    assert!(h.stores.grants.grants_for_patient(h.patient.id()).await.unwrap().is_empty());
    assert_eq!(h.ledger_len(), 1);
}

/// Ledger store whose appends block the calling thread before writing.
struct SlowLedgerStore {
    inner: MemoryLedgerStore,
    delay: Duration,
}

impl LedgerStore for SlowLedgerStore {
    fn tail(&self) -> LedgerResult<Option<Block>> {
        self.inner.tail()
    }

    fn append_linked(&self, entry: NewBlock, timestamp: DateTime<Utc>) -> LedgerResult<Block> {
        std::thread::sleep(self.delay);
        self.inner.append_linked(entry, timestamp)
    }

    fn list_ordered(&self) -> LedgerResult<Vec<Block>> {
        self.inner.list_ordered()
    }

    fn list_filtered(&self, filter: BlockFilter<'_>) -> LedgerResult<Vec<Block>> {
        self.inner.list_filtered(filter)
    }
}

#[tokio::test]
async fn slow_ledger_append_is_not_cut_off_by_the_deadline() {
    let config = AccessConfig {
        grant_timeout_ms: 100,
        ..test_config()
    };
    let store = Arc::new(SlowLedgerStore {
        inner: MemoryLedgerStore::new(),
        delay: Duration::from_millis(400),
    });
    let h = harness_with_ledger_store(config, Stores::in_memory(), None, store).await;
    let key = generate_content_key();
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &key).await;

    let grant = h
        .service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap();

    assert_eq!(grant.record_id.as_deref(), Some(record.id.as_str()));
    assert_eq!(h.stores.grants.grants_for_patient(h.patient.id()).await.unwrap().len(), 1);
    assert_eq!(h.ledger_len(), 2);
    let envelope = h
        .service
        .doctor_record_key(&h.doctor.principal, &record.id)
        .await
        .unwrap();
    let opened = unwrap_with_private(&h.doctor.keys.secret, &envelope).unwrap();
    assert_eq!(&opened[..], &key.as_bytes()[..]);
}

/// Ledger store that rejects its `fail_at`-th append (1-based).
struct FailingLedgerStore {
    inner: MemoryLedgerStore,
    appends: AtomicUsize,
    fail_at: usize,
}

impl FailingLedgerStore {
    fn failing_at(fail_at: usize) -> Self {
        Self {
            inner: MemoryLedgerStore::new(),
            appends: AtomicUsize::new(0),
            fail_at,
        }
    }
}

impl LedgerStore for FailingLedgerStore {
    fn tail(&self) -> LedgerResult<Option<Block>> {
        self.inner.tail()
    }

    fn append_linked(&self, entry: NewBlock, timestamp: DateTime<Utc>) -> LedgerResult<Block> {
        if self.appends.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(LedgerError::Io(std::io::Error::other("disk full")));
        }
        self.inner.append_linked(entry, timestamp)
    }

    fn list_ordered(&self) -> LedgerResult<Vec<Block>> {
        self.inner.list_ordered()
    }

    fn list_filtered(&self, filter: BlockFilter<'_>) -> LedgerResult<Vec<Block>> {
        self.inner.list_filtered(filter)
    }
}

#[tokio::test]
async fn failed_revoke_commit_restores_grants_and_leaves_no_blocks() {
    // Upload and grant commit blocks 1 and 2; the revoke is the third append.
    let store = Arc::new(FailingLedgerStore::failing_at(3));
    let h = harness_with_ledger_store(test_config(), Stores::in_memory(), None, store).await;
    let record = h.upload(&h.doctor, h.patient.id(), "scan-1", &generate_content_key()).await;
    let request = h
        .service
        .request_access(&h.doctor.principal, h.patient.id())
        .await
        .unwrap();
    h.service
        .respond_to_request(&h.patient.principal, &request.id, Decision::Approve)
        .await
        .unwrap();
    h.service
        .grant_record_key(
            &h.patient.principal,
            h.doctor.id(),
            &record.id,
            PatientCredential::PrivateKey(h.patient.keys.secret.clone()),
        )
        .await
        .unwrap();
    assert_eq!(h.ledger_len(), 2);

    let err = h
        .service
        .revoke_access(&h.patient.principal, h.patient.id(), h.doctor.id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Ledger(_)), "{err}");

    assert_eq!(h.stores.grants.grants_for_patient(h.patient.id()).await.unwrap().len(), 2);
    assert!(h.service.doctor_record_key(&h.doctor.principal, &record.id).await.is_ok());
    assert_eq!(h.ledger_len(), 2);
    assert!(h.service.verify_ledger(&h.admin.principal).await.unwrap().valid);
}
