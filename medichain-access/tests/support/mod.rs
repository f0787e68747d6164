//! Shared fixtures: an in-memory service with one registered patient,
//! doctor and admin.

#![allow(dead_code)]

use medichain_access::{
    AccessConfig, AccessService, Principal, Record, RecordUpload, Role, Stores,
};
use medichain_crypto::{
    KeyPair, MIN_KDF_ITERATIONS, MasterSecret, SymmetricKey, generate_keypair,
};
use medichain_ledger::{Ledger, LedgerStore, MemoryLedgerStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

pub const PASSWORD: &str = "correct horse battery staple";

pub struct Party {
    pub principal: Principal,
    pub keys: KeyPair,
}

impl Party {
    pub fn id(&self) -> &str {
        &self.principal.id
    }
}

pub struct Harness {
    pub service: AccessService,
    pub stores: Stores,
    pub ledger: Arc<Ledger>,
    pub patient: Party,
    pub doctor: Party,
    pub admin: Party,
}

impl Harness {
    /// Registers another principal with `PASSWORD`.
    pub async fn register(&self, id: &str, role: Role) -> Party {
        let keys = generate_keypair();
        self.service
            .register_principal(id, role, &keys, PASSWORD)
            .await
            .expect("registration must succeed");
        Party {
            principal: Principal::new(id, role),
            keys,
        }
    }

    /// `doctor` uploads a record for `patient_id` sealed under `content_key`.
    pub async fn upload(
        &self,
        doctor: &Party,
        patient_id: &str,
        name: &str,
        content_key: &SymmetricKey,
    ) -> Record {
        self.service
            .upload_record(&doctor.principal, upload_for(patient_id, name, content_key))
            .await
            .expect("upload must succeed")
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.all_blocks().expect("ledger readable").len()
    }
}

pub fn upload_for(patient_id: &str, name: &str, content_key: &SymmetricKey) -> RecordUpload {
    RecordUpload {
        patient_id: patient_id.to_string(),
        filename: format!("{name}.pdf"),
        content_ref: format!("bafy-{name}"),
        data_hash: hex::encode(Sha256::digest(name.as_bytes())),
        content_key: Zeroizing::new(content_key.as_bytes().to_vec()),
        signature: None,
    }
}

pub fn test_config() -> AccessConfig {
    AccessConfig {
        kdf_iterations: MIN_KDF_ITERATIONS,
        ..AccessConfig::default()
    }
}

pub fn test_master() -> MasterSecret {
    MasterSecret::from_bytes([7u8; 32])
}

pub async fn harness() -> Harness {
    harness_with(test_config(), Stores::in_memory(), None).await
}

pub async fn harness_with_master() -> Harness {
    harness_with(test_config(), Stores::in_memory(), Some(test_master())).await
}

/// Installs a subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn harness_with(
    config: AccessConfig,
    stores: Stores,
    master: Option<MasterSecret>,
) -> Harness {
    harness_with_ledger_store(config, stores, master, Arc::new(MemoryLedgerStore::new())).await
}

pub async fn harness_with_ledger_store(
    config: AccessConfig,
    stores: Stores,
    master: Option<MasterSecret>,
    ledger_store: Arc<dyn LedgerStore>,
) -> Harness {
    init_tracing();
    let ledger = Arc::new(Ledger::new(ledger_store));
    let service =
        AccessService::with_master_secret(config, stores.clone(), Arc::clone(&ledger), master)
            .expect("service must build");

    let mut parties = Vec::new();
    for (id, role) in [
        ("patient-1", Role::Patient),
        ("doctor-1", Role::Doctor),
        ("admin-1", Role::Admin),
    ] {
        let keys = generate_keypair();
        service
            .register_principal(id, role, &keys, PASSWORD)
            .await
            .expect("registration must succeed");
        parties.push(Party {
            principal: Principal::new(id, role),
            keys,
        });
    }
    let admin = parties.pop().expect("admin");
    let doctor = parties.pop().expect("doctor");
    let patient = parties.pop().expect("patient");

    Harness {
        service,
        stores,
        ledger,
        patient,
        doctor,
        admin,
    }
}
