//! Private-key wrapping at rest.
//!
//! Two KDF-keyed strategies share one bundle shape ([`KdfSealed`]):
//! - **password**: PBKDF2(user password, salt) -> AES-256-GCM
//! - **master**: PBKDF2(server master secret, salt) -> AES-256-GCM
//!
//! The iteration count is stored in every bundle and read back at unwrap
//! time, so raising the default does not break existing wraps.
//!
//! [`WrappedSecret`] is the tagged union over all strategies (including the
//! ECIES recipient envelope). Call sites that only need the plaintext go
//! through [`WrappedSecret::open`] and never match on the strategy.

use crate::cipher::{self, SymmetricKey};
use crate::encoding::b64;
use crate::envelope::{EciesEnvelope, unwrap_with_private};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{KdfParams, SALT_SIZE, derive_from_password};
use crate::key::{decode_private, encode_private};
use crate::master::MasterSecret;
use p256::SecretKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// AEAD blob keyed by a PBKDF2-stretched secret.
///
/// Serializes to `{ "ciphertext_b64", "salt_b64", "nonce_b64", "kdf_iterations" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfSealed {
    #[serde(rename = "ciphertext_b64", with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(rename = "salt_b64", with = "b64")]
    pub salt: Vec<u8>,
    #[serde(rename = "nonce_b64", with = "b64")]
    pub nonce: Vec<u8>,
    pub kdf_iterations: u32,
}

impl KdfSealed {
    fn seal_with(secret: &[u8], plaintext: &[u8], params: &KdfParams) -> CryptoResult<Self> {
        params.validate()?;
        let mut salt = vec![0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let key = derive_from_password(secret, &salt, params.iterations)?;
        let sealed = cipher::seal(&key, plaintext, None)?;
        Ok(Self {
            ciphertext: sealed.ciphertext,
            salt,
            nonce: sealed.nonce.to_vec(),
            kdf_iterations: params.iterations,
        })
    }

    fn open_with(&self, secret: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let key: SymmetricKey = derive_from_password(secret, &self.salt, self.kdf_iterations)?;
        cipher::open(&key, &self.ciphertext, &self.nonce, None)
    }
}

/// Seals `plaintext` under a key stretched from `password`.
pub fn wrap_with_password(
    plaintext: &[u8],
    password: &str,
    params: &KdfParams,
) -> CryptoResult<KdfSealed> {
    KdfSealed::seal_with(password.as_bytes(), plaintext, params)
}

pub fn unwrap_with_password(sealed: &KdfSealed, password: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
    sealed.open_with(password.as_bytes())
}

/// Seals `plaintext` under a key stretched from the server master secret.
pub fn wrap_with_master_secret(
    plaintext: &[u8],
    master: &MasterSecret,
    params: &KdfParams,
) -> CryptoResult<KdfSealed> {
    KdfSealed::seal_with(master.as_bytes(), plaintext, params)
}

pub fn unwrap_with_master_secret(
    sealed: &KdfSealed,
    master: &MasterSecret,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    sealed.open_with(master.as_bytes())
}

/// Any wrapped secret, tagged by the strategy that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum WrappedSecret {
    Password(KdfSealed),
    Master(KdfSealed),
    Ecies(EciesEnvelope),
}

/// Material able to open some [`WrappedSecret`].
#[derive(Clone, Copy)]
pub enum UnwrapKey<'a> {
    Password(&'a str),
    Master(&'a MasterSecret),
    Recipient(&'a SecretKey),
}

impl UnwrapKey<'_> {
    fn scheme(&self) -> &'static str {
        match self {
            UnwrapKey::Password(_) => "password",
            UnwrapKey::Master(_) => "master",
            UnwrapKey::Recipient(_) => "ecies",
        }
    }
}

impl WrappedSecret {
    pub fn scheme(&self) -> &'static str {
        match self {
            WrappedSecret::Password(_) => "password",
            WrappedSecret::Master(_) => "master",
            WrappedSecret::Ecies(_) => "ecies",
        }
    }

    /// Opens the secret with matching key material.
    ///
    /// Supplying material for a different strategy is an
    /// [`CryptoError::EnvelopeInvalid`], not an authentication failure.
    pub fn open(&self, key: UnwrapKey<'_>) -> CryptoResult<Zeroizing<Vec<u8>>> {
        match (self, key) {
            (WrappedSecret::Password(sealed), UnwrapKey::Password(pw)) => {
                unwrap_with_password(sealed, pw)
            }
            (WrappedSecret::Master(sealed), UnwrapKey::Master(master)) => {
                unwrap_with_master_secret(sealed, master)
            }
            (WrappedSecret::Ecies(envelope), UnwrapKey::Recipient(sk)) => {
                unwrap_with_private(sk, envelope)
            }
            (wrapped, key) => Err(CryptoError::EnvelopeInvalid(format!(
                "{} bundle cannot be opened with {} key material",
                wrapped.scheme(),
                key.scheme()
            ))),
        }
    }

    pub fn from_json(json: &str) -> CryptoResult<Self> {
        serde_json::from_str(json).map_err(|e| CryptoError::EnvelopeInvalid(e.to_string()))
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Wraps PKCS#8 private key bytes with the user's password.
pub fn wrap_private_key_with_password(
    private_key_der: &[u8],
    password: &str,
    params: &KdfParams,
) -> CryptoResult<WrappedSecret> {
    wrap_with_password(private_key_der, password, params).map(WrappedSecret::Password)
}

/// Wraps PKCS#8 private key bytes with the server master secret.
///
/// This is the backend fallback path: the operator can decrypt any key
/// wrapped this way.
pub fn wrap_private_key_with_master_secret(
    private_key_der: &[u8],
    master: &MasterSecret,
    params: &KdfParams,
) -> CryptoResult<WrappedSecret> {
    wrap_with_master_secret(private_key_der, master, params).map(WrappedSecret::Master)
}

/// A principal's private key as stored by the identity store: always
/// password-wrapped, optionally also master-wrapped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPrivateKey {
    pub password: KdfSealed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<KdfSealed>,
}

impl ProtectedPrivateKey {
    /// Wraps `secret` under `password` and, when given, the master secret.
    pub fn protect(
        secret: &SecretKey,
        password: &str,
        master: Option<&MasterSecret>,
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        let der = encode_private(secret)?;
        let password_wrap = wrap_with_password(&der, password, params)?;
        let master_wrap = master
            .map(|m| wrap_with_master_secret(&der, m, params))
            .transpose()?;
        Ok(Self {
            password: password_wrap,
            master: master_wrap,
        })
    }

    pub fn unlock_with_password(&self, password: &str) -> CryptoResult<SecretKey> {
        let der = unwrap_with_password(&self.password, password)?;
        decode_private(&der)
    }

    pub fn unlock_with_master(&self, master: &MasterSecret) -> CryptoResult<SecretKey> {
        let sealed = self.master.as_ref().ok_or_else(|| {
            CryptoError::EnvelopeInvalid("private key has no master wrap".to_string())
        })?;
        let der = unwrap_with_master_secret(sealed, master)?;
        decode_private(&der)
    }

    /// True when any stored wrap uses fewer iterations than `params`.
    pub fn needs_rewrap(&self, params: &KdfParams) -> bool {
        self.password.kdf_iterations < params.iterations
            || self
                .master
                .as_ref()
                .is_some_and(|m| m.kdf_iterations < params.iterations)
    }

    /// Re-wraps the password layer, for a password change or an
    /// iteration-count migration. The master layer is left untouched.
    pub fn rewrap_password(
        &self,
        old_password: &str,
        new_password: &str,
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        let der = unwrap_with_password(&self.password, old_password)?;
        Ok(Self {
            password: wrap_with_password(&der, new_password, params)?,
            master: self.master.clone(),
        })
    }

    /// Re-wraps the master layer under `params`, adding one if missing.
    pub fn rewrap_master(
        &self,
        password: &str,
        master: &MasterSecret,
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        let der = unwrap_with_password(&self.password, password)?;
        Ok(Self {
            password: self.password.clone(),
            master: Some(wrap_with_master_secret(&der, master, params)?),
        })
    }
}
