//! Key derivation: HKDF-SHA256 for ECDH output, PBKDF2-HMAC-SHA256 for
//! passwords and the server master secret.

use crate::cipher::{KEY_SIZE, SymmetricKey};
use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Default PBKDF2 iteration count for new wraps.
pub const DEFAULT_KDF_ITERATIONS: u32 = 390_000;
/// Lowest iteration count accepted for wrapping or unwrapping.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;
/// Salt length for password and master wraps.
pub const SALT_SIZE: usize = 16;

/// Purpose label bound into every HKDF derivation.
///
/// Each purpose has its own info string so a key derived for one purpose can
/// never open a blob sealed for another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Wrapping a record's content key for a recipient.
    RecordKeyWrap,
    /// Wrapping a principal's private key for transport to a recipient.
    PrivateKeyWrap,
}

impl KeyPurpose {
    pub fn info(self) -> &'static [u8] {
        match self {
            KeyPurpose::RecordKeyWrap => b"medichain/v1/record-key-wrap",
            KeyPurpose::PrivateKeyWrap => b"medichain/v1/private-key-wrap",
        }
    }
}

/// HKDF-SHA256 (no salt) expanding `secret_material` under `info`.
pub fn derive_key(
    secret_material: &[u8],
    info: &[u8],
    length: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(None, secret_material);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hkdf.expand(info, okm.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Derives a 256-bit wrapping key for `purpose`.
pub fn derive_wrap_key(secret_material: &[u8], purpose: KeyPurpose) -> CryptoResult<SymmetricKey> {
    let okm = derive_key(secret_material, purpose.info(), KEY_SIZE)?;
    SymmetricKey::from_slice(&okm)
}

/// PBKDF2 tuning persisted next to every password/master wrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    /// Checked constructor; rejects counts below [`MIN_KDF_ITERATIONS`].
    pub fn new(iterations: u32) -> CryptoResult<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(CryptoError::WeakKdfParams {
                actual: self.iterations,
                minimum: MIN_KDF_ITERATIONS,
            });
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// PBKDF2-HMAC-SHA256 stretching of a password into a 256-bit key.
///
/// Deterministic for identical inputs. `iterations` comes from the stored
/// bundle at unwrap time, not from a global default.
pub fn derive_from_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> CryptoResult<SymmetricKey> {
    KdfParams::new(iterations)?;
    Ok(pbkdf2_sha256(password, salt, iterations))
}

fn pbkdf2_sha256(secret: &[u8], salt: &[u8], iterations: u32) -> SymmetricKey {
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, iterations, out.as_mut_slice());
    SymmetricKey::from_bytes(*out)
}
