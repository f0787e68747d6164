//! Server-held master secret for the backend fallback wrap.
//!
//! Whoever holds this secret can unwrap every master-wrapped private key.
//! That is the intended trust model for the backend-mediated decryption path:
//! the operator is trusted with patient private keys. Deployments that do not
//! accept this should not configure a master secret at all.

use crate::cipher::KEY_SIZE;
use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Default environment variable carrying the base64 master secret.
pub const MASTER_KEY_ENV: &str = "MASTER_KEY_B64";

/// Exactly 256 bits of server secret. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; KEY_SIZE]);

impl MasterSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decodes a standard-base64 secret that must be exactly 32 bytes.
    pub fn from_b64(value: &str) -> CryptoResult<Self> {
        let raw = Zeroizing::new(STANDARD.decode(value.trim()).map_err(|_| {
            CryptoError::MasterSecretUnavailable("master secret must be valid base64".to_string())
        })?);
        let bytes: [u8; KEY_SIZE] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::MasterSecretUnavailable(format!(
                "master secret must decode to {KEY_SIZE} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Reads the secret from environment variable `var`.
    pub fn from_env(var: &str) -> CryptoResult<Self> {
        let value = Zeroizing::new(std::env::var(var).map_err(|_| {
            CryptoError::MasterSecretUnavailable(format!("{var} not set"))
        })?);
        if value.trim().is_empty() {
            return Err(CryptoError::MasterSecretUnavailable(format!("{var} is empty")));
        }
        Self::from_b64(&value)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}
