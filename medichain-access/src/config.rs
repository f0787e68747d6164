//! Access service configuration.

use crate::error::{AccessError, AccessResult};
use medichain_crypto::{DEFAULT_KDF_ITERATIONS, KdfParams, MASTER_KEY_ENV, MasterSecret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the access service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Deadline for a whole grant, including private-key unlock (milliseconds).
    pub grant_timeout_ms: u64,

    /// PBKDF2 iterations for new password and master wraps.
    pub kdf_iterations: u32,

    /// Refuse to start without a master secret, and master-wrap every
    /// registered private key.
    pub require_master_wrap: bool,

    /// Environment variable holding the base64 master secret.
    pub master_key_env: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            grant_timeout_ms: 10_000,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            require_master_wrap: false,
            master_key_env: MASTER_KEY_ENV.to_string(),
        }
    }
}

impl AccessConfig {
    pub fn validate(&self) -> AccessResult<()> {
        if self.grant_timeout_ms == 0 {
            return Err(AccessError::Config("grant_timeout_ms must be positive".into()));
        }
        if self.master_key_env.trim().is_empty() {
            return Err(AccessError::Config("master_key_env must name a variable".into()));
        }
        self.kdf_params()?;
        Ok(())
    }

    pub fn grant_timeout(&self) -> Duration {
        Duration::from_millis(self.grant_timeout_ms)
    }

    pub fn kdf_params(&self) -> AccessResult<KdfParams> {
        KdfParams::new(self.kdf_iterations).map_err(|e| AccessError::Config(e.to_string()))
    }

    /// Reads the master secret from the configured environment variable.
    ///
    /// An unset variable is `Ok(None)` unless `require_master_wrap` is on. A
    /// set but malformed value is always an error.
    pub fn load_master_secret(&self) -> AccessResult<Option<MasterSecret>> {
        if std::env::var_os(&self.master_key_env).is_none() {
            if self.require_master_wrap {
                return Err(AccessError::MasterSecretUnavailable(format!(
                    "{} is not set",
                    self.master_key_env
                )));
            }
            debug!(var = %self.master_key_env, "no master secret configured");
            return Ok(None);
        }
        Ok(Some(MasterSecret::from_env(&self.master_key_env)?))
    }
}
