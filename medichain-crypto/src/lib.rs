//! Key handling and envelope encryption for MediChain.
//!
//! Provides:
//! - P-256 key pairs with SPKI / PKCS#8 / PEM / base64 codecs
//! - AES-256-GCM sealing with internally generated nonces
//! - HKDF-SHA256 with purpose-separated labels
//! - PBKDF2-HMAC-SHA256 password and master-secret key wrapping
//! - ECIES-style per-recipient envelopes for record content keys
//! - ECDSA signatures over uploaded records
//!
//! # Architecture
//!
//! Record contents are encrypted with a random 256-bit **content key**. The
//! content key is never stored in the clear: it is sealed once per
//! authorized recipient with [`wrap_for_recipient`] (ephemeral ECDH -> HKDF ->
//! AES-GCM). Granting access means unwrapping the owner's copy with the
//! owner's private key and sealing a fresh copy for the new recipient.
//!
//! Private keys themselves are kept at rest in a [`ProtectedPrivateKey`]:
//! one wrap under the user's password and, optionally, one under a server
//! [`MasterSecret`] for backend-mediated access.

mod cipher;
mod encoding;
pub mod envelope;
mod error;
pub mod kdf;
pub mod key;
pub mod master;
pub mod signature;
pub mod wrap;

pub use cipher::{
    KEY_SIZE, NONCE_SIZE, SealedBox, SymmetricKey, TAG_SIZE, generate_content_key, open, seal,
};
pub use envelope::{
    EciesEnvelope, SharedSecretMaterial, derive_shared_secret, derive_shared_secret_from_bytes,
    open_with_private, seal_for_recipient, unwrap_with_private, wrap_for_recipient,
};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{
    DEFAULT_KDF_ITERATIONS, KdfParams, KeyPurpose, MIN_KDF_ITERATIONS, SALT_SIZE,
    derive_from_password, derive_key, derive_wrap_key,
};
pub use key::{
    KeyPair, decode_b64, decode_private, decode_private_pem, decode_public, decode_public_pem,
    encode_b64, encode_private, encode_private_pem, encode_public, encode_public_pem,
    encode_public_sec1, generate_keypair, public_key_from_spki_b64, public_key_to_spki_b64,
};
pub use master::{MASTER_KEY_ENV, MasterSecret};
pub use signature::{sign_record, verify_record_signature};
pub use wrap::{
    KdfSealed, ProtectedPrivateKey, UnwrapKey, WrappedSecret, unwrap_with_master_secret,
    unwrap_with_password, wrap_private_key_with_master_secret, wrap_private_key_with_password,
    wrap_with_master_secret, wrap_with_password,
};

pub use p256::{PublicKey, SecretKey};
