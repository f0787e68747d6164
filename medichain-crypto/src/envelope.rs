//! ECIES-style envelopes for record content keys.
//!
//! Each wrap generates an ephemeral P-256 key pair, runs ECDH against the
//! recipient's long-term public key, stretches the shared secret with
//! HKDF-SHA256 under a purpose label and seals the payload with AES-256-GCM.
//! Only the ephemeral *public* key is kept in the envelope; the ephemeral
//! secret is dropped (and zeroized) before the function returns.

use crate::cipher::{self, SealedBox};
use crate::encoding::b64;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{KeyPurpose, derive_wrap_key};
use crate::key::{decode_public, encode_public};
use p256::ecdh::{EphemeralSecret, SharedSecret};
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Raw ECDH output. Not uniformly random; always run through HKDF.
pub struct SharedSecretMaterial(SharedSecret);

impl SharedSecretMaterial {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.raw_secret_bytes().as_slice()
    }
}

/// ECDH between a private key and a peer's public key.
pub fn derive_shared_secret(private: &SecretKey, peer_public: &PublicKey) -> SharedSecretMaterial {
    SharedSecretMaterial(p256::ecdh::diffie_hellman(
        private.to_nonzero_scalar(),
        peer_public.as_affine(),
    ))
}

/// ECDH against an encoded (SPKI DER or SEC1) peer key.
///
/// A peer key that does not decode to a P-256 point fails with
/// [`CryptoError::InvalidPeerKey`].
pub fn derive_shared_secret_from_bytes(
    private: &SecretKey,
    peer_public: &[u8],
) -> CryptoResult<SharedSecretMaterial> {
    let peer = decode_public(peer_public).map_err(|e| CryptoError::InvalidPeerKey(e.to_string()))?;
    Ok(derive_shared_secret(private, &peer))
}

/// One content key wrapped for one recipient.
///
/// Serializes to `{ "wrapped_b64", "nonce_b64", "eph_pub_spki_b64" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EciesEnvelope {
    /// AES-GCM ciphertext plus tag.
    #[serde(rename = "wrapped_b64", with = "b64")]
    pub wrapped: Vec<u8>,
    /// 96-bit GCM nonce.
    #[serde(rename = "nonce_b64", with = "b64")]
    pub nonce: Vec<u8>,
    /// Ephemeral public key, SPKI DER.
    #[serde(rename = "eph_pub_spki_b64", with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
}

impl EciesEnvelope {
    /// Parses the JSON wire form. Missing or non-base64 fields are
    /// reported as [`CryptoError::EnvelopeInvalid`].
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        serde_json::from_str(json).map_err(|e| CryptoError::EnvelopeInvalid(e.to_string()))
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// SHA-256 over all envelope fields, hex encoded.
    ///
    /// Identifies an envelope in audit records without revealing it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.ephemeral_public_key, &self.nonce, &self.wrapped] {
            hasher.update((part.len() as u32).to_be_bytes());
            hasher.update(part);
        }
        hex::encode(hasher.finalize())
    }
}

/// Wraps a record content key for `recipient`.
pub fn wrap_for_recipient(recipient: &PublicKey, plaintext: &[u8]) -> CryptoResult<EciesEnvelope> {
    seal_for_recipient(recipient, plaintext, KeyPurpose::RecordKeyWrap)
}

/// Opens an envelope produced by [`wrap_for_recipient`].
pub fn unwrap_with_private(
    recipient_private: &SecretKey,
    envelope: &EciesEnvelope,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    open_with_private(recipient_private, envelope, KeyPurpose::RecordKeyWrap)
}

/// Ephemeral-ECDH seal under an explicit purpose label.
pub fn seal_for_recipient(
    recipient: &PublicKey,
    plaintext: &[u8],
    purpose: KeyPurpose,
) -> CryptoResult<EciesEnvelope> {
    let ephemeral = EphemeralSecret::random(&mut rand::rngs::OsRng);
    let ephemeral_public_key = encode_public(&ephemeral.public_key())?;
    let key = {
        let shared = ephemeral.diffie_hellman(recipient);
        derive_wrap_key(shared.raw_secret_bytes().as_slice(), purpose)?
    };
    drop(ephemeral);

    let SealedBox { ciphertext, nonce } = cipher::seal(&key, plaintext, None)?;
    Ok(EciesEnvelope {
        wrapped: ciphertext,
        nonce: nonce.to_vec(),
        ephemeral_public_key,
    })
}

/// Opens an envelope under an explicit purpose label.
///
/// An undecodable ephemeral key is [`CryptoError::MalformedKey`]; a decodable
/// key that is not the one used at seal time fails authentication.
pub fn open_with_private(
    recipient_private: &SecretKey,
    envelope: &EciesEnvelope,
    purpose: KeyPurpose,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let ephemeral = decode_public(&envelope.ephemeral_public_key)?;
    let shared = derive_shared_secret(recipient_private, &ephemeral);
    let key = derive_wrap_key(shared.as_bytes(), purpose)?;
    cipher::open(&key, &envelope.wrapped, &envelope.nonce, None)
}
