//! ECDSA-P256-SHA256 signatures over uploaded records.

use crate::error::{CryptoError, CryptoResult};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};

/// Signs `message`, returning a DER-encoded signature.
pub fn sign_record(private: &SecretKey, message: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from(private);
    let signature: Signature = signing_key.sign(message);
    signature.to_der().as_bytes().to_vec()
}

/// Verifies a DER-encoded signature over `message`.
pub fn verify_record_signature(
    public: &PublicKey,
    message: &[u8],
    signature_der: &[u8],
) -> CryptoResult<()> {
    let signature = Signature::from_der(signature_der).map_err(|_| CryptoError::SignatureInvalid)?;
    VerifyingKey::from(public)
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}
