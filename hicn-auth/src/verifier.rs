//! Packet verification.
//!
//! A verifier inspects the signable bytes of a packet together with its
//! signature and answers accept / reject / unknown. The indexer maps these
//! outcomes onto its configured [`VerificationPolicy`].

use crate::signer::derive_key;
use hmac::{Hmac, Mac};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Verdict on a single packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Signature present and valid.
    Accept,
    /// Signature present and invalid.
    Reject,
    /// This verifier cannot decide (no signature, foreign suite).
    Unknown,
}

/// What the consumer does when verification does not accept a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationPolicy {
    /// Drop the packet silently; it will be retransmitted or lost.
    Drop,
    /// Deliver an error to the application but keep the protocol running.
    Surface,
    /// Abort the protocol with a fatal error.
    #[default]
    Abort,
}

/// Verifies signatures over signable packet bytes.
pub trait Verifier: Send + Sync {
    fn verify(&self, data: &[u8], signature: &[u8]) -> VerificationOutcome;
}

/// HMAC-SHA256 verifier keyed from the producer's shared passphrase.
pub struct SymmetricVerifier {
    key: [u8; 32],
}

impl SymmetricVerifier {
    pub fn new(passphrase: &str) -> Self {
        SymmetricVerifier {
            key: derive_key(passphrase),
        }
    }
}

impl Verifier for SymmetricVerifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> VerificationOutcome {
        if signature.is_empty() {
            return VerificationOutcome::Unknown;
        }

        let mut mac = match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => return VerificationOutcome::Unknown,
        };
        mac.update(data);

        match mac.verify_slice(signature) {
            Ok(()) => VerificationOutcome::Accept,
            Err(_) => VerificationOutcome::Reject,
        }
    }
}

/// RSA or ECDSA P-256 verifier anchored on the producer's public key.
pub enum AsymmetricVerifier {
    Rsa(RsaPublicKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

impl AsymmetricVerifier {
    /// Load a trust anchor from a PEM-encoded SubjectPublicKeyInfo.
    pub fn from_public_key_pem(pem: &str) -> Result<Self, crate::AuthError> {
        use rsa::pkcs8::DecodePublicKey;

        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(AsymmetricVerifier::Rsa(key));
        }

        p256::PublicKey::from_public_key_pem(pem)
            .map(|key| AsymmetricVerifier::EcdsaP256(p256::ecdsa::VerifyingKey::from(key)))
            .map_err(|e| crate::AuthError::KeyParse(e.to_string()))
    }
}

impl Verifier for AsymmetricVerifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> VerificationOutcome {
        if signature.is_empty() {
            return VerificationOutcome::Unknown;
        }

        match self {
            AsymmetricVerifier::Rsa(key) => {
                let digest = Sha256::digest(data);
                match key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature) {
                    Ok(()) => VerificationOutcome::Accept,
                    Err(_) => VerificationOutcome::Reject,
                }
            }
            AsymmetricVerifier::EcdsaP256(key) => {
                use p256::ecdsa::signature::Verifier as _;
                let signature = match p256::ecdsa::Signature::from_slice(signature) {
                    Ok(s) => s,
                    Err(_) => return VerificationOutcome::Reject,
                };
                match key.verify(data, &signature) {
                    Ok(()) => VerificationOutcome::Accept,
                    Err(_) => VerificationOutcome::Reject,
                }
            }
        }
    }
}
