//! Producer identities.
//!
//! An identity holds the asymmetric keypair a producer signs with. Keys are
//! loaded from PKCS#8 PEM files; unwrapping PKCS#12 containers is left to
//! the external key-management collaborator, which hands over the extracted
//! key. When no key file exists yet an identity can be generated on the
//! spot, mirroring the original load-or-generate behavior.

use crate::hash::HashAlgorithm;
use crate::signer::AsymmetricSigner;
use crate::verifier::AsymmetricVerifier;
use crate::AuthError;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;

/// Default modulus size for generated RSA identities.
const DEFAULT_RSA_BITS: usize = 2048;

enum IdentityKey {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

/// A producer keypair plus the hash algorithm used for its manifests.
pub struct Identity {
    key: IdentityKey,
    hash_algorithm: HashAlgorithm,
}

impl Identity {
    /// Load a PKCS#8 PEM private key (RSA or EC P-256).
    pub fn from_pkcs8_pem(pem: &str, hash_algorithm: HashAlgorithm) -> Result<Self, AuthError> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Identity {
                key: IdentityKey::Rsa(key),
                hash_algorithm,
            });
        }

        p256::SecretKey::from_pkcs8_pem(pem)
            .map(|secret| Identity {
                key: IdentityKey::EcdsaP256(p256::ecdsa::SigningKey::from(secret)),
                hash_algorithm,
            })
            .map_err(|e| AuthError::KeyParse(e.to_string()))
    }

    /// Load a key file, or generate a fresh RSA identity if it is missing.
    pub fn load_or_generate(
        path: &Path,
        hash_algorithm: HashAlgorithm,
    ) -> Result<Self, AuthError> {
        match std::fs::read_to_string(path) {
            Ok(pem) => Self::from_pkcs8_pem(&pem, hash_algorithm),
            Err(_) => Self::generate_rsa(DEFAULT_RSA_BITS, hash_algorithm),
        }
    }

    /// Generate a fresh RSA identity.
    pub fn generate_rsa(bits: usize, hash_algorithm: HashAlgorithm) -> Result<Self, AuthError> {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| AuthError::KeyParse(e.to_string()))?;
        Ok(Identity {
            key: IdentityKey::Rsa(key),
            hash_algorithm,
        })
    }

    /// Generate a fresh ECDSA P-256 identity.
    pub fn generate_p256(hash_algorithm: HashAlgorithm) -> Self {
        Identity {
            key: IdentityKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng)),
            hash_algorithm,
        }
    }

    /// The hash algorithm this identity signs manifests with.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// A signer backed by this identity's private key.
    pub fn signer(&self) -> AsymmetricSigner {
        match &self.key {
            IdentityKey::Rsa(key) => AsymmetricSigner::Rsa(key.clone()),
            IdentityKey::EcdsaP256(key) => AsymmetricSigner::EcdsaP256(key.clone()),
        }
    }

    /// A verifier anchored on this identity's public key.
    pub fn verifier(&self) -> AsymmetricVerifier {
        match &self.key {
            IdentityKey::Rsa(key) => AsymmetricVerifier::Rsa(RsaPublicKey::from(key)),
            IdentityKey::EcdsaP256(key) => AsymmetricVerifier::EcdsaP256(*key.verifying_key()),
        }
    }

    /// PEM-encoded public key, distributable as the consumer's trust anchor.
    pub fn public_key_pem(&self) -> Result<String, AuthError> {
        match &self.key {
            IdentityKey::Rsa(key) => RsaPublicKey::from(key)
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| AuthError::KeyParse(e.to_string())),
            IdentityKey::EcdsaP256(key) => {
                use p256::pkcs8::EncodePublicKey as _;
                p256::PublicKey::from(key.verifying_key())
                    .to_public_key_pem(p256::pkcs8::LineEnding::LF)
                    .map_err(|e| AuthError::KeyParse(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Signer;
    use crate::verifier::{VerificationOutcome, Verifier};

    #[test]
    fn test_p256_identity_sign_verify() {
        let identity = Identity::generate_p256(HashAlgorithm::Sha256);
        let signer = identity.signer();
        let verifier = identity.verifier();

        let sig = signer.sign(b"content object").unwrap();
        assert_eq!(
            verifier.verify(b"content object", &sig),
            VerificationOutcome::Accept
        );
    }

    #[test]
    fn test_public_key_pem_anchors_verifier() {
        let identity = Identity::generate_p256(HashAlgorithm::Sha256);
        let pem = identity.public_key_pem().unwrap();

        let verifier = AsymmetricVerifier::from_public_key_pem(&pem).unwrap();
        let sig = identity.signer().sign(b"data").unwrap();
        assert_eq!(verifier.verify(b"data", &sig), VerificationOutcome::Accept);
        assert_eq!(verifier.verify(b"other", &sig), VerificationOutcome::Reject);
    }
}
