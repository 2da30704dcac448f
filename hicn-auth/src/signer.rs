//! Packet signing.
//!
//! Signers run on the transport's I/O context or a dedicated worker, never
//! on the application thread. They operate over the signable region of a
//! packet and return the raw signature bytes that the transport writes into
//! the packet's signature field.

use crate::AuthError;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Signature suite carried next to the signature bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CryptoSuite {
    HmacSha256 = 0,
    RsaSha256 = 1,
    EcdsaSha256 = 2,
}

impl CryptoSuite {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, AuthError> {
        match value {
            0 => Ok(CryptoSuite::HmacSha256),
            1 => Ok(CryptoSuite::RsaSha256),
            2 => Ok(CryptoSuite::EcdsaSha256),
            other => Err(AuthError::UnknownSuite(other)),
        }
    }
}

/// Produces signatures over signable packet bytes.
pub trait Signer: Send + Sync {
    /// The suite this signer emits.
    fn suite(&self) -> CryptoSuite;

    /// Sign `data`, returning the signature bytes.
    fn sign(&self, data: &[u8]) -> Result<Bytes, AuthError>;
}

/// HMAC-SHA256 signer keyed from a shared passphrase.
pub struct SymmetricSigner {
    key: [u8; 32],
}

impl SymmetricSigner {
    /// Derive the signing key from a passphrase.
    pub fn new(passphrase: &str) -> Self {
        SymmetricSigner {
            key: derive_key(passphrase),
        }
    }
}

/// Passphrase to HMAC key derivation shared with the symmetric verifier.
pub(crate) fn derive_key(passphrase: &str) -> [u8; 32] {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

impl Signer for SymmetricSigner {
    fn suite(&self) -> CryptoSuite {
        CryptoSuite::HmacSha256
    }

    fn sign(&self, data: &[u8]) -> Result<Bytes, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        mac.update(data);
        Ok(Bytes::copy_from_slice(&mac.finalize().into_bytes()))
    }
}

/// RSA or ECDSA P-256 signer backed by an identity's private key.
pub enum AsymmetricSigner {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl Signer for AsymmetricSigner {
    fn suite(&self) -> CryptoSuite {
        match self {
            AsymmetricSigner::Rsa(_) => CryptoSuite::RsaSha256,
            AsymmetricSigner::EcdsaP256(_) => CryptoSuite::EcdsaSha256,
        }
    }

    fn sign(&self, data: &[u8]) -> Result<Bytes, AuthError> {
        match self {
            AsymmetricSigner::Rsa(key) => {
                let digest = Sha256::digest(data);
                let signature = key
                    .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| AuthError::Signing(e.to_string()))?;
                Ok(Bytes::from(signature))
            }
            AsymmetricSigner::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer as _;
                let signature: p256::ecdsa::Signature = key.sign(data);
                Ok(Bytes::from(signature.to_vec()))
            }
        }
    }
}
