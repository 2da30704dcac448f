//! Authentication primitives for the hICN transport.
//!
//! Packets are signed by the producer and verified by the consumer, either
//! individually or through signed manifests listing per-segment digests.
//! This crate provides the hash algorithms, the symmetric (HMAC) and
//! asymmetric (RSA / ECDSA P-256) signer and verifier implementations, and
//! the identity container that holds a producer keypair.
//!
//! All operations work over opaque signable byte regions; the transport
//! crate decides which part of a packet is covered.

pub mod hash;
pub mod identity;
pub mod signer;
pub mod verifier;

pub use hash::HashAlgorithm;
pub use identity::Identity;
pub use signer::{AsymmetricSigner, CryptoSuite, Signer, SymmetricSigner};
pub use verifier::{
    AsymmetricVerifier, SymmetricVerifier, VerificationOutcome, VerificationPolicy, Verifier,
};

use thiserror::Error;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("cannot parse key material: {0}")]
    KeyParse(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("unknown crypto suite tag {0}")]
    UnknownSuite(u8),

    #[error("unknown hash algorithm: {0}")]
    UnknownHashAlgorithm(String),
}
