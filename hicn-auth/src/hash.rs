//! Hash algorithms for manifest digests and key derivation.

use crate::AuthError;
use bytes::Bytes;
use sha2::{Digest, Sha256, Sha512};

/// Hash algorithm used for manifest entries and signature digests.
///
/// `Null` produces an empty digest and is permitted only in test
/// configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashAlgorithm {
    Sha256 = 0,
    Sha512 = 1,
    Crc32 = 2,
    Null = 3,
}

impl HashAlgorithm {
    /// Parse an algorithm name from configuration.
    pub fn from_name(name: &str) -> Result<Self, AuthError> {
        // "crc32" also accepts the longer "crc32c" spelling.
        let lower = name.to_ascii_lowercase();
        if lower == "sha256" {
            Ok(HashAlgorithm::Sha256)
        } else if lower == "sha512" {
            Ok(HashAlgorithm::Sha512)
        } else if lower.starts_with("crc32") {
            Ok(HashAlgorithm::Crc32)
        } else {
            Err(AuthError::UnknownHashAlgorithm(name.to_string()))
        }
    }

    /// Wire tag carried in manifest payloads.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(HashAlgorithm::Sha256),
            1 => Some(HashAlgorithm::Sha512),
            2 => Some(HashAlgorithm::Crc32),
            3 => Some(HashAlgorithm::Null),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
            HashAlgorithm::Crc32 => 4,
            HashAlgorithm::Null => 0,
        }
    }

    /// Compute the digest of `data`.
    pub fn digest(self, data: &[u8]) -> Bytes {
        match self {
            HashAlgorithm::Sha256 => Bytes::copy_from_slice(&Sha256::digest(data)),
            HashAlgorithm::Sha512 => Bytes::copy_from_slice(&Sha512::digest(data)),
            HashAlgorithm::Crc32 => Bytes::copy_from_slice(&crc32fast::hash(data).to_be_bytes()),
            HashAlgorithm::Null => Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(
            HashAlgorithm::from_name("sha256").unwrap(),
            HashAlgorithm::Sha256
        );
        assert_eq!(
            HashAlgorithm::from_name("SHA512").unwrap(),
            HashAlgorithm::Sha512
        );
        assert_eq!(
            HashAlgorithm::from_name("crc32c").unwrap(),
            HashAlgorithm::Crc32
        );
        assert!(HashAlgorithm::from_name("md5").is_err());
    }

    #[test]
    fn test_digest_lengths() {
        let data = b"some segment payload";
        for alg in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha512,
            HashAlgorithm::Crc32,
            HashAlgorithm::Null,
        ] {
            assert_eq!(alg.digest(data).len(), alg.digest_len());
        }
    }

    #[test]
    fn test_digest_stability() {
        let a = HashAlgorithm::Sha256.digest(b"abc");
        let b = HashAlgorithm::Sha256.digest(b"abc");
        let c = HashAlgorithm::Sha256.digest(b"abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tag_roundtrip() {
        for alg in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha512,
            HashAlgorithm::Crc32,
            HashAlgorithm::Null,
        ] {
            assert_eq!(HashAlgorithm::from_u8(alg.as_u8()), Some(alg));
        }
        assert_eq!(HashAlgorithm::from_u8(200), None);
    }
}
