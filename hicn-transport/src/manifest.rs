//! Signed manifests.
//!
//! A manifest is a content object whose payload lists the digests of a
//! contiguous range of data segments, a pointer to the next manifest and,
//! on the last manifest of a content, the final segment suffix. Only the
//! manifest is signed; covered segments travel unsigned and are checked
//! against the listed digests.
//!
//! On the wire a manifest occupies the first suffix of its range and its
//! covered segments take the subsequent suffixes.

use crate::error::TransportError;
use crate::name::Name;
use crate::packet::ContentObject;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hicn_auth::HashAlgorithm;

const MANIFEST_VERSION: u8 = 1;

const FLAG_HAS_NEXT: u8 = 0x01;
const FLAG_HAS_FINAL: u8 = 0x02;

/// One covered segment: its wire suffix and digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub suffix: u32,
    pub digest: Bytes,
}

/// Decoded manifest payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub hash_algorithm: HashAlgorithm,
    pub entries: Vec<ManifestEntry>,
    /// Suffix of the next manifest, absent on the last one.
    pub next_manifest: Option<u32>,
    /// Final segment suffix of the whole content, present on the last
    /// manifest only.
    pub final_suffix: Option<u32>,
}

impl Manifest {
    pub fn new(hash_algorithm: HashAlgorithm) -> Self {
        Manifest {
            hash_algorithm,
            entries: Vec::new(),
            next_manifest: None,
            final_suffix: None,
        }
    }

    /// Record a covered segment.
    pub fn push(&mut self, suffix: u32, digest: Bytes) {
        self.entries.push(ManifestEntry { suffix, digest });
    }

    pub fn encode_payload(&self) -> Bytes {
        let digest_len = self.hash_algorithm.digest_len();
        let mut buf =
            BytesMut::with_capacity(16 + self.entries.len() * (4 + digest_len));

        buf.put_u8(MANIFEST_VERSION);
        buf.put_u8(self.hash_algorithm.as_u8());

        let mut flags = 0u8;
        if self.next_manifest.is_some() {
            flags |= FLAG_HAS_NEXT;
        }
        if self.final_suffix.is_some() {
            flags |= FLAG_HAS_FINAL;
        }
        buf.put_u8(flags);

        buf.put_u16(self.entries.len() as u16);
        if let Some(next) = self.next_manifest {
            buf.put_u32(next);
        }
        if let Some(final_suffix) = self.final_suffix {
            buf.put_u32(final_suffix);
        }

        for entry in &self.entries {
            buf.put_u32(entry.suffix);
            debug_assert_eq!(entry.digest.len(), digest_len);
            buf.put_slice(&entry.digest);
        }

        buf.freeze()
    }

    pub fn decode_payload(mut payload: &[u8]) -> Result<Self, TransportError> {
        if payload.remaining() < 5 {
            return Err(TransportError::InvalidPacket("truncated manifest".into()));
        }

        let version = payload.get_u8();
        if version != MANIFEST_VERSION {
            return Err(TransportError::InvalidPacket(format!(
                "unsupported manifest version {version}"
            )));
        }

        let hash_algorithm = HashAlgorithm::from_u8(payload.get_u8()).ok_or_else(|| {
            TransportError::InvalidPacket("unknown manifest hash algorithm".into())
        })?;
        let flags = payload.get_u8();
        let count = payload.get_u16() as usize;

        let next_manifest = if flags & FLAG_HAS_NEXT != 0 {
            if payload.remaining() < 4 {
                return Err(TransportError::InvalidPacket("truncated manifest".into()));
            }
            Some(payload.get_u32())
        } else {
            None
        };

        let final_suffix = if flags & FLAG_HAS_FINAL != 0 {
            if payload.remaining() < 4 {
                return Err(TransportError::InvalidPacket("truncated manifest".into()));
            }
            Some(payload.get_u32())
        } else {
            None
        };

        let digest_len = hash_algorithm.digest_len();
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if payload.remaining() < 4 + digest_len {
                return Err(TransportError::InvalidPacket(
                    "truncated manifest entry".into(),
                ));
            }
            let suffix = payload.get_u32();
            let digest = Bytes::copy_from_slice(&payload[..digest_len]);
            payload.advance(digest_len);
            entries.push(ManifestEntry { suffix, digest });
        }

        Ok(Manifest {
            hash_algorithm,
            entries,
            next_manifest,
            final_suffix,
        })
    }

    /// Wrap this manifest into a content object at `name`, ready for
    /// signing.
    pub fn into_content_object(self, name: Name, expiry_ms: u32) -> ContentObject {
        let mut content = ContentObject::new(name, self.encode_payload());
        content.set_manifest(true);
        content.set_expiry_ms(expiry_ms);
        content
    }
}
