//! Interest and content-object model and frame codec.
//!
//! Frames are what the I/O modules move: a fixed header (kind, flags,
//! name), an optional signature section and the payload. Everything is
//! big-endian. The signature never covers itself, so the signable region of
//! a content object is its encoding with the signature section empty.
//!
//! The RTC NACK payload is the one wire contract shared with foreign
//! implementations: exactly 16 bytes carrying (timestamp, production rate,
//! production segment).

use crate::error::TransportError;
use crate::name::{AddressFamily, Name, Prefix};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hicn_auth::{CryptoSuite, Signer};

/// Frame kind tags.
const KIND_INTEREST: u8 = 0;
const KIND_CONTENT: u8 = 1;

/// Content-object flags.
const FLAG_FINAL: u8 = 0x01;
const FLAG_MANIFEST: u8 = 0x02;
const FLAG_NACK: u8 = 0x04;
const FLAG_FINAL_HINT: u8 = 0x08;

/// Fixed NACK payload size in bytes.
pub const NACK_PAYLOAD_SIZE: usize = 16;

/// Size of the RTC data header prepended to real-time payloads.
pub const RTC_HEADER_SIZE: usize = 12;

/// Default lifetime stamped on interests when none is configured.
pub const DEFAULT_INTEREST_LIFETIME_MS: u32 = 1000;

/// Default content-object expiry.
pub const DEFAULT_CONTENT_EXPIRY_MS: u32 = 10_000;

fn put_name(buf: &mut BytesMut, name: &Name) {
    let prefix = name.prefix();
    buf.put_u8(match prefix.family() {
        AddressFamily::V4 => 4,
        AddressFamily::V6 => 6,
    });
    buf.put_u8(prefix.prefix_len());
    buf.put_slice(prefix.addr_bytes());
    buf.put_u32(name.suffix());
}

fn get_name(buf: &mut &[u8]) -> Result<Name, TransportError> {
    if buf.remaining() < 2 {
        return Err(TransportError::InvalidPacket("truncated name".into()));
    }
    let family = match buf.get_u8() {
        4 => AddressFamily::V4,
        6 => AddressFamily::V6,
        other => {
            return Err(TransportError::InvalidPacket(format!(
                "unknown address family {other}"
            )))
        }
    };
    let prefix_len = buf.get_u8();

    let addr_len = family.addr_len();
    if buf.remaining() < addr_len + 4 {
        return Err(TransportError::InvalidPacket("truncated address".into()));
    }
    let mut addr = [0u8; 16];
    buf.copy_to_slice(&mut addr[..addr_len]);
    let suffix = buf.get_u32();

    let prefix = Prefix::new(family, &addr[..addr_len], prefix_len)
        .map_err(|e| TransportError::InvalidPacket(e.to_string()))?;
    Ok(prefix.name(suffix))
}

/// A name-addressed request.
///
/// The name is fixed at construction; the payload (handshake bytes for
/// TLS-tunneled flows) can be appended to and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    name: Name,
    lifetime_ms: u32,
    payload: Bytes,
}

impl Interest {
    pub fn new(name: Name, lifetime_ms: u32) -> Self {
        Interest {
            name,
            lifetime_ms,
            payload: Bytes::new(),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn suffix(&self) -> u32 {
        self.name.suffix()
    }

    pub fn lifetime_ms(&self) -> u32 {
        self.lifetime_ms
    }

    /// Used on retransmission to stamp the reduced remaining lifetime.
    pub fn set_lifetime_ms(&mut self, lifetime_ms: u32) {
        self.lifetime_ms = lifetime_ms;
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }

    pub fn append_payload(&mut self, extra: &[u8]) {
        let mut buf = BytesMut::with_capacity(self.payload.len() + extra.len());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(extra);
        self.payload = buf.freeze();
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(32 + self.payload.len());
        buf.put_u8(KIND_INTEREST);
        buf.put_u8(0); // flags, unused on interests
        put_name(&mut buf, &self.name);
        buf.put_u32(self.lifetime_ms);
        buf.put_u8(0); // suite
        buf.put_u16(0); // signature length
        buf.put_slice(&self.payload);
        buf
    }

    fn decode_body(mut buf: &[u8]) -> Result<Self, TransportError> {
        let name = get_name(&mut buf)?;
        if buf.remaining() < 7 {
            return Err(TransportError::InvalidPacket("truncated interest".into()));
        }
        let lifetime_ms = buf.get_u32();
        let _suite = buf.get_u8();
        let sig_len = buf.get_u16() as usize;
        if buf.remaining() < sig_len {
            return Err(TransportError::InvalidPacket("truncated signature".into()));
        }
        buf.advance(sig_len);

        Ok(Interest {
            name,
            lifetime_ms,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// Signature attached to a content object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub suite: CryptoSuite,
    pub bytes: Bytes,
}

/// The response to an interest: named, possibly signed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentObject {
    name: Name,
    expiry_ms: u32,
    flags: u8,
    /// Final segment suffix of the whole content, stamped on every
    /// segment once the producer knows it.
    final_suffix: Option<u32>,
    signature: Option<Signature>,
    payload: Bytes,
}

impl ContentObject {
    pub fn new(name: Name, payload: Bytes) -> Self {
        ContentObject {
            name,
            expiry_ms: DEFAULT_CONTENT_EXPIRY_MS,
            flags: 0,
            final_suffix: None,
            signature: None,
            payload,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Rename the object. Pooled objects are renamed per interest in
    /// virtual producer mode; the signature (if any) no longer applies and
    /// is cleared.
    pub fn set_name(&mut self, name: Name) {
        self.name = name;
        self.signature = None;
    }

    pub fn suffix(&self) -> u32 {
        self.name.suffix()
    }

    pub fn expiry_ms(&self) -> u32 {
        self.expiry_ms
    }

    pub fn set_expiry_ms(&mut self, expiry_ms: u32) {
        self.expiry_ms = expiry_ms;
    }

    pub fn is_final(&self) -> bool {
        self.flags & FLAG_FINAL != 0
    }

    pub fn set_final(&mut self, is_final: bool) {
        if is_final {
            self.flags |= FLAG_FINAL;
        } else {
            self.flags &= !FLAG_FINAL;
        }
    }

    pub fn is_manifest(&self) -> bool {
        self.flags & FLAG_MANIFEST != 0
    }

    pub fn set_manifest(&mut self, is_manifest: bool) {
        if is_manifest {
            self.flags |= FLAG_MANIFEST;
        } else {
            self.flags &= !FLAG_MANIFEST;
        }
    }

    /// Final segment suffix of the content, when the producer announced
    /// it. Lets consumers stop requesting past the end.
    pub fn final_suffix_hint(&self) -> Option<u32> {
        self.final_suffix
    }

    pub fn set_final_suffix_hint(&mut self, final_suffix: u32) {
        self.final_suffix = Some(final_suffix);
        self.flags |= FLAG_FINAL_HINT;
    }

    pub fn is_nack(&self) -> bool {
        self.flags & FLAG_NACK != 0
    }

    pub fn set_nack(&mut self, is_nack: bool) {
        if is_nack {
            self.flags |= FLAG_NACK;
        } else {
            self.flags &= !FLAG_NACK;
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }

    pub fn append_payload(&mut self, extra: &[u8]) {
        let mut buf = BytesMut::with_capacity(self.payload.len() + extra.len());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(extra);
        self.payload = buf.freeze();
    }

    /// Drop `n` bytes from the front of the payload (zero-copy).
    pub fn trim_payload_start(&mut self, n: usize) {
        let n = n.min(self.payload.len());
        self.payload.advance(n);
    }

    /// Drop `n` bytes from the back of the payload (zero-copy).
    pub fn trim_payload_end(&mut self, n: usize) {
        let keep = self.payload.len().saturating_sub(n);
        self.payload.truncate(keep);
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// The byte region a signature covers: the full frame with an empty
    /// signature section.
    pub fn signable(&self) -> BytesMut {
        self.encode_inner(false)
    }

    /// Sign in place, filling the signature field.
    pub fn sign_with(&mut self, signer: &dyn Signer) -> Result<(), TransportError> {
        let signable = self.signable();
        let bytes = signer.sign(&signable)?;
        self.signature = Some(Signature {
            suite: signer.suite(),
            bytes,
        });
        Ok(())
    }

    /// Digest of the signable region, as listed in manifests.
    pub fn digest(&self, algorithm: hicn_auth::HashAlgorithm) -> Bytes {
        algorithm.digest(&self.signable())
    }

    fn encode_inner(&self, with_signature: bool) -> BytesMut {
        let sig_len = if with_signature {
            self.signature.as_ref().map(|s| s.bytes.len()).unwrap_or(0)
        } else {
            0
        };

        let mut buf = BytesMut::with_capacity(32 + sig_len + self.payload.len());
        buf.put_u8(KIND_CONTENT);
        buf.put_u8(self.flags);
        put_name(&mut buf, &self.name);
        buf.put_u32(self.expiry_ms);
        if let Some(final_suffix) = self.final_suffix {
            buf.put_u32(final_suffix);
        }

        match (&self.signature, with_signature) {
            (Some(sig), true) => {
                buf.put_u8(sig.suite.as_u8());
                buf.put_u16(sig.bytes.len() as u16);
                buf.put_slice(&sig.bytes);
            }
            _ => {
                buf.put_u8(0);
                buf.put_u16(0);
            }
        }

        buf.put_slice(&self.payload);
        buf
    }

    pub fn encode(&self) -> BytesMut {
        self.encode_inner(true)
    }

    fn decode_body(flags: u8, mut buf: &[u8]) -> Result<Self, TransportError> {
        let name = get_name(&mut buf)?;
        if buf.remaining() < 7 {
            return Err(TransportError::InvalidPacket("truncated content".into()));
        }
        let expiry_ms = buf.get_u32();
        let final_suffix = if flags & FLAG_FINAL_HINT != 0 {
            if buf.remaining() < 4 {
                return Err(TransportError::InvalidPacket("truncated content".into()));
            }
            Some(buf.get_u32())
        } else {
            None
        };
        if buf.remaining() < 3 {
            return Err(TransportError::InvalidPacket("truncated content".into()));
        }
        let suite_tag = buf.get_u8();
        let sig_len = buf.get_u16() as usize;
        if buf.remaining() < sig_len {
            return Err(TransportError::InvalidPacket("truncated signature".into()));
        }

        let signature = if sig_len > 0 {
            let suite = CryptoSuite::from_u8(suite_tag)
                .map_err(|e| TransportError::InvalidPacket(e.to_string()))?;
            let bytes = Bytes::copy_from_slice(&buf[..sig_len]);
            buf.advance(sig_len);
            Some(Signature { suite, bytes })
        } else {
            None
        };

        Ok(ContentObject {
            name,
            expiry_ms,
            flags,
            final_suffix,
            signature,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Interest(Interest),
    Content(ContentObject),
}

impl Packet {
    pub fn decode(frame: &[u8]) -> Result<Self, TransportError> {
        if frame.len() < 2 {
            return Err(TransportError::InvalidPacket("frame too short".into()));
        }
        let kind = frame[0];
        let flags = frame[1];
        let body = &frame[2..];

        match kind {
            KIND_INTEREST => Ok(Packet::Interest(Interest::decode_body(body)?)),
            KIND_CONTENT => Ok(Packet::Content(ContentObject::decode_body(flags, body)?)),
            other => Err(TransportError::InvalidPacket(format!(
                "unknown packet kind {other}"
            ))),
        }
    }

    pub fn encode(&self) -> BytesMut {
        match self {
            Packet::Interest(i) => i.encode(),
            Packet::Content(c) => c.encode(),
        }
    }
}

/// RTC NACK payload: a fixed 16-byte big-endian triple.
///
/// Carried by a content object with the nack flag set; the producer
/// synthesizes one for out-of-window and probe interests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackPayload {
    pub timestamp_ms: u64,
    pub production_rate: u32,
    pub production_segment: u32,
}

impl NackPayload {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NACK_PAYLOAD_SIZE);
        buf.put_u64(self.timestamp_ms);
        buf.put_u32(self.production_rate);
        buf.put_u32(self.production_segment);
        buf.freeze()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self, TransportError> {
        if payload.len() != NACK_PAYLOAD_SIZE {
            return Err(TransportError::InvalidPacket(format!(
                "nack payload must be {NACK_PAYLOAD_SIZE} bytes, got {}",
                payload.len()
            )));
        }
        Ok(NackPayload {
            timestamp_ms: payload.get_u64(),
            production_rate: payload.get_u32(),
            production_segment: payload.get_u32(),
        })
    }
}

/// Header prepended to RTC data payloads: send timestamp and the
/// producer's current production rate hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcHeader {
    pub timestamp_ms: u64,
    pub production_rate: u32,
}

impl RtcHeader {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTC_HEADER_SIZE);
        buf.put_u64(self.timestamp_ms);
        buf.put_u32(self.production_rate);
        buf.freeze()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self, TransportError> {
        if payload.len() < RTC_HEADER_SIZE {
            return Err(TransportError::InvalidPacket(
                "rtc payload shorter than its header".into(),
            ));
        }
        Ok(RtcHeader {
            timestamp_ms: payload.get_u64(),
            production_rate: payload.get_u32(),
        })
    }
}
