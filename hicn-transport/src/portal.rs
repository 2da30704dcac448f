//! Portal: the send/receive primitive over a pluggable I/O module.
//!
//! Protocol loops poll the portal with a deadline derived from their
//! nearest timer; inbound frames are decoded and filtered by longest-prefix
//! match against the registered prefixes. Malformed frames are dropped and
//! counted, never surfaced.

use crate::error::TransportError;
use crate::name::{Name, Prefix};
use crate::packet::{ContentObject, Interest, Packet};
use hicn_io::{IoError, IoModule};
use std::time::Duration;
use tracing::{debug, trace};

/// Pause before the single send retry.
const SEND_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// A decoded, prefix-matched inbound packet.
#[derive(Debug)]
pub enum PacketEvent {
    Interest(Interest),
    Content(ContentObject),
}

/// Send/receive endpoint bound to one I/O module.
pub struct Portal {
    io: Box<dyn IoModule>,
    prefixes: Vec<Prefix>,
    dropped_frames: u64,
    filtered_frames: u64,
}

impl Portal {
    pub fn new(io: Box<dyn IoModule>) -> Self {
        Portal {
            io,
            prefixes: Vec::new(),
            dropped_frames: 0,
            filtered_frames: 0,
        }
    }

    /// Accept inbound packets under `prefix`.
    pub fn register_prefix(&mut self, prefix: Prefix) {
        debug!(%prefix, "prefix registered");
        self.prefixes.push(prefix);
    }

    pub fn registered_prefixes(&self) -> &[Prefix] {
        &self.prefixes
    }

    /// Longest-prefix match against the registered prefixes. With nothing
    /// registered every packet passes (bootstrap).
    fn matches(&self, name: &Name) -> bool {
        if self.prefixes.is_empty() {
            return true;
        }
        self.prefixes.iter().any(|p| p.matches(name))
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match self.io.send_frame(frame) {
            Ok(()) => Ok(()),
            Err(IoError::Disconnected) => Err(TransportError::Disconnected),
            Err(first) => {
                // One retry with backoff, then surface.
                trace!(error = %first, "send failed, retrying once");
                std::thread::sleep(SEND_RETRY_BACKOFF);
                self.io.send_frame(frame).map_err(TransportError::from)
            }
        }
    }

    pub fn send_interest(&mut self, interest: &Interest) -> Result<(), TransportError> {
        trace!(name = %interest.name(), "interest out");
        self.send_frame(&interest.encode())
    }

    pub fn send_content(&mut self, content: &ContentObject) -> Result<(), TransportError> {
        trace!(name = %content.name(), "content out");
        self.send_frame(&content.encode())
    }

    /// Wait up to `timeout` for one matching packet.
    ///
    /// Returns `Ok(None)` when the deadline elapsed, a malformed frame was
    /// dropped, or a frame fell outside every registered prefix — callers
    /// simply poll again.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<PacketEvent>, TransportError> {
        let frame = match self.io.recv_frame(timeout) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(IoError::Disconnected) => return Err(TransportError::Disconnected),
            Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
        };

        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                self.dropped_frames += 1;
                debug!(error = %e, "malformed frame dropped");
                return Ok(None);
            }
        };

        let name = match &packet {
            Packet::Interest(i) => *i.name(),
            Packet::Content(c) => *c.name(),
        };
        if !self.matches(&name) {
            self.filtered_frames += 1;
            return Ok(None);
        }

        Ok(Some(match packet {
            Packet::Interest(i) => PacketEvent::Interest(i),
            Packet::Content(c) => PacketEvent::Content(c),
        }))
    }

    /// Frames dropped as malformed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Frames filtered by prefix mismatch.
    pub fn filtered_frames(&self) -> u64 {
        self.filtered_frames
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_connected()
    }

    pub fn stop(&mut self) {
        self.io.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hicn_io::LoopbackConnector;

    fn portal_pair() -> (Portal, Portal) {
        let (a, b) = LoopbackConnector::pair();
        (Portal::new(Box::new(a)), Portal::new(Box::new(b)))
    }

    #[test]
    fn test_interest_roundtrip() {
        let (mut consumer, mut producer) = portal_pair();
        let name: Name = "b001::1|5".parse().unwrap();

        consumer
            .send_interest(&Interest::new(name, 500))
            .unwrap();

        match producer.poll(Duration::from_millis(100)).unwrap() {
            Some(PacketEvent::Interest(interest)) => {
                assert_eq!(interest.suffix(), 5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_content_roundtrip() {
        let (mut consumer, mut producer) = portal_pair();
        let name: Name = "b001::1|5".parse().unwrap();

        producer
            .send_content(&ContentObject::new(name, Bytes::from_static(b"data")))
            .unwrap();

        match consumer.poll(Duration::from_millis(100)).unwrap() {
            Some(PacketEvent::Content(content)) => {
                assert_eq!(&content.payload()[..], b"data");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_prefix_filtering() {
        let (mut consumer, mut producer) = portal_pair();
        producer.register_prefix("b001::/64".parse().unwrap());

        let outside: Name = "b002::1|0".parse().unwrap();
        consumer
            .send_interest(&Interest::new(outside, 500))
            .unwrap();
        assert!(producer.poll(Duration::from_millis(50)).unwrap().is_none());
        assert_eq!(producer.filtered_frames(), 1);

        let inside: Name = "b001::1|0".parse().unwrap();
        consumer.send_interest(&Interest::new(inside, 500)).unwrap();
        assert!(producer.poll(Duration::from_millis(100)).unwrap().is_some());
    }

    #[test]
    fn test_malformed_frame_dropped_and_counted() {
        let (a, b) = LoopbackConnector::pair();
        let mut raw = a;
        let mut portal = Portal::new(Box::new(b));

        use hicn_io::IoModule as _;
        raw.send_frame(&[0xFF, 0x00, 0x01]).unwrap();

        assert!(portal.poll(Duration::from_millis(50)).unwrap().is_none());
        assert_eq!(portal.dropped_frames(), 1);
    }

    #[test]
    fn test_poll_timeout() {
        let (mut consumer, _producer) = portal_pair();
        assert!(consumer.poll(Duration::from_millis(10)).unwrap().is_none());
    }
}
