//! Segment reassembly.
//!
//! The byte-stream variant keeps an in-order pointer and a side table of
//! out-of-order segments: each verified segment is inserted, then the
//! contiguous run starting at the indexer's next reassembly suffix is
//! drained to the application. The datagram variant delivers each segment
//! independently.

use crate::indexer::{Indexer, VerifiedSegment};
use crate::name::INVALID_SUFFIX;
use bytes::Bytes;
use std::collections::HashMap;

/// In-order byte-stream reassembly.
#[derive(Default)]
pub struct StreamReassembly {
    /// Out-of-order side table keyed by wire suffix.
    pending: HashMap<u32, (Bytes, bool)>,
    /// Wire suffix the in-order pointer is waiting for.
    expected: Option<u32>,
    total_bytes: u64,
    complete: bool,
}

impl StreamReassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a verified segment until its turn comes.
    ///
    /// A duplicate suffix overwrites the previous copy, so a segment can
    /// reach the application at most once.
    pub fn insert(&mut self, segment: VerifiedSegment) {
        if self.complete {
            return;
        }
        self.pending
            .insert(segment.suffix, (segment.payload, segment.is_final));
    }

    /// Emit the contiguous run at the in-order pointer, advancing it via
    /// the indexer's reassembly schedule. Returns the payloads in order.
    pub fn drain(&mut self, indexer: &mut dyn Indexer) -> Vec<Bytes> {
        let mut out = Vec::new();

        while !self.complete {
            let expected = match self.expected {
                Some(suffix) => suffix,
                None => {
                    let next = indexer.next_reassembly_suffix();
                    if next == INVALID_SUFFIX {
                        break;
                    }
                    self.expected = Some(next);
                    next
                }
            };

            match self.pending.remove(&expected) {
                Some((payload, is_final)) => {
                    self.total_bytes += payload.len() as u64;
                    self.expected = None;
                    out.push(payload);
                    if is_final {
                        self.complete = true;
                    }
                }
                None => break,
            }
        }

        out
    }

    /// Total bytes handed to the application so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Whether the final segment has been emitted.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Segments parked out of order.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.expected = None;
        self.total_bytes = 0;
        self.complete = false;
    }
}

/// Datagram delivery: no ordering, every segment goes straight up.
#[derive(Default)]
pub struct DatagramReassembly {
    delivered_bytes: u64,
    delivered_count: u64,
}

impl DatagramReassembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&mut self, payload: Bytes) -> Bytes {
        self.delivered_bytes += payload.len() as u64;
        self.delivered_count += 1;
        payload
    }

    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::IncrementalIndexer;
    use hicn_auth::VerificationPolicy;

    fn segment(suffix: u32, payload: &[u8], is_final: bool) -> VerifiedSegment {
        VerifiedSegment {
            suffix,
            payload: Bytes::copy_from_slice(payload),
            is_final,
        }
    }

    #[test]
    fn test_in_order_drain() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        let mut reassembly = StreamReassembly::new();

        reassembly.insert(segment(0, b"aaa", false));
        reassembly.insert(segment(1, b"bbb", false));

        let out = reassembly.drain(&mut indexer);
        assert_eq!(out.len(), 2);
        assert_eq!(reassembly.total_bytes(), 6);
        assert!(!reassembly.is_complete());
    }

    #[test]
    fn test_out_of_order_hold_and_release() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        let mut reassembly = StreamReassembly::new();

        reassembly.insert(segment(2, b"c", false));
        assert!(reassembly.drain(&mut indexer).is_empty());
        assert_eq!(reassembly.pending_len(), 1);

        reassembly.insert(segment(1, b"b", false));
        assert!(reassembly.drain(&mut indexer).is_empty());

        reassembly.insert(segment(0, b"a", false));
        let out = reassembly.drain(&mut indexer);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Bytes::from_static(b"a"));
        assert_eq!(out[2], Bytes::from_static(b"c"));
    }

    #[test]
    fn test_completion_on_final_segment() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        let mut reassembly = StreamReassembly::new();

        reassembly.insert(segment(0, b"head", false));
        reassembly.insert(segment(1, b"tail", true));

        let out = reassembly.drain(&mut indexer);
        assert_eq!(out.len(), 2);
        assert!(reassembly.is_complete());
        assert_eq!(reassembly.total_bytes(), 8);

        // Nothing more comes out once complete.
        reassembly.insert(segment(2, b"late", false));
        assert!(reassembly.drain(&mut indexer).is_empty());
    }

    #[test]
    fn test_final_flag_out_of_order_does_not_stall() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        let mut reassembly = StreamReassembly::new();

        // The final segment shows up first; stream completes once the gap
        // fills in.
        reassembly.insert(segment(2, b"end", true));
        assert!(reassembly.drain(&mut indexer).is_empty());

        reassembly.insert(segment(0, b"a", false));
        reassembly.insert(segment(1, b"b", false));
        let out = reassembly.drain(&mut indexer);
        assert_eq!(out.len(), 3);
        assert!(reassembly.is_complete());
    }

    #[test]
    fn test_duplicate_segment_delivered_once() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        let mut reassembly = StreamReassembly::new();

        reassembly.insert(segment(0, b"x", false));
        reassembly.insert(segment(0, b"x", false));
        let out = reassembly.drain(&mut indexer);
        assert_eq!(out.len(), 1);
        assert_eq!(reassembly.total_bytes(), 1);
    }

    #[test]
    fn test_datagram_passthrough() {
        let mut datagram = DatagramReassembly::new();
        let payload = datagram.deliver(Bytes::from_static(b"frame"));
        assert_eq!(&payload[..], b"frame");
        assert_eq!(datagram.delivered_bytes(), 5);
        assert_eq!(datagram.delivered_count(), 1);
    }
}
