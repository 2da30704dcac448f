//! Suffix indexing and verification pipeline.
//!
//! An indexer decides which suffix to request next, discovers the final
//! segment of a content and gates segments through verification before they
//! reach reassembly. Two variants exist: the plain incremental indexer
//! (monotonic suffixes, per-segment signatures) and the manifest indexer
//! (suffix schedule and digests learned from signed manifests).

use crate::error::TransportError;
use crate::manifest::Manifest;
use crate::name::{INVALID_SUFFIX, MIN_PROBE_SUFFIX};
use crate::packet::ContentObject;
use bytes::Bytes;
use hicn_auth::{VerificationOutcome, VerificationPolicy, Verifier};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// A segment cleared for reassembly.
#[derive(Debug, Clone)]
pub struct VerifiedSegment {
    pub suffix: u32,
    pub payload: Bytes,
    pub is_final: bool,
}

/// Outcome of feeding a content object to an indexer.
#[derive(Debug)]
pub enum IndexerEvent {
    /// Segments released to reassembly, in coverage order. May be empty
    /// (manifest consumed, or segment buffered until its manifest arrives).
    Data(Vec<VerifiedSegment>),
    /// Verification did not accept the packet and the policy said drop;
    /// `surfaced` tells the consumer to also report a read error.
    Dropped { suffix: u32, surfaced: bool },
    /// Probe-range suffix: never data, routed to probe handling.
    Probe { suffix: u32 },
}

/// Picks suffixes to request and verifies what comes back.
pub trait Indexer {
    /// Next suffix to put on the wire, `INVALID_SUFFIX` once exhausted.
    fn next_suffix(&mut self) -> u32;

    /// Next suffix reassembly should wait for, `INVALID_SUFFIX` when not
    /// yet known or exhausted.
    fn next_reassembly_suffix(&mut self) -> u32;

    fn final_suffix(&self) -> u32;

    fn is_final_discovered(&self) -> bool;

    /// Restart from `offset`.
    fn reset(&mut self, offset: u32);

    /// Feed a received content object through verification.
    fn on_content_object(
        &mut self,
        content: &ContentObject,
    ) -> Result<IndexerEvent, TransportError>;
}

/// Insert `suffix` keeping `queue` ascending and free of duplicates.
fn insert_sorted(queue: &mut VecDeque<u32>, suffix: u32) {
    match queue.binary_search(&suffix) {
        Ok(_) => {}
        Err(pos) => queue.insert(pos, suffix),
    }
}

fn apply_policy(
    policy: VerificationPolicy,
    suffix: u32,
) -> Result<IndexerEvent, TransportError> {
    match policy {
        VerificationPolicy::Drop => Ok(IndexerEvent::Dropped {
            suffix,
            surfaced: false,
        }),
        VerificationPolicy::Surface => Ok(IndexerEvent::Dropped {
            suffix,
            surfaced: true,
        }),
        VerificationPolicy::Abort => Err(TransportError::VerificationFailed { suffix }),
    }
}

/// Monotonic indexer: hands out `offset, offset+1, …` and learns the final
/// suffix from the final-segment flag.
pub struct IncrementalIndexer {
    next_download_suffix: u32,
    next_reassembly_suffix: u32,
    final_suffix: u32,
    verifier: Option<Arc<dyn Verifier>>,
    policy: VerificationPolicy,
}

impl IncrementalIndexer {
    pub fn new(verifier: Option<Arc<dyn Verifier>>, policy: VerificationPolicy) -> Self {
        IncrementalIndexer {
            next_download_suffix: 0,
            next_reassembly_suffix: 0,
            final_suffix: INVALID_SUFFIX,
            verifier,
            policy,
        }
    }
}

impl Indexer for IncrementalIndexer {
    fn next_suffix(&mut self) -> u32 {
        if self.next_download_suffix >= MIN_PROBE_SUFFIX
            || self.next_download_suffix > self.final_suffix
        {
            return INVALID_SUFFIX;
        }
        let suffix = self.next_download_suffix;
        self.next_download_suffix += 1;
        suffix
    }

    fn next_reassembly_suffix(&mut self) -> u32 {
        if self.next_reassembly_suffix >= MIN_PROBE_SUFFIX
            || self.next_reassembly_suffix > self.final_suffix
        {
            return INVALID_SUFFIX;
        }
        let suffix = self.next_reassembly_suffix;
        self.next_reassembly_suffix += 1;
        suffix
    }

    fn final_suffix(&self) -> u32 {
        self.final_suffix
    }

    fn is_final_discovered(&self) -> bool {
        self.final_suffix != INVALID_SUFFIX
    }

    fn reset(&mut self, offset: u32) {
        self.next_download_suffix = offset;
        self.next_reassembly_suffix = offset;
        self.final_suffix = INVALID_SUFFIX;
    }

    fn on_content_object(
        &mut self,
        content: &ContentObject,
    ) -> Result<IndexerEvent, TransportError> {
        let suffix = content.suffix();

        if content.name().is_probe() {
            return Ok(IndexerEvent::Probe { suffix });
        }

        if let Some(verifier) = &self.verifier {
            let signature = content
                .signature()
                .map(|s| s.bytes.clone())
                .unwrap_or_default();
            match verifier.verify(&content.signable(), &signature) {
                VerificationOutcome::Accept | VerificationOutcome::Unknown => {}
                VerificationOutcome::Reject => {
                    warn!(suffix, "segment rejected by verifier");
                    return apply_policy(self.policy, suffix);
                }
            }
        }

        // A final flag (or an announced final suffix) may arrive out of
        // order; remember it either way.
        if let Some(final_suffix) = content.final_suffix_hint() {
            self.final_suffix = final_suffix;
        }
        if content.is_final() {
            self.final_suffix = suffix;
        }

        Ok(IndexerEvent::Data(vec![VerifiedSegment {
            suffix,
            payload: content.payload().clone(),
            is_final: content.is_final()
                || (self.is_final_discovered() && suffix == self.final_suffix),
        }]))
    }
}

/// Manifest-driven indexer.
///
/// Starts by requesting the first manifest; each verified manifest yields
/// the suffixes and digests of its covered segments plus the next manifest
/// to fetch. Segments arriving before their manifest are buffered
/// unverified; a verified manifest releases them (or drops them on digest
/// mismatch).
pub struct ManifestIndexer {
    /// Suffixes still to be requested. Kept ascending by sorted insertion
    /// so catch-up always picks the smallest viable suffix first, even
    /// when manifests arrive out of order.
    pending_requests: VecDeque<u32>,
    /// Data suffixes in reassembly (ascending wire-suffix) order.
    reassembly_queue: VecDeque<u32>,
    /// Digests of covered, not yet released segments.
    suffix_map: HashMap<u32, Bytes>,
    /// Segments received before their covering manifest.
    unverified: HashMap<u32, ContentObject>,
    final_suffix: u32,
    final_discovered: bool,
    verifier: Option<Arc<dyn Verifier>>,
    policy: VerificationPolicy,
}

impl ManifestIndexer {
    pub fn new(verifier: Option<Arc<dyn Verifier>>, policy: VerificationPolicy) -> Self {
        let mut indexer = ManifestIndexer {
            pending_requests: VecDeque::new(),
            reassembly_queue: VecDeque::new(),
            suffix_map: HashMap::new(),
            unverified: HashMap::new(),
            final_suffix: INVALID_SUFFIX,
            final_discovered: false,
            verifier,
            policy,
        };
        indexer.reset(0);
        indexer
    }

    /// Segments left buffered without a covering manifest.
    pub fn unverified_residue(&self) -> usize {
        self.unverified.len()
    }

    fn check_digest(
        &self,
        content: &ContentObject,
        expected: &Bytes,
        algorithm: hicn_auth::HashAlgorithm,
    ) -> bool {
        content.digest(algorithm) == *expected
    }

    fn on_manifest(
        &mut self,
        content: &ContentObject,
    ) -> Result<IndexerEvent, TransportError> {
        let suffix = content.suffix();

        if let Some(verifier) = &self.verifier {
            let signature = content
                .signature()
                .map(|s| s.bytes.clone())
                .unwrap_or_default();
            match verifier.verify(&content.signable(), &signature) {
                VerificationOutcome::Accept => {}
                // Manifests carry the trust chain; an undecidable manifest
                // is as bad as a bad one.
                VerificationOutcome::Reject | VerificationOutcome::Unknown => {
                    warn!(suffix, "manifest rejected by verifier");
                    return apply_policy(self.policy, suffix);
                }
            }
        }

        let manifest = Manifest::decode_payload(content.payload())?;
        let algorithm = manifest.hash_algorithm;
        debug!(
            suffix,
            entries = manifest.entries.len(),
            next = ?manifest.next_manifest,
            "manifest verified"
        );

        for entry in &manifest.entries {
            self.suffix_map.insert(entry.suffix, entry.digest.clone());
            insert_sorted(&mut self.pending_requests, entry.suffix);
            insert_sorted(&mut self.reassembly_queue, entry.suffix);
        }
        if let Some(next) = manifest.next_manifest {
            insert_sorted(&mut self.pending_requests, next);
        }
        if let Some(final_suffix) = manifest.final_suffix {
            self.final_suffix = final_suffix;
            self.final_discovered = true;
        }

        // Release any buffered segments this manifest now covers.
        let mut released = Vec::new();
        let covered: Vec<u32> = manifest.entries.iter().map(|e| e.suffix).collect();
        for seg_suffix in covered {
            if let Some(buffered) = self.unverified.remove(&seg_suffix) {
                let expected = match self.suffix_map.get(&seg_suffix) {
                    Some(d) => d.clone(),
                    None => continue,
                };
                if self.check_digest(&buffered, &expected, algorithm) {
                    self.suffix_map.remove(&seg_suffix);
                    released.push(VerifiedSegment {
                        suffix: seg_suffix,
                        payload: buffered.payload().clone(),
                        is_final: self.final_discovered && seg_suffix == self.final_suffix,
                    });
                } else {
                    // Keep the digest so a retransmission can still verify.
                    warn!(suffix = seg_suffix, "buffered segment digest mismatch");
                    return apply_policy(self.policy, seg_suffix);
                }
            }
        }

        released.sort_by_key(|s| s.suffix);
        Ok(IndexerEvent::Data(released))
    }

    fn on_data(&mut self, content: &ContentObject) -> Result<IndexerEvent, TransportError> {
        let suffix = content.suffix();
        // The manifest indexer needs its own digest algorithm; all manifests
        // of one content use the same one, recorded with the digests.
        match self.suffix_map.get(&suffix).cloned() {
            Some(expected) => {
                let algorithm = self.digest_algorithm(&expected);
                if self.check_digest(content, &expected, algorithm) {
                    self.suffix_map.remove(&suffix);
                    Ok(IndexerEvent::Data(vec![VerifiedSegment {
                        suffix,
                        payload: content.payload().clone(),
                        is_final: self.final_discovered && suffix == self.final_suffix,
                    }]))
                } else {
                    warn!(suffix, "segment digest mismatch");
                    apply_policy(self.policy, suffix)
                }
            }
            None => {
                // Not covered yet: hold until a manifest vouches for it.
                self.unverified.insert(suffix, content.clone());
                Ok(IndexerEvent::Data(Vec::new()))
            }
        }
    }

    fn digest_algorithm(&self, digest: &Bytes) -> hicn_auth::HashAlgorithm {
        match digest.len() {
            64 => hicn_auth::HashAlgorithm::Sha512,
            4 => hicn_auth::HashAlgorithm::Crc32,
            0 => hicn_auth::HashAlgorithm::Null,
            _ => hicn_auth::HashAlgorithm::Sha256,
        }
    }
}

impl Indexer for ManifestIndexer {
    fn next_suffix(&mut self) -> u32 {
        match self.pending_requests.pop_front() {
            Some(suffix) if suffix < MIN_PROBE_SUFFIX => suffix,
            _ => INVALID_SUFFIX,
        }
    }

    fn next_reassembly_suffix(&mut self) -> u32 {
        self.reassembly_queue.pop_front().unwrap_or(INVALID_SUFFIX)
    }

    fn final_suffix(&self) -> u32 {
        self.final_suffix
    }

    fn is_final_discovered(&self) -> bool {
        self.final_discovered
    }

    fn reset(&mut self, offset: u32) {
        self.pending_requests.clear();
        self.reassembly_queue.clear();
        self.suffix_map.clear();
        self.unverified.clear();
        self.final_suffix = INVALID_SUFFIX;
        self.final_discovered = false;
        // The content opens with a manifest at the starting suffix.
        self.pending_requests.push_back(offset);
    }

    fn on_content_object(
        &mut self,
        content: &ContentObject,
    ) -> Result<IndexerEvent, TransportError> {
        if content.name().is_probe() {
            return Ok(IndexerEvent::Probe {
                suffix: content.suffix(),
            });
        }

        if content.is_manifest() {
            self.on_manifest(content)
        } else {
            self.on_data(content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Prefix;

    fn prefix() -> Prefix {
        "b001::/64".parse().unwrap()
    }

    fn data_segment(suffix: u32, payload: &[u8], is_final: bool) -> ContentObject {
        let mut content = ContentObject::new(prefix().name(suffix), Bytes::copy_from_slice(payload));
        content.set_final(is_final);
        content
    }

    #[test]
    fn test_incremental_reset_law() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        indexer.reset(7);
        assert_eq!(indexer.next_suffix(), 7);
        assert_eq!(indexer.next_suffix(), 8);
        assert_eq!(indexer.next_suffix(), 9);
    }

    #[test]
    fn test_incremental_final_discovery() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        assert!(!indexer.is_final_discovered());

        indexer
            .on_content_object(&data_segment(4, b"last", true))
            .unwrap();
        assert!(indexer.is_final_discovered());
        assert_eq!(indexer.final_suffix(), 4);

        // Download pointer stops after the final suffix.
        for expected in 0..=4u32 {
            assert_eq!(indexer.next_suffix(), expected);
        }
        assert_eq!(indexer.next_suffix(), INVALID_SUFFIX);
    }

    #[test]
    fn test_incremental_rejects_probe_range_from_data_path() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        let probe = data_segment(MIN_PROBE_SUFFIX, b"", false);
        match indexer.on_content_object(&probe).unwrap() {
            IndexerEvent::Probe { suffix } => assert_eq!(suffix, MIN_PROBE_SUFFIX),
            other => panic!("expected probe event, got {other:?}"),
        }
    }

    #[test]
    fn test_incremental_exhausts_before_probe_range() {
        let mut indexer = IncrementalIndexer::new(None, VerificationPolicy::Abort);
        indexer.reset(MIN_PROBE_SUFFIX - 1);
        assert_eq!(indexer.next_suffix(), MIN_PROBE_SUFFIX - 1);
        assert_eq!(indexer.next_suffix(), INVALID_SUFFIX);
    }

    fn build_manifest(
        alg: hicn_auth::HashAlgorithm,
        segments: &[(u32, &ContentObject)],
        next: Option<u32>,
        final_suffix: Option<u32>,
        manifest_suffix: u32,
    ) -> ContentObject {
        let mut manifest = Manifest::new(alg);
        for (suffix, content) in segments {
            manifest.push(*suffix, content.digest(alg));
        }
        manifest.next_manifest = next;
        manifest.final_suffix = final_suffix;
        manifest.into_content_object(prefix().name(manifest_suffix), 10_000)
    }

    #[test]
    fn test_manifest_flow_in_order() {
        let alg = hicn_auth::HashAlgorithm::Sha256;
        let mut indexer = ManifestIndexer::new(None, VerificationPolicy::Abort);

        // First request goes to the manifest at suffix 0.
        assert_eq!(indexer.next_suffix(), 0);
        assert_eq!(indexer.next_suffix(), INVALID_SUFFIX);

        let seg1 = data_segment(1, b"one", false);
        let seg2 = data_segment(2, b"two", false);
        let manifest = build_manifest(alg, &[(1, &seg1), (2, &seg2)], None, Some(2), 0);

        match indexer.on_content_object(&manifest).unwrap() {
            IndexerEvent::Data(released) => assert!(released.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(indexer.is_final_discovered());
        assert_eq!(indexer.final_suffix(), 2);

        // Coverage known: data suffixes are handed out next.
        assert_eq!(indexer.next_suffix(), 1);
        assert_eq!(indexer.next_suffix(), 2);

        match indexer.on_content_object(&seg1).unwrap() {
            IndexerEvent::Data(released) => {
                assert_eq!(released.len(), 1);
                assert_eq!(released[0].suffix, 1);
                assert!(!released[0].is_final);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match indexer.on_content_object(&seg2).unwrap() {
            IndexerEvent::Data(released) => {
                assert_eq!(released.len(), 1);
                assert!(released[0].is_final);
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert_eq!(indexer.unverified_residue(), 0);
        assert_eq!(indexer.next_reassembly_suffix(), 1);
        assert_eq!(indexer.next_reassembly_suffix(), 2);
        assert_eq!(indexer.next_reassembly_suffix(), INVALID_SUFFIX);
    }

    #[test]
    fn test_manifest_releases_buffered_segments() {
        let alg = hicn_auth::HashAlgorithm::Sha256;
        let mut indexer = ManifestIndexer::new(None, VerificationPolicy::Abort);

        let seg1 = data_segment(1, b"one", false);
        let seg2 = data_segment(2, b"two", false);

        // Segments arrive before their manifest: buffered unverified.
        match indexer.on_content_object(&seg2).unwrap() {
            IndexerEvent::Data(released) => assert!(released.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }
        match indexer.on_content_object(&seg1).unwrap() {
            IndexerEvent::Data(released) => assert!(released.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(indexer.unverified_residue(), 2);

        let manifest = build_manifest(alg, &[(1, &seg1), (2, &seg2)], None, Some(2), 0);
        match indexer.on_content_object(&manifest).unwrap() {
            IndexerEvent::Data(released) => {
                let suffixes: Vec<u32> = released.iter().map(|s| s.suffix).collect();
                assert_eq!(suffixes, vec![1, 2]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(indexer.unverified_residue(), 0);
    }

    #[test]
    fn test_manifest_digest_mismatch_aborts() {
        let alg = hicn_auth::HashAlgorithm::Sha256;
        let mut indexer = ManifestIndexer::new(None, VerificationPolicy::Abort);

        let seg1 = data_segment(1, b"one", false);
        let manifest = build_manifest(alg, &[(1, &seg1)], None, Some(1), 0);
        indexer.on_content_object(&manifest).unwrap();

        let tampered = data_segment(1, b"0ne", false);
        assert!(matches!(
            indexer.on_content_object(&tampered),
            Err(TransportError::VerificationFailed { suffix: 1 })
        ));
    }

    #[test]
    fn test_manifest_digest_mismatch_drop_policy() {
        let alg = hicn_auth::HashAlgorithm::Sha256;
        let mut indexer = ManifestIndexer::new(None, VerificationPolicy::Drop);

        let seg1 = data_segment(1, b"one", false);
        let manifest = build_manifest(alg, &[(1, &seg1)], None, Some(1), 0);
        indexer.on_content_object(&manifest).unwrap();

        let tampered = data_segment(1, b"0ne", false);
        match indexer.on_content_object(&tampered).unwrap() {
            IndexerEvent::Dropped { suffix, surfaced } => {
                assert_eq!(suffix, 1);
                assert!(!surfaced);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_out_of_order_manifests_keep_requests_ascending() {
        let alg = hicn_auth::HashAlgorithm::Sha256;
        let mut indexer = ManifestIndexer::new(None, VerificationPolicy::Abort);

        let seg1 = data_segment(1, b"a", false);
        let seg2 = data_segment(2, b"b", false);
        let first = build_manifest(alg, &[(1, &seg1), (2, &seg2)], Some(3), None, 0);

        let seg4 = data_segment(4, b"c", false);
        let second = build_manifest(alg, &[(4, &seg4)], None, Some(4), 3);

        // The second manifest overtakes the first on the way back.
        indexer.on_content_object(&second).unwrap();
        indexer.on_content_object(&first).unwrap();

        // Catch-up still requests the smallest viable suffix first.
        assert_eq!(indexer.next_suffix(), 0);
        assert_eq!(indexer.next_suffix(), 1);
        assert_eq!(indexer.next_suffix(), 2);
        assert_eq!(indexer.next_suffix(), 3);
        assert_eq!(indexer.next_suffix(), 4);
        assert_eq!(indexer.next_suffix(), INVALID_SUFFIX);

        // Reassembly order is wire-suffix order as well.
        assert_eq!(indexer.next_reassembly_suffix(), 1);
        assert_eq!(indexer.next_reassembly_suffix(), 2);
        assert_eq!(indexer.next_reassembly_suffix(), 4);
    }

    #[test]
    fn test_manifest_chain() {
        let alg = hicn_auth::HashAlgorithm::Sha256;
        let mut indexer = ManifestIndexer::new(None, VerificationPolicy::Abort);

        let seg1 = data_segment(1, b"a", false);
        let seg2 = data_segment(2, b"b", false);
        let first = build_manifest(alg, &[(1, &seg1), (2, &seg2)], Some(3), None, 0);

        let seg4 = data_segment(4, b"c", false);
        let second = build_manifest(alg, &[(4, &seg4)], None, Some(4), 3);

        assert_eq!(indexer.next_suffix(), 0);
        indexer.on_content_object(&first).unwrap();
        assert!(!indexer.is_final_discovered());

        assert_eq!(indexer.next_suffix(), 1);
        assert_eq!(indexer.next_suffix(), 2);
        assert_eq!(indexer.next_suffix(), 3); // next manifest

        indexer.on_content_object(&second).unwrap();
        assert!(indexer.is_final_discovered());
        assert_eq!(indexer.next_suffix(), 4);
        assert_eq!(indexer.next_suffix(), INVALID_SUFFIX);
    }
}
