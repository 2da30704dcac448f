//! Transport configuration and application callbacks.
//!
//! Every recognised option lives in a configuration record; every optional
//! notification is a closure field in a callbacks record. Both are handed
//! to the transport at construction time.

use crate::error::TransportError;
use crate::packet::{ContentObject, Interest};
use crate::stats::{TransportStatistics, DEFAULT_ALPHA};
use bytes::Bytes;
use hicn_auth::{CryptoSuite, Signer, VerificationPolicy, Verifier};
use std::sync::Arc;

/// Transport algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAlgorithm {
    /// Fixed congestion window.
    Cbr,
    /// RTT-driven adaptive window.
    Raaqm,
    /// Real-time datagram protocol.
    Rtc,
}

/// Events delivered through the consumer's read callback.
#[derive(Debug)]
pub enum ReadEvent {
    /// In-order application bytes (one segment payload).
    Data(Bytes),
    /// The content is complete.
    Success { total_bytes: u64 },
    /// A transport error reached the application. Fatal errors end the
    /// download; surfaced verification failures do not.
    Error(TransportError),
}

pub type InterestCallback = Box<dyn FnMut(&Interest) + Send>;
pub type ContentObjectCallback = Box<dyn FnMut(&ContentObject) + Send>;
pub type ReadCallback = Box<dyn FnMut(ReadEvent) + Send>;
pub type StatsCallback = Box<dyn FnMut(&TransportStatistics) + Send>;
/// `(error, bytes_produced)` once per user-visible produced stream.
pub type ContentProducedCallback = Box<dyn FnMut(Option<&TransportError>, u64) + Send>;

/// Consumer-side configuration.
pub struct ConsumerConfig {
    /// Initial window (CBR keeps it fixed).
    pub window_size: u32,
    /// Upper bound for the adaptive window.
    pub max_window_size: u32,
    /// CBR or RAAQM; RTC consumers use [`crate::rtc::RtcConsumer`].
    pub algorithm: TransportAlgorithm,
    /// RAAQM β (window decrease factor).
    pub beta: f64,
    /// RAAQM drop factor.
    pub drop_factor: f64,
    /// Lifetime stamped on every outgoing interest.
    pub interest_lifetime_ms: u32,
    /// 0 disables in-order reassembly: segments are delivered as they
    /// verify, in arrival order.
    pub receive_buffer_size: usize,
    /// Period of the stats-summary callback.
    pub stats_interval_ms: u64,
    /// Retransmissions per interest before the loss is reported.
    pub max_retransmissions: u32,
    /// Timeouts tolerated on the very first interest before the producer
    /// is declared unreachable.
    pub first_interest_retries: u32,
    /// Verifier consulted by the indexer.
    pub verifier: Option<Arc<dyn Verifier>>,
    /// What to do when verification does not accept a packet.
    pub verification_policy: VerificationPolicy,
    /// Expect manifest-covered content.
    pub manifest: bool,
    /// Smoothing factor for the statistics averages.
    pub stats_alpha: f64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            window_size: 16,
            max_window_size: 256,
            algorithm: TransportAlgorithm::Raaqm,
            beta: 0.99,
            drop_factor: 0.004,
            interest_lifetime_ms: 1000,
            receive_buffer_size: 128 * 1024,
            stats_interval_ms: 1000,
            max_retransmissions: 4,
            first_interest_retries: 4,
            verifier: None,
            verification_policy: VerificationPolicy::Abort,
            manifest: false,
            stats_alpha: DEFAULT_ALPHA,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.window_size == 0 {
            return Err(TransportError::InvalidConfiguration(
                "window size must be positive".into(),
            ));
        }
        if self.max_window_size < self.window_size {
            return Err(TransportError::InvalidConfiguration(
                "max window smaller than initial window".into(),
            ));
        }
        if self.interest_lifetime_ms == 0 {
            return Err(TransportError::InvalidConfiguration(
                "interest lifetime must be positive".into(),
            ));
        }
        if self.algorithm == TransportAlgorithm::Rtc {
            return Err(TransportError::InvalidConfiguration(
                "RTC flows use the RTC consumer".into(),
            ));
        }
        Ok(())
    }
}

/// Consumer-side callbacks. All optional; delivered from the protocol
/// loop, so they must not block.
#[derive(Default)]
pub struct ConsumerCallbacks {
    /// An interest is about to leave the portal.
    pub interest_output: Option<InterestCallback>,
    /// A content object arrived, before verification.
    pub content_object_input: Option<ContentObjectCallback>,
    /// The application-facing sink.
    pub read_callback: Option<ReadCallback>,
    /// Periodic statistics summary.
    pub stats_summary: Option<StatsCallback>,
}

impl ConsumerCallbacks {
    pub fn emit_read(&mut self, event: ReadEvent) {
        if let Some(cb) = &mut self.read_callback {
            cb(event);
        }
    }
}

/// Producer-side configuration.
pub struct ProducerConfig {
    /// Total frame budget per data packet; the segment payload is this
    /// minus header and signature headroom.
    pub data_packet_size: usize,
    /// Expiry stamped on produced content objects.
    pub content_expiry_ms: u32,
    /// Batch segments under signed manifests instead of signing each one.
    pub manifest: bool,
    /// Segments covered per manifest.
    pub manifest_capacity: usize,
    /// Digest algorithm for manifest entries.
    pub hash_algorithm: hicn_auth::HashAlgorithm,
    /// Signs manifests (manifest mode) or every segment (otherwise).
    pub signer: Option<Arc<dyn Signer>>,
    /// Output buffer capacity in content objects; oldest evicted first.
    pub output_buffer_size: usize,
    /// Reply from a pre-allocated pool, no real payload.
    pub virtual_mode: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            data_packet_size: 1500,
            content_expiry_ms: 600_000,
            manifest: false,
            manifest_capacity: 16,
            hash_algorithm: hicn_auth::HashAlgorithm::Sha256,
            signer: None,
            output_buffer_size: 200_000,
            virtual_mode: false,
        }
    }
}

/// Worst-case frame overhead ahead of the payload (header plus an IPv6
/// name).
const FRAME_HEADROOM: usize = 31;

impl ProducerConfig {
    /// Signature bytes to reserve per packet for the configured signer.
    pub fn signature_headroom(&self) -> usize {
        match self.signer.as_ref().map(|s| s.suite()) {
            Some(CryptoSuite::HmacSha256) => 32,
            Some(CryptoSuite::EcdsaSha256) => 64,
            Some(CryptoSuite::RsaSha256) => 512,
            None => 0,
        }
    }

    /// Usable payload bytes per data segment.
    pub fn max_segment_payload(&self) -> usize {
        self.data_packet_size
            .saturating_sub(FRAME_HEADROOM + self.signature_headroom())
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_segment_payload() == 0 {
            return Err(TransportError::InvalidConfiguration(format!(
                "data packet size {} leaves no payload room",
                self.data_packet_size
            )));
        }
        if self.manifest && self.manifest_capacity == 0 {
            return Err(TransportError::InvalidConfiguration(
                "manifest capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Producer-side callbacks.
#[derive(Default)]
pub struct ProducerCallbacks {
    /// An interest passed the prefix filter.
    pub interest_pass: Option<InterestCallback>,
    /// An interest fell outside every registered prefix.
    pub interest_drop: Option<InterestCallback>,
    /// An interest was satisfied from the output buffer.
    pub cache_hit: Option<InterestCallback>,
    /// An interest missed the output buffer; the application may produce.
    pub cache_miss: Option<InterestCallback>,
    /// Production (sync or async) finished.
    pub content_produced: Option<ContentProducedCallback>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_defaults_valid() {
        ConsumerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_consumer_rejects_zero_window() {
        let config = ConsumerConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_producer_payload_headroom() {
        let config = ProducerConfig::default();
        assert!(config.max_segment_payload() < config.data_packet_size);
        assert!(config.max_segment_payload() > 0);

        let signed = ProducerConfig {
            signer: Some(Arc::new(hicn_auth::SymmetricSigner::new("k"))),
            ..Default::default()
        };
        assert!(signed.max_segment_payload() < config.max_segment_payload());
    }

    #[test]
    fn test_producer_rejects_tiny_packets() {
        let config = ProducerConfig {
            data_packet_size: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
