//! Byte-stream consumer transport.
//!
//! Drives the request loop: keeps `in_flight < W` interests outstanding,
//! feeds arrivals through the indexer's verification pipeline into
//! reassembly, retransmits on PIT deadline expiry and reports periodic
//! statistics. `W` is fixed (CBR) or RTT-adaptive (RAAQM).

use crate::config::{ConsumerCallbacks, ConsumerConfig, ReadEvent, TransportAlgorithm};
use crate::error::TransportError;
use crate::indexer::{IncrementalIndexer, Indexer, IndexerEvent, ManifestIndexer};
use crate::name::{Name, INVALID_SUFFIX};
use crate::packet::Interest;
use crate::pit::PendingInterestTable;
use crate::portal::{PacketEvent, Portal};
use crate::raaqm::CongestionWindow;
use crate::reassembly::StreamReassembly;
use crate::stats::TransportStatistics;
use hicn_io::{PeriodicDeadline, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Slack added to the interest lifetime before a PIT entry expires.
const PIT_DEADLINE_SLACK: Duration = Duration::from_millis(10);

/// Floor for the reduced lifetime of retransmitted interests.
const MIN_RETX_LIFETIME_MS: u32 = 10;

/// Upper bound on one poll so stop requests stay responsive.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Consumer protocol lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Cancels a running consumer from another thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        StopHandle {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Byte-stream consumer socket.
pub struct StreamConsumer {
    config: ConsumerConfig,
    callbacks: ConsumerCallbacks,
    portal: Portal,
    pit: PendingInterestTable,
    indexer: Box<dyn Indexer + Send>,
    reassembly: StreamReassembly,
    window: CongestionWindow,
    stats: TransportStatistics,
    state: ConsumerState,
    stop: StopHandle,
    name: Option<Name>,
    received_anything: bool,
    first_interest_timeouts: u32,
}

impl StreamConsumer {
    pub fn new(
        config: ConsumerConfig,
        callbacks: ConsumerCallbacks,
        portal: Portal,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let indexer: Box<dyn Indexer + Send> = if config.manifest {
            Box::new(ManifestIndexer::new(
                config.verifier.clone(),
                config.verification_policy,
            ))
        } else {
            Box::new(IncrementalIndexer::new(
                config.verifier.clone(),
                config.verification_policy,
            ))
        };

        let window = match config.algorithm {
            TransportAlgorithm::Cbr => CongestionWindow::cbr(config.window_size),
            TransportAlgorithm::Raaqm => CongestionWindow::raaqm(
                config.window_size,
                config.max_window_size,
                config.beta,
                config.drop_factor,
            ),
            TransportAlgorithm::Rtc => {
                return Err(TransportError::InvalidConfiguration(
                    "RTC flows use the RTC consumer".into(),
                ))
            }
        };

        let stats = TransportStatistics::new(config.stats_alpha);

        Ok(StreamConsumer {
            config,
            callbacks,
            portal,
            pit: PendingInterestTable::new(),
            indexer,
            reassembly: StreamReassembly::new(),
            window,
            stats,
            state: ConsumerState::Idle,
            stop: StopHandle::new(),
            name: None,
            received_anything: false,
            first_interest_timeouts: 0,
        })
    }

    /// Handle to cancel a running download from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> &TransportStatistics {
        &self.stats
    }

    /// Download the content under `name`, driving the event loop to
    /// completion. Returns the total reassembled size.
    pub fn consume(&mut self, name: Name) -> Result<u64, TransportError> {
        info!(%name, "starting download");
        self.portal.register_prefix(*name.prefix());
        self.indexer.reset(name.suffix());
        self.reassembly.reset();
        self.pit.clear();
        self.name = Some(name);
        self.received_anything = false;
        self.first_interest_timeouts = 0;
        self.state = ConsumerState::Running;

        let mut stats_deadline =
            PeriodicDeadline::new(Duration::from_millis(self.config.stats_interval_ms));

        let result = self.run_loop(&mut stats_deadline);

        match &result {
            Ok(total) => info!(total, "download complete"),
            Err(e) => warn!(error = %e, "download failed"),
        }
        result
    }

    fn run_loop(
        &mut self,
        stats_deadline: &mut PeriodicDeadline,
    ) -> Result<u64, TransportError> {
        loop {
            if self.stop.is_stopped() && self.state == ConsumerState::Running {
                self.drain();
                return Ok(self.reassembly.total_bytes());
            }

            self.schedule_interests()?;

            // Nothing in flight and nothing left to request: the content
            // cannot complete (losses exhausted their budget).
            if self.pit.is_empty() && self.state == ConsumerState::Running {
                if self.reassembly.is_complete() {
                    return Ok(self.reassembly.total_bytes());
                }
                if self.received_anything || self.indexer.is_final_discovered() {
                    self.callbacks
                        .emit_read(ReadEvent::Error(TransportError::ReceiveFailed(
                            "download stalled".into(),
                        )));
                    self.state = ConsumerState::Stopped;
                    return Err(TransportError::ReceiveFailed("download stalled".into()));
                }
            }

            let timeout = self.poll_timeout(stats_deadline);
            match self.portal.poll(timeout) {
                Ok(Some(PacketEvent::Content(content))) => {
                    if let Some(total) = self.on_content(content)? {
                        return Ok(total);
                    }
                }
                // Consumers ignore inbound interests.
                Ok(Some(PacketEvent::Interest(_))) | Ok(None) => {}
                Err(e) => {
                    if matches!(e, TransportError::Disconnected) {
                        self.callbacks
                            .emit_read(ReadEvent::Error(TransportError::Disconnected));
                        self.state = ConsumerState::Draining;
                        self.drain();
                    }
                    return Err(e);
                }
            }

            self.handle_timeouts()?;

            if stats_deadline.fire_due() {
                self.stats
                    .update_average_window_size(self.window.window() as f64);
                self.stats
                    .update_average_pending_interests(self.pit.len() as f64);
                if let Some(cb) = &mut self.callbacks.stats_summary {
                    cb(&self.stats);
                }
            }
        }
    }

    fn poll_timeout(&self, stats_deadline: &PeriodicDeadline) -> Duration {
        let now = Timestamp::now();
        let mut timeout = MAX_POLL_INTERVAL;
        if let Some(deadline) = self.pit.next_deadline() {
            timeout = timeout.min(deadline.duration_since(now));
        }
        timeout
            .min(stats_deadline.remaining())
            .max(Duration::from_millis(1))
    }

    fn schedule_interests(&mut self) -> Result<(), TransportError> {
        if self.state != ConsumerState::Running {
            return Ok(());
        }
        let name = match self.name {
            Some(name) => name,
            None => return Ok(()),
        };

        while (self.pit.len() as u32) < self.window.window() {
            let suffix = self.indexer.next_suffix();
            if suffix == INVALID_SUFFIX {
                break;
            }
            self.send_interest(name.with_suffix(suffix))?;
        }
        Ok(())
    }

    fn send_interest(&mut self, name: Name) -> Result<(), TransportError> {
        let interest = Interest::new(name, self.config.interest_lifetime_ms);
        if let Some(cb) = &mut self.callbacks.interest_output {
            cb(&interest);
        }

        let now = Timestamp::now();
        let deadline = now
            + Duration::from_millis(self.config.interest_lifetime_ms as u64)
            + PIT_DEADLINE_SLACK;

        self.portal.send_interest(&interest)?;
        if self.pit.insert(name.suffix(), now, deadline).is_err() {
            // Already in flight; the indexer never hands a suffix out
            // twice, so this only happens on recovery re-requests.
            debug!(suffix = name.suffix(), "suffix already pending");
            return Ok(());
        }
        self.stats.update_interest_tx(1);
        Ok(())
    }

    /// Returns `Some(total)` when the download completed.
    fn on_content(
        &mut self,
        content: crate::packet::ContentObject,
    ) -> Result<Option<u64>, TransportError> {
        if let Some(cb) = &mut self.callbacks.content_object_input {
            cb(&content);
        }

        let suffix = content.suffix();
        let entry = match self.pit.remove(suffix) {
            Some(entry) => entry,
            // Unsolicited or duplicate: never delivered twice.
            None => return Ok(None),
        };

        self.received_anything = true;
        let now = Timestamp::now();
        if !entry.is_retransmitted() {
            let rtt_ms = now.duration_since(entry.sent_at).as_secs_f64() * 1000.0;
            self.stats.update_average_rtt(rtt_ms);
            self.window.on_data(rtt_ms);
        }
        self.stats
            .update_bytes_received(content.payload().len() as u64);

        match self.indexer.on_content_object(&content) {
            Ok(IndexerEvent::Data(segments)) => {
                if self.config.receive_buffer_size == 0 {
                    // Reassembly disabled: deliver in arrival order.
                    let mut done = false;
                    for segment in segments {
                        done |= segment.is_final;
                        self.callbacks.emit_read(ReadEvent::Data(segment.payload));
                    }
                    if done {
                        let total = self.stats.bytes_received();
                        self.callbacks
                            .emit_read(ReadEvent::Success { total_bytes: total });
                        self.state = ConsumerState::Stopped;
                        return Ok(Some(total));
                    }
                    return Ok(None);
                }

                for segment in segments {
                    self.reassembly.insert(segment);
                }
                let ready = self.reassembly.drain(self.indexer.as_mut());
                for payload in ready {
                    self.callbacks.emit_read(ReadEvent::Data(payload));
                }
                if self.reassembly.is_complete() {
                    let total = self.reassembly.total_bytes();
                    self.callbacks
                        .emit_read(ReadEvent::Success { total_bytes: total });
                    self.state = ConsumerState::Stopped;
                    return Ok(Some(total));
                }
                Ok(None)
            }
            Ok(IndexerEvent::Dropped { suffix, surfaced }) => {
                if surfaced {
                    self.callbacks.emit_read(ReadEvent::Error(
                        TransportError::VerificationFailed { suffix },
                    ));
                }
                // The segment is gone; request it again.
                if let Some(name) = self.name {
                    self.stats.update_retx_count(1);
                    self.send_interest(name.with_suffix(suffix))?;
                }
                Ok(None)
            }
            // Probe-range objects never reach the byte-stream data path.
            Ok(IndexerEvent::Probe { .. }) => Ok(None),
            Err(e) => {
                if let TransportError::VerificationFailed { suffix } = e {
                    self.callbacks.emit_read(ReadEvent::Error(
                        TransportError::VerificationFailed { suffix },
                    ));
                }
                self.state = ConsumerState::Stopped;
                Err(e)
            }
        }
    }

    fn handle_timeouts(&mut self) -> Result<(), TransportError> {
        let now = Timestamp::now();
        let expired = self.pit.expired(now);
        if expired.is_empty() {
            return Ok(());
        }

        let name = match self.name {
            Some(name) => name,
            None => return Ok(()),
        };

        for suffix in expired {
            // Producer-unreachable detection: the very first interest of a
            // content keeps timing out with nothing ever received.
            if !self.received_anything {
                self.first_interest_timeouts += 1;
                if self.first_interest_timeouts > self.config.first_interest_retries {
                    warn!("producer unreachable");
                    self.callbacks
                        .emit_read(ReadEvent::Error(TransportError::ProducerUnreachable));
                    self.state = ConsumerState::Stopped;
                    return Err(TransportError::ProducerUnreachable);
                }
            }

            let retx_count = match self.pit.get(suffix) {
                Some(entry) => entry.retx_count,
                None => continue,
            };

            if retx_count < self.config.max_retransmissions {
                let reduced = (self.config.interest_lifetime_ms >> (retx_count + 1))
                    .max(MIN_RETX_LIFETIME_MS);
                let interest = Interest::new(name.with_suffix(suffix), reduced);
                if let Some(cb) = &mut self.callbacks.interest_output {
                    cb(&interest);
                }
                self.portal.send_interest(&interest)?;

                let sent_at = Timestamp::now();
                let deadline =
                    sent_at + Duration::from_millis(reduced as u64) + PIT_DEADLINE_SLACK;
                let _ = self.pit.mark_retransmitted(suffix, sent_at, deadline);
                self.stats.update_retx_count(1);
                self.stats.update_interest_tx(1);
                self.window.on_timeout();
                debug!(suffix, retx = retx_count + 1, "interest retransmitted");
            } else {
                self.pit.remove(suffix);
                self.stats.update_lost_data(1);
                self.window.on_timeout();
                warn!(suffix, "retransmission budget exhausted, loss reported");
            }
        }
        Ok(())
    }

    fn drain(&mut self) {
        debug!("draining consumer");
        self.state = ConsumerState::Draining;
        self.pit.clear();
        self.portal.stop();
        self.state = ConsumerState::Stopped;
    }
}
