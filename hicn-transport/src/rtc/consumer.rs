//! RTC consumer protocol.
//!
//! Chases a live flow: interests are scheduled against a rate-controlled
//! window, NACKs re-synchronize the consumer with the producer's
//! production suffix, probes keep the RTT estimate fresh, and suffix gaps
//! are retransmitted through the recovery list. Rounds are fixed
//! wall-clock intervals at which estimates and the sync state are
//! recomputed.

use crate::config::{ConsumerCallbacks, ReadEvent};
use crate::consumer::{ConsumerState, StopHandle};
use crate::error::TransportError;
use crate::name::{Name, MIN_PROBE_SUFFIX};
use crate::packet::{ContentObject, Interest, NackPayload, RtcHeader, RTC_HEADER_SIZE};
use crate::pit::PendingInterestTable;
use crate::portal::{PacketEvent, Portal};
use crate::reassembly::DatagramReassembly;
use crate::rtc::rate_control::{RtcRateControl, SyncState};
use crate::rtc::recovery::RecoveryList;
use crate::rtc::state::RtcState;
use crate::stats::{TransportState, TransportStatistics};
use hicn_io::{PeriodicDeadline, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Slack added to the interest lifetime before a PIT entry expires.
const PIT_DEADLINE_SLACK: Duration = Duration::from_millis(10);

/// Poll granularity; RTC timers are finer than the byte-stream ones.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Probe entries older than this are forgotten.
const PROBE_EXPIRY: Duration = Duration::from_secs(3);

/// Probe suffixes cycle within the reserved range.
const PROBE_RANGE: u32 = 0x0FFF_FFFE;

/// RTC consumer configuration.
pub struct RtcConsumerConfig {
    pub max_window_size: u32,
    pub interest_lifetime_ms: u32,
    pub stats_interval_ms: u64,
    /// Round length: estimates and sync state recompute at this cadence.
    pub round_interval_ms: u64,
    pub probe_interval_ms: u64,
    /// Retransmissions per lost suffix before it is abandoned.
    pub max_retransmissions: u32,
    pub rtx_interval_ms: u64,
    /// Expected datagram payload size, for window sizing.
    pub payload_size: usize,
    pub stats_alpha: f64,
}

impl Default for RtcConsumerConfig {
    fn default() -> Self {
        RtcConsumerConfig {
            max_window_size: 256,
            interest_lifetime_ms: 1000,
            stats_interval_ms: 1000,
            round_interval_ms: 200,
            probe_interval_ms: 250,
            max_retransmissions: 3,
            rtx_interval_ms: 20,
            payload_size: 1400,
            // RTC reporting wants instantaneous values.
            stats_alpha: 0.0,
        }
    }
}

/// Real-time consumer socket.
pub struct RtcConsumer {
    config: RtcConsumerConfig,
    callbacks: ConsumerCallbacks,
    portal: Portal,
    pit: PendingInterestTable,
    state: RtcState,
    rc: RtcRateControl,
    recovery: RecoveryList,
    datagram: DatagramReassembly,
    stats: TransportStatistics,
    stop: StopHandle,
    lifecycle: ConsumerState,
    name: Option<Name>,
    /// Next suffix the scheduler will request.
    next_segment: u32,
    /// Next suffix expected in order; everything below is either received,
    /// in recovery, or abandoned.
    next_expected: u32,
    /// Suffixes below this are stale (pre-jump) and never recovered.
    live_base: u32,
    probe_counter: u32,
    pending_probes: HashMap<u32, Timestamp>,
    sched_pause_until: Option<Timestamp>,
}

impl RtcConsumer {
    pub fn new(
        config: RtcConsumerConfig,
        callbacks: ConsumerCallbacks,
        portal: Portal,
    ) -> Result<Self, TransportError> {
        if config.payload_size == 0 {
            return Err(TransportError::InvalidConfiguration(
                "payload size must be positive".into(),
            ));
        }

        let state = RtcState::new(config.round_interval_ms);
        let rc = RtcRateControl::new(config.max_window_size);
        let recovery = RecoveryList::new(
            config.max_retransmissions,
            Duration::from_millis(config.rtx_interval_ms),
        );
        let stats = TransportStatistics::new(config.stats_alpha);

        Ok(RtcConsumer {
            config,
            callbacks,
            portal,
            pit: PendingInterestTable::new(),
            state,
            rc,
            recovery,
            datagram: DatagramReassembly::new(),
            stats,
            stop: StopHandle::new(),
            lifecycle: ConsumerState::Idle,
            name: None,
            next_segment: 0,
            next_expected: 0,
            live_base: 0,
            probe_counter: 0,
            pending_probes: HashMap::new(),
            sched_pause_until: None,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> &TransportStatistics {
        &self.stats
    }

    pub fn sync_state(&self) -> SyncState {
        self.rc.state()
    }

    /// Join the live flow under `name` and run until stopped (or for
    /// `run_for` when given).
    pub fn consume(
        &mut self,
        name: Name,
        run_for: Option<Duration>,
    ) -> Result<(), TransportError> {
        info!(%name, "joining live flow");
        self.portal.register_prefix(*name.prefix());
        self.name = Some(name);
        self.next_segment = name.suffix();
        self.next_expected = name.suffix();
        self.live_base = name.suffix();
        self.lifecycle = ConsumerState::Running;

        let started = Timestamp::now();
        let mut round_deadline =
            PeriodicDeadline::new(Duration::from_millis(self.config.round_interval_ms));
        let mut probe_deadline =
            PeriodicDeadline::new(Duration::from_millis(self.config.probe_interval_ms));
        let mut stats_deadline =
            PeriodicDeadline::new(Duration::from_millis(self.config.stats_interval_ms));

        // Opening probe: samples RTT and learns the production suffix
        // before any data interest goes out.
        self.send_probe()?;

        loop {
            let deadline_hit = run_for
                .map(|d| started.elapsed() >= d)
                .unwrap_or(false);
            if self.stop.is_stopped() || deadline_hit {
                self.drain();
                return Ok(());
            }

            self.retransmit_due()?;
            self.schedule_interests()?;

            let timeout = self.poll_timeout(&round_deadline, &probe_deadline, &stats_deadline);
            match self.portal.poll(timeout) {
                Ok(Some(PacketEvent::Content(content))) => self.on_content(content)?,
                Ok(Some(PacketEvent::Interest(_))) | Ok(None) => {}
                Err(TransportError::Disconnected) => {
                    self.callbacks
                        .emit_read(ReadEvent::Error(TransportError::Disconnected));
                    self.drain();
                    return Err(TransportError::Disconnected);
                }
                Err(e) => return Err(e),
            }

            self.handle_timeouts();

            if round_deadline.fire_due() {
                self.new_round();
            }
            if probe_deadline.fire_due() {
                self.send_probe()?;
                self.expire_stale_probes();
            }
            if stats_deadline.fire_due() {
                self.stats
                    .update_average_window_size(self.rc.window() as f64);
                self.stats
                    .update_average_pending_interests(self.pit.len() as f64);
                if let Some(cb) = &mut self.callbacks.stats_summary {
                    cb(&self.stats);
                }
            }
        }
    }

    fn poll_timeout(
        &self,
        round: &PeriodicDeadline,
        probe: &PeriodicDeadline,
        stats: &PeriodicDeadline,
    ) -> Duration {
        let now = Timestamp::now();
        let mut timeout = MAX_POLL_INTERVAL
            .min(round.remaining())
            .min(probe.remaining())
            .min(stats.remaining());
        if let Some(deadline) = self.pit.next_deadline() {
            timeout = timeout.min(deadline.duration_since(now));
        }
        if let Some(until) = self.sched_pause_until {
            timeout = timeout.min(until.duration_since(now));
        }
        timeout.max(Duration::from_millis(1))
    }

    fn schedule_interests(&mut self) -> Result<(), TransportError> {
        let name = match self.name {
            Some(name) => name,
            None => return Ok(()),
        };

        if let Some(until) = self.sched_pause_until {
            if Timestamp::now() < until {
                return Ok(());
            }
            self.sched_pause_until = None;
        }

        while (self.pit.len() as u32) < self.rc.window() && self.next_segment < MIN_PROBE_SUFFIX
        {
            let suffix = self.next_segment;
            self.next_segment += 1;
            self.send_interest(name.with_suffix(suffix), false)?;
        }
        Ok(())
    }

    fn send_interest(&mut self, name: Name, is_rtx: bool) -> Result<(), TransportError> {
        let interest = Interest::new(name, self.config.interest_lifetime_ms);
        if let Some(cb) = &mut self.callbacks.interest_output {
            cb(&interest);
        }

        let now = Timestamp::now();
        let deadline = now
            + Duration::from_millis(self.config.interest_lifetime_ms as u64)
            + PIT_DEADLINE_SLACK;

        self.portal.send_interest(&interest)?;
        let suffix = name.suffix();
        if self.pit.contains(suffix) {
            let _ = self.pit.mark_retransmitted(suffix, now, deadline);
        } else {
            let _ = self.pit.insert(suffix, now, deadline);
        }
        self.stats.update_interest_tx(1);
        if is_rtx {
            self.stats.update_retx_count(1);
        }
        Ok(())
    }

    fn send_probe(&mut self) -> Result<(), TransportError> {
        let name = match self.name {
            Some(name) => name,
            None => return Ok(()),
        };

        let suffix = MIN_PROBE_SUFFIX + (self.probe_counter % PROBE_RANGE);
        self.probe_counter += 1;

        let interest = Interest::new(name.with_suffix(suffix), self.config.interest_lifetime_ms);
        if let Some(cb) = &mut self.callbacks.interest_output {
            cb(&interest);
        }
        self.portal.send_interest(&interest)?;
        self.pending_probes.insert(suffix, Timestamp::now());
        self.stats.update_interest_tx(1);
        trace!(suffix, "probe out");
        Ok(())
    }

    fn expire_stale_probes(&mut self) {
        self.pending_probes
            .retain(|_, sent| sent.elapsed() < PROBE_EXPIRY);
    }

    fn retransmit_due(&mut self) -> Result<(), TransportError> {
        let name = match self.name {
            Some(name) => name,
            None => return Ok(()),
        };

        let now = Timestamp::now();
        let (due, abandoned) = self.recovery.due_retransmissions(now);
        for suffix in due {
            self.send_interest(name.with_suffix(suffix), true)?;
        }
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "recovery abandoned");
        }
        Ok(())
    }

    fn on_content(&mut self, content: ContentObject) -> Result<(), TransportError> {
        if let Some(cb) = &mut self.callbacks.content_object_input {
            cb(&content);
        }

        if content.is_nack() {
            self.on_nack(&content);
            return Ok(());
        }
        self.on_data(content);
        Ok(())
    }

    fn on_nack(&mut self, content: &ContentObject) {
        let suffix = content.suffix();
        let nack = match NackPayload::decode(content.payload()) {
            Ok(nack) => nack,
            Err(e) => {
                debug!(error = %e, "malformed nack dropped");
                return;
            }
        };

        self.pit.remove(suffix);
        self.stats.update_received_nacks(1);
        self.state
            .on_nack(nack.production_rate, nack.production_segment);

        if suffix >= MIN_PROBE_SUFFIX {
            if let Some(sent) = self.pending_probes.remove(&suffix) {
                let rtt_ms = sent.elapsed().as_secs_f64() * 1000.0;
                self.state.on_probe_reply(rtt_ms);
                self.stats.update_average_rtt(rtt_ms);
                trace!(suffix, rtt_ms, "probe reply");
            }
            // Joining consumers learn the live edge from the first probe.
            if self.next_expected == self.next_segment && self.next_expected
                < nack.production_segment
            {
                self.jump_to(nack.production_segment);
            }
            return;
        }

        if suffix < nack.production_segment {
            // Behind production: jump forward to the live edge.
            debug!(
                suffix,
                production = nack.production_segment,
                "out of sync, jumping forward"
            );
            self.jump_to(nack.production_segment);
        } else if suffix > nack.production_segment {
            // Requesting ahead of production: contract and come back to
            // the earliest unserved suffix once production catches up.
            self.rc.on_window_too_large();
            if suffix < self.next_segment {
                self.next_segment = suffix;
            }
            self.sched_pause_until =
                Some(Timestamp::now() + self.production_interval(nack.production_rate));
        }
    }

    /// Time the producer needs for one packet at its announced rate.
    fn production_interval(&self, rate_kbps: u32) -> Duration {
        if rate_kbps == 0 {
            return Duration::from_millis(5);
        }
        let micros = self.config.payload_size as u64 * 8000 / rate_kbps as u64;
        Duration::from_micros(micros.clamp(200, 50_000) / 2)
    }

    fn jump_to(&mut self, production_segment: u32) {
        if production_segment > self.next_segment {
            self.next_segment = production_segment;
        }
        if production_segment > self.next_expected {
            self.next_expected = production_segment;
        }
        self.live_base = self.live_base.max(production_segment);
        self.recovery.remove_below(self.live_base);
    }

    fn on_data(&mut self, content: ContentObject) {
        let suffix = content.suffix();
        let now = Timestamp::now();

        if let Some(entry) = self.pit.remove(suffix) {
            if !entry.is_retransmitted() {
                let rtt_ms = now.duration_since(entry.sent_at).as_secs_f64() * 1000.0;
                self.state.on_rtt_sample(rtt_ms);
                self.stats.update_average_rtt(rtt_ms);
            }
        }

        let payload = content.payload().clone();
        self.stats.update_bytes_received(payload.len() as u64);
        self.state.on_data(payload.len());
        self.state.on_production_evidence(suffix);

        let media = match RtcHeader::decode(&payload) {
            Ok(header) => {
                self.state.on_rate_hint(header.production_rate);
                payload.slice(RTC_HEADER_SIZE..)
            }
            // Tolerate flows without the RTC header.
            Err(_) => payload,
        };

        if suffix >= self.next_expected {
            if suffix > self.next_expected {
                let gap = (suffix - self.next_expected) as u64;
                for lost in self.next_expected..suffix {
                    self.recovery.add(lost);
                }
                self.state.on_loss(gap);
                self.stats.update_lost_data(gap);
                debug!(from = self.next_expected, to = suffix, "gap detected");
            }
            self.next_expected = suffix + 1;
            self.deliver(media);
        } else if self.recovery.contains(suffix) {
            self.recovery.remove(suffix);
            self.state.on_recovered();
            self.stats.update_recovered_data(media.len() as u64);
            debug!(suffix, "segment recovered");
            self.deliver(media);
        }
        // Anything else is a duplicate: delivered at most once.
    }

    fn deliver(&mut self, media: bytes::Bytes) {
        let payload = self.datagram.deliver(media);
        self.callbacks.emit_read(ReadEvent::Data(payload));
    }

    fn handle_timeouts(&mut self) {
        let now = Timestamp::now();
        for suffix in self.pit.expired(now) {
            self.pit.remove(suffix);
            if suffix < MIN_PROBE_SUFFIX && suffix >= self.live_base {
                self.recovery.add(suffix);
            }
        }
    }

    fn new_round(&mut self) {
        let summary = self.state.round_reset();
        self.stats.update_loss_ratio(summary.loss_ratio);

        if self.state.has_rtt() {
            self.rc.update_window(
                self.state.producer_rate_kbps(),
                self.state.avg_rtt_ms(),
                self.config.payload_size,
            );
        }

        let gap = self.state.production_segment() as i64 - self.next_expected as i64;
        let round_packets = self.state.packets_per_round(self.config.payload_size);
        let sync = self.rc.update_sync_state(gap, round_packets);
        self.stats.update_state(match sync {
            SyncState::CatchUp => TransportState::CatchUp,
            SyncState::InSync => TransportState::InSync,
        });
        trace!(?sync, gap, "round boundary");
    }

    fn drain(&mut self) {
        debug!("draining rtc consumer");
        self.lifecycle = ConsumerState::Draining;
        self.pit.clear();
        self.pending_probes.clear();
        self.recovery.clear();
        self.portal.stop();
        self.lifecycle = ConsumerState::Stopped;
    }

    pub fn lifecycle(&self) -> ConsumerState {
        self.lifecycle
    }

    pub fn delivered_datagrams(&self) -> u64 {
        self.datagram.delivered_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hicn_io::LoopbackConnector;

    fn rtc_pair() -> (RtcConsumer, LoopbackConnector) {
        let (a, b) = LoopbackConnector::pair();
        let consumer = RtcConsumer::new(
            RtcConsumerConfig::default(),
            ConsumerCallbacks::default(),
            Portal::new(Box::new(a)),
        )
        .unwrap();
        (consumer, b)
    }

    #[test]
    fn test_rejects_zero_payload_size() {
        let (a, _b) = LoopbackConnector::pair();
        let config = RtcConsumerConfig {
            payload_size: 0,
            ..Default::default()
        };
        assert!(RtcConsumer::new(config, ConsumerCallbacks::default(), Portal::new(Box::new(a)))
            .is_err());
    }

    #[test]
    fn test_run_for_deadline_stops() {
        let (mut consumer, _peer) = rtc_pair();
        let name: Name = "b001::1|0".parse().unwrap();

        consumer
            .consume(name, Some(Duration::from_millis(80)))
            .unwrap();
        assert_eq!(consumer.lifecycle(), ConsumerState::Stopped);
        // The opening probe and some data interests went out.
        assert!(consumer.stats().interest_tx() > 0);
    }

    #[test]
    fn test_stop_handle() {
        let (mut consumer, _peer) = rtc_pair();
        let handle = consumer.stop_handle();
        handle.stop();

        let name: Name = "b001::1|0".parse().unwrap();
        consumer.consume(name, None).unwrap();
        assert_eq!(consumer.lifecycle(), ConsumerState::Stopped);
    }
}
