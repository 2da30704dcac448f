//! RTC producer protocol.
//!
//! Paces datagram production at a configured rate (or replays a trace
//! schedule), serves interests that fall inside the production window from
//! the output buffer, and synthesizes NACKs carrying the current
//! production state for everything else — including probe interests, which
//! get an immediate reply for RTT sampling.

use crate::config::ProducerCallbacks;
use crate::consumer::StopHandle;
use crate::error::TransportError;
use crate::name::{Name, Prefix, MIN_PROBE_SUFFIX};
use crate::output_buffer::OutputBuffer;
use crate::packet::{ContentObject, Interest, NackPayload, RtcHeader, RTC_HEADER_SIZE};
use crate::portal::{PacketEvent, Portal};
use hicn_io::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace};

/// Poll granularity while pacing.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Rolling production-rate estimation window.
const RATE_WINDOW: Duration = Duration::from_millis(500);

/// Reschedule delay when the trace wraps around.
const TRACE_WRAP_DELAY_US: u64 = 1000;

/// One line of a production trace: when to send and how big.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub timestamp_us: u64,
    pub size_bytes: u32,
}

/// Flips real-time production on and off (interactive mode).
#[derive(Clone)]
pub struct ProductionSwitch {
    enabled: Arc<AtomicBool>,
}

impl ProductionSwitch {
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn toggle(&self) {
        self.enabled.fetch_xor(true, Ordering::AcqRel);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Shared view of what the producer has emitted.
#[derive(Clone)]
pub struct RtcProducerCounters {
    produced_packets: Arc<AtomicU64>,
    produced_bytes: Arc<AtomicU64>,
    production_segment: Arc<AtomicU32>,
}

impl RtcProducerCounters {
    fn new() -> Self {
        RtcProducerCounters {
            produced_packets: Arc::new(AtomicU64::new(0)),
            produced_bytes: Arc::new(AtomicU64::new(0)),
            production_segment: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn produced_packets(&self) -> u64 {
        self.produced_packets.load(Ordering::Acquire)
    }

    pub fn produced_bytes(&self) -> u64 {
        self.produced_bytes.load(Ordering::Acquire)
    }

    pub fn production_segment(&self) -> u32 {
        self.production_segment.load(Ordering::Acquire)
    }
}

/// RTC producer configuration.
pub struct RtcProducerConfig {
    /// Datagram payload size including the RTC header.
    pub payload_size: usize,
    /// Constant production rate; ignored when a trace is given.
    pub production_rate_kbps: u32,
    /// Expiry of produced datagrams; real-time data ages out fast.
    pub content_expiry_ms: u32,
    /// How many packets behind production are still served.
    pub buffer_depth: u32,
    /// Trace-driven schedule replacing the constant rate.
    pub trace: Option<Vec<TraceEntry>>,
}

impl Default for RtcProducerConfig {
    fn default() -> Self {
        RtcProducerConfig {
            payload_size: 1400,
            production_rate_kbps: 2048,
            content_expiry_ms: 1000,
            buffer_depth: 2048,
            trace: None,
        }
    }
}

impl RtcProducerConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.payload_size <= RTC_HEADER_SIZE {
            return Err(TransportError::InvalidConfiguration(format!(
                "payload size must exceed the {RTC_HEADER_SIZE}-byte header"
            )));
        }
        match &self.trace {
            Some(trace) if trace.is_empty() => Err(TransportError::InvalidConfiguration(
                "empty production trace".into(),
            )),
            None if self.production_rate_kbps == 0 => Err(TransportError::InvalidConfiguration(
                "production rate must be positive".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Real-time producer socket.
pub struct RtcProducer {
    config: RtcProducerConfig,
    callbacks: ProducerCallbacks,
    portal: Portal,
    prefix: Option<Prefix>,
    flow_name: Option<Name>,
    output_buffer: OutputBuffer,
    production_segment: u32,
    switch: ProductionSwitch,
    counters: RtcProducerCounters,
    filler: bytes::Bytes,
    trace_index: usize,
    rate_window_start: Timestamp,
    rate_window_bytes: u64,
    current_rate_kbps: u32,
}

impl RtcProducer {
    pub fn new(
        config: RtcProducerConfig,
        callbacks: ProducerCallbacks,
        portal: Portal,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        // Initial rate hint: nominal rate, or the trace average.
        let current_rate_kbps = match &config.trace {
            Some(trace) => trace_average_kbps(trace),
            None => config.production_rate_kbps,
        };

        let filler = bytes::Bytes::from(vec![b'X'; config.payload_size]);
        let buffer_limit = config.buffer_depth as usize;

        Ok(RtcProducer {
            config,
            callbacks,
            portal,
            prefix: None,
            flow_name: None,
            output_buffer: OutputBuffer::new(buffer_limit),
            production_segment: 0,
            switch: ProductionSwitch {
                enabled: Arc::new(AtomicBool::new(true)),
            },
            counters: RtcProducerCounters::new(),
            filler,
            trace_index: 0,
            rate_window_start: Timestamp::now(),
            rate_window_bytes: 0,
            current_rate_kbps,
        })
    }

    /// Serve (and produce) under `prefix`; the flow name is its suffix-0
    /// name.
    pub fn register_prefix(&mut self, prefix: Prefix) {
        self.portal.register_prefix(prefix);
        self.flow_name = Some(prefix.name(0));
        self.prefix = Some(prefix);
    }

    pub fn production_switch(&self) -> ProductionSwitch {
        self.switch.clone()
    }

    pub fn counters(&self) -> RtcProducerCounters {
        self.counters.clone()
    }

    pub fn production_segment(&self) -> u32 {
        self.production_segment
    }

    /// Run the production/serve loop until stopped (or for `run_for`).
    pub fn run(
        &mut self,
        stop: &StopHandle,
        run_for: Option<Duration>,
    ) -> Result<(), TransportError> {
        if self.flow_name.is_none() {
            return Err(TransportError::InvalidConfiguration(
                "no prefix registered".into(),
            ));
        }
        if let Some(prefix) = &self.prefix {
            info!(%prefix, "rtc producer running");
        }

        let started = Timestamp::now();
        let mut next_tick = started + self.current_interval();

        loop {
            let deadline_hit = run_for.map(|d| started.elapsed() >= d).unwrap_or(false);
            if stop.is_stopped() || deadline_hit {
                self.portal.stop();
                return Ok(());
            }

            let now = Timestamp::now();
            if self.switch.is_enabled() {
                // Absolute schedule: late wakeups catch up without
                // changing the long-run rate.
                while Timestamp::now() >= next_tick {
                    self.produce_one();
                    next_tick = next_tick + self.current_interval();
                }
            } else {
                // Paused: slide the schedule, keep the suffix sequence
                // gapless.
                next_tick = now + self.current_interval();
            }

            let timeout = next_tick
                .duration_since(Timestamp::now())
                .min(MAX_POLL_INTERVAL)
                .max(Duration::from_millis(1));

            match self.portal.poll(timeout) {
                Ok(Some(PacketEvent::Interest(interest))) => self.on_interest(&interest)?,
                Ok(Some(PacketEvent::Content(_))) | Ok(None) => {}
                Err(TransportError::Disconnected) => {
                    self.portal.stop();
                    return Err(TransportError::Disconnected);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Interval until the next datagram under the current schedule.
    fn current_interval(&self) -> Duration {
        match &self.config.trace {
            Some(trace) => {
                let here = trace[self.trace_index % trace.len()].timestamp_us;
                let next_index = (self.trace_index + 1) % trace.len();
                let micros = if next_index == 0 {
                    TRACE_WRAP_DELAY_US
                } else {
                    trace[next_index].timestamp_us.saturating_sub(here)
                };
                Duration::from_micros(micros.max(1))
            }
            None => {
                let micros =
                    self.config.payload_size as u64 * 8000 / self.config.production_rate_kbps as u64;
                Duration::from_micros(micros.max(1))
            }
        }
    }

    fn produce_one(&mut self) {
        let flow_name = match self.flow_name {
            Some(name) => name,
            None => return,
        };

        let size = match &self.config.trace {
            Some(trace) => {
                let entry = trace[self.trace_index % trace.len()];
                self.trace_index += 1;
                (entry.size_bytes as usize).clamp(RTC_HEADER_SIZE + 1, self.config.payload_size)
            }
            None => self.config.payload_size,
        };

        let header = RtcHeader {
            timestamp_ms: unix_millis(),
            production_rate: self.current_rate_kbps(),
        };
        let mut payload = bytes::BytesMut::with_capacity(size);
        payload.extend_from_slice(&header.encode());
        payload.extend_from_slice(&self.filler[..size - RTC_HEADER_SIZE]);

        let suffix = self.production_segment;
        let mut content = ContentObject::new(flow_name.with_suffix(suffix), payload.freeze());
        content.set_expiry_ms(self.config.content_expiry_ms);
        self.output_buffer.insert(content);

        self.production_segment += 1;
        self.counters
            .production_segment
            .store(self.production_segment, Ordering::Release);
        self.counters.produced_packets.fetch_add(1, Ordering::AcqRel);
        self.counters
            .produced_bytes
            .fetch_add(size as u64, Ordering::AcqRel);

        self.rate_window_bytes += size as u64;
        trace!(suffix, size, "datagram produced");
    }

    fn current_rate_kbps(&mut self) -> u32 {
        let elapsed = self.rate_window_start.elapsed();
        if elapsed >= RATE_WINDOW {
            let kbps = (self.rate_window_bytes * 8) as f64 / elapsed.as_millis().max(1) as f64;
            self.current_rate_kbps = kbps as u32;
            self.rate_window_start = Timestamp::now();
            self.rate_window_bytes = 0;
        }
        self.current_rate_kbps
    }

    fn on_interest(&mut self, interest: &Interest) -> Result<(), TransportError> {
        if let Some(cb) = &mut self.callbacks.interest_pass {
            cb(interest);
        }

        let suffix = interest.suffix();
        if suffix >= MIN_PROBE_SUFFIX {
            // Probe: immediate NACK reply for RTT sampling.
            return self.send_nack(*interest.name());
        }

        let in_window = suffix < self.production_segment
            && self.production_segment - suffix <= self.config.buffer_depth;

        if in_window {
            let served = match self.output_buffer.get(suffix) {
                Some(content) => {
                    let content = content.clone();
                    if let Some(cb) = &mut self.callbacks.cache_hit {
                        cb(interest);
                    }
                    self.portal.send_content(&content)?;
                    true
                }
                None => false,
            };
            if served {
                return Ok(());
            }
            // Aged out of the buffer: the consumer needs to move on.
            if let Some(cb) = &mut self.callbacks.cache_miss {
                cb(interest);
            }
            return self.send_nack(*interest.name());
        }

        debug!(
            suffix,
            production = self.production_segment,
            "interest outside production window"
        );
        self.send_nack(*interest.name())
    }

    fn send_nack(&mut self, name: Name) -> Result<(), TransportError> {
        let rate = self.current_rate_kbps();
        let nack = NackPayload {
            timestamp_ms: unix_millis(),
            production_rate: rate,
            production_segment: self.production_segment,
        };

        let mut content = ContentObject::new(name, nack.encode());
        content.set_nack(true);
        content.set_expiry_ms(0);
        self.portal.send_content(&content)
    }
}

fn trace_average_kbps(trace: &[TraceEntry]) -> u32 {
    if trace.len() < 2 {
        return 0;
    }
    let total_bytes: u64 = trace.iter().map(|e| e.size_bytes as u64).sum();
    let span_us = trace
        .last()
        .map(|last| last.timestamp_us.saturating_sub(trace[0].timestamp_us))
        .unwrap_or(0);
    if span_us == 0 {
        return 0;
    }
    ((total_bytes * 8 * 1000) / span_us) as u32
}
