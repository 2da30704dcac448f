//! Per-round RTC observations.
//!
//! Collects what the consumer saw during the current round (data, NACKs,
//! probes, losses, RTT samples, producer hints) and folds it into a
//! summary at each round boundary.

/// Long-run RTT smoothing factor.
const RTT_ALPHA: f64 = 0.125;

/// What a finished round looked like.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundSummary {
    pub received_packets: u64,
    pub received_bytes: u64,
    pub lost_packets: u64,
    pub recovered_packets: u64,
    pub loss_ratio: f64,
    pub received_nacks: u64,
    pub received_probes: u64,
    pub received_rate_kbps: f64,
}

/// Rolling consumer-side view of the flow.
pub struct RtcState {
    // Current-round counters.
    received_packets: u64,
    received_bytes: u64,
    lost_packets: u64,
    recovered_packets: u64,
    received_nacks: u64,
    received_probes: u64,
    round_millis: u64,

    // Long-run estimates.
    avg_rtt_ms: f64,
    rtt_samples: u64,

    // Producer hints.
    producer_rate_kbps: u32,
    production_segment: u32,
}

impl RtcState {
    pub fn new(round_millis: u64) -> Self {
        RtcState {
            received_packets: 0,
            received_bytes: 0,
            lost_packets: 0,
            recovered_packets: 0,
            received_nacks: 0,
            received_probes: 0,
            round_millis,
            avg_rtt_ms: 0.0,
            rtt_samples: 0,
            producer_rate_kbps: 0,
            production_segment: 0,
        }
    }

    pub fn on_data(&mut self, bytes: usize) {
        self.received_packets += 1;
        self.received_bytes += bytes as u64;
    }

    pub fn on_rtt_sample(&mut self, rtt_ms: f64) {
        if self.rtt_samples == 0 {
            self.avg_rtt_ms = rtt_ms;
        } else {
            self.avg_rtt_ms = (1.0 - RTT_ALPHA) * self.avg_rtt_ms + RTT_ALPHA * rtt_ms;
        }
        self.rtt_samples += 1;
    }

    pub fn on_loss(&mut self, packets: u64) {
        self.lost_packets += packets;
    }

    pub fn on_recovered(&mut self) {
        self.recovered_packets += 1;
    }

    pub fn on_nack(&mut self, production_rate_kbps: u32, production_segment: u32) {
        self.received_nacks += 1;
        self.producer_rate_kbps = production_rate_kbps;
        if production_segment > self.production_segment {
            self.production_segment = production_segment;
        }
    }

    pub fn on_probe_reply(&mut self, rtt_ms: f64) {
        self.received_probes += 1;
        self.on_rtt_sample(rtt_ms);
    }

    /// The producer's rate hint carried in data headers.
    pub fn on_rate_hint(&mut self, rate_kbps: u32) {
        if rate_kbps > 0 {
            self.producer_rate_kbps = rate_kbps;
        }
    }

    /// A data packet at `suffix` proves production reached `suffix + 1`.
    pub fn on_production_evidence(&mut self, suffix: u32) {
        let implied = suffix.saturating_add(1);
        if implied > self.production_segment {
            self.production_segment = implied;
        }
    }

    pub fn avg_rtt_ms(&self) -> f64 {
        self.avg_rtt_ms
    }

    pub fn has_rtt(&self) -> bool {
        self.rtt_samples > 0
    }

    pub fn producer_rate_kbps(&self) -> u32 {
        self.producer_rate_kbps
    }

    pub fn production_segment(&self) -> u32 {
        self.production_segment
    }

    /// Expected producer output during one round, in packets.
    pub fn packets_per_round(&self, payload_size: usize) -> u64 {
        if payload_size == 0 {
            return 0;
        }
        let bytes_per_round =
            (self.producer_rate_kbps as u64 * 1000 / 8) * self.round_millis / 1000;
        (bytes_per_round / payload_size as u64).max(1)
    }

    /// Close the round: fold counters into a summary and start fresh.
    pub fn round_reset(&mut self) -> RoundSummary {
        let expected = self.received_packets + self.lost_packets;
        let loss_ratio = if expected > 0 {
            self.lost_packets as f64 / expected as f64
        } else {
            0.0
        };
        let received_rate_kbps = if self.round_millis > 0 {
            (self.received_bytes as f64 * 8.0) / self.round_millis as f64
        } else {
            0.0
        };

        let summary = RoundSummary {
            received_packets: self.received_packets,
            received_bytes: self.received_bytes,
            lost_packets: self.lost_packets,
            recovered_packets: self.recovered_packets,
            loss_ratio,
            received_nacks: self.received_nacks,
            received_probes: self.received_probes,
            received_rate_kbps,
        };

        self.received_packets = 0;
        self.received_bytes = 0;
        self.lost_packets = 0;
        self.recovered_packets = 0;
        self.received_nacks = 0;
        self.received_probes = 0;

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_summary_loss_ratio() {
        let mut state = RtcState::new(200);
        for _ in 0..8 {
            state.on_data(1400);
        }
        state.on_loss(2);

        let summary = state.round_reset();
        assert_eq!(summary.received_packets, 8);
        assert_eq!(summary.lost_packets, 2);
        assert!((summary.loss_ratio - 0.2).abs() < 1e-9);

        // Counters restart each round.
        let next = state.round_reset();
        assert_eq!(next.received_packets, 0);
        assert_eq!(next.loss_ratio, 0.0);
    }

    #[test]
    fn test_rtt_smoothing() {
        let mut state = RtcState::new(200);
        state.on_rtt_sample(100.0);
        assert!((state.avg_rtt_ms() - 100.0).abs() < 1e-9);

        state.on_rtt_sample(50.0);
        assert!(state.avg_rtt_ms() < 100.0);
        assert!(state.avg_rtt_ms() > 50.0);
    }

    #[test]
    fn test_production_tracking() {
        let mut state = RtcState::new(200);
        state.on_nack(2048, 40);
        assert_eq!(state.production_segment(), 40);
        assert_eq!(state.producer_rate_kbps(), 2048);

        // Older announcements never move production backwards.
        state.on_nack(2048, 30);
        assert_eq!(state.production_segment(), 40);

        state.on_production_evidence(50);
        assert_eq!(state.production_segment(), 51);
    }

    #[test]
    fn test_packets_per_round() {
        let mut state = RtcState::new(200);
        state.on_nack(2048, 0);
        // 2048 kbps over 200 ms is 51200 bytes, 36 full 1400-byte packets.
        assert_eq!(state.packets_per_round(1400), 36);
    }
}
