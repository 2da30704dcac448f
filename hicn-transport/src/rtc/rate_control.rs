//! RTC window sizing and sync state.
//!
//! The target window is the bandwidth-delay product of the producer's
//! announced rate and the observed RTT; congestion signals ("window too
//! large" NACKs) contract it multiplicatively. The consumer is `CatchUp`
//! until its next expected suffix is within a round of the producer's
//! production suffix, and falls back to `CatchUp` when the gap exceeds
//! that again.

/// Smallest usable interest window.
const MIN_SYNC_WINDOW: u32 = 4;

/// Contraction applied on a window-too-large signal.
const WINDOW_CONTRACTION: f64 = 0.5;

/// Consumer synchronisation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    CatchUp,
    InSync,
}

/// Sizes the RTC interest window.
pub struct RtcRateControl {
    sync_window: f64,
    max_sync_window: u32,
    state: SyncState,
}

impl RtcRateControl {
    pub fn new(max_sync_window: u32) -> Self {
        RtcRateControl {
            sync_window: MIN_SYNC_WINDOW as f64,
            max_sync_window: max_sync_window.max(MIN_SYNC_WINDOW),
            state: SyncState::CatchUp,
        }
    }

    pub fn window(&self) -> u32 {
        (self.sync_window as u32).clamp(MIN_SYNC_WINDOW, self.max_sync_window)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Recompute the target window from the producer rate hint and the
    /// observed RTT (bandwidth-delay product in packets).
    pub fn update_window(&mut self, producer_rate_kbps: u32, rtt_ms: f64, payload_size: usize) {
        if producer_rate_kbps == 0 || payload_size == 0 {
            return;
        }
        let bytes_per_ms = producer_rate_kbps as f64 * 1000.0 / 8.0 / 1000.0;
        let in_flight_bytes = bytes_per_ms * rtt_ms.max(1.0);
        let target = (in_flight_bytes / payload_size as f64).ceil();

        self.sync_window = target.clamp(MIN_SYNC_WINDOW as f64, self.max_sync_window as f64);
    }

    /// The producer told us we are requesting ahead of production.
    pub fn on_window_too_large(&mut self) {
        self.sync_window = (self.sync_window * WINDOW_CONTRACTION).max(MIN_SYNC_WINDOW as f64);
    }

    /// Round-boundary state transition.
    ///
    /// `gap` is production suffix minus next expected suffix;
    /// `round_packets` is one round's worth of production.
    pub fn update_sync_state(&mut self, gap: i64, round_packets: u64) -> SyncState {
        let tolerance = round_packets.max(2) as i64;
        self.state = match self.state {
            SyncState::CatchUp if gap <= tolerance => SyncState::InSync,
            SyncState::InSync if gap > tolerance => SyncState::CatchUp,
            unchanged => unchanged,
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_floor_and_ceiling() {
        let mut rc = RtcRateControl::new(64);
        assert_eq!(rc.window(), MIN_SYNC_WINDOW);

        // Huge bandwidth-delay product is clamped to the maximum.
        rc.update_window(1_000_000, 500.0, 1400);
        assert_eq!(rc.window(), 64);

        // Tiny one sits at the floor.
        rc.update_window(100, 1.0, 1400);
        assert_eq!(rc.window(), MIN_SYNC_WINDOW);
    }

    #[test]
    fn test_window_tracks_bdp() {
        let mut rc = RtcRateControl::new(1024);
        // 2048 kbps at 100 ms RTT is 25600 bytes in flight, 19 packets.
        rc.update_window(2048, 100.0, 1400);
        assert_eq!(rc.window(), 19);
    }

    #[test]
    fn test_contraction() {
        let mut rc = RtcRateControl::new(1024);
        rc.update_window(2048, 700.0, 1400);
        let before = rc.window();

        rc.on_window_too_large();
        assert!(rc.window() < before);

        for _ in 0..20 {
            rc.on_window_too_large();
        }
        assert_eq!(rc.window(), MIN_SYNC_WINDOW);
    }

    #[test]
    fn test_sync_transitions() {
        let mut rc = RtcRateControl::new(64);
        assert_eq!(rc.state(), SyncState::CatchUp);

        // Close enough to production: in sync.
        assert_eq!(rc.update_sync_state(3, 10), SyncState::InSync);
        // Still within a round's worth of production.
        assert_eq!(rc.update_sync_state(9, 10), SyncState::InSync);
        // Fell more than a round behind.
        assert_eq!(rc.update_sync_state(25, 10), SyncState::CatchUp);
    }
}
