//! Transport statistics.
//!
//! Scalar counters plus exponentially-weighted moving averages. Counters
//! only grow, except through an explicit [`TransportStatistics::reset`].
//! Averages follow `x' = α·x + (1−α)·v` with a configurable α.

/// Default smoothing factor for the moving averages.
pub const DEFAULT_ALPHA: f64 = 0.7;

/// Congestion-control / sync status reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Unknown,
    CatchUp,
    InSync,
}

/// Statistics block owned by a transport instance.
///
/// Single writer (the protocol loop); applications receive snapshots
/// through the stats-summary callback.
#[derive(Debug, Clone)]
pub struct TransportStatistics {
    alpha: f64,
    retx_count: u64,
    bytes_received: u64,
    interest_tx: u64,
    average_rtt_ms: f64,
    avg_window_size: f64,
    avg_pending_interests: f64,
    loss_ratio: f64,
    queuing_delay_ms: f64,
    interest_fec_tx: u64,
    bytes_fec_received: u64,
    lost_data: u64,
    recovered_data: u64,
    received_nacks: u64,
    state: TransportState,
}

impl Default for TransportStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl TransportStatistics {
    pub fn new(alpha: f64) -> Self {
        TransportStatistics {
            alpha,
            retx_count: 0,
            bytes_received: 0,
            interest_tx: 0,
            average_rtt_ms: 0.0,
            avg_window_size: 0.0,
            avg_pending_interests: 0.0,
            loss_ratio: 0.0,
            queuing_delay_ms: 0.0,
            interest_fec_tx: 0,
            bytes_fec_received: 0,
            lost_data: 0,
            recovered_data: 0,
            received_nacks: 0,
            state: TransportState::Unknown,
        }
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    fn ewma(&self, current: f64, sample: f64) -> f64 {
        self.alpha * current + (1.0 - self.alpha) * sample
    }

    pub fn update_retx_count(&mut self, retx: u64) {
        self.retx_count += retx;
    }

    pub fn update_bytes_received(&mut self, bytes: u64) {
        self.bytes_received += bytes;
    }

    pub fn update_interest_tx(&mut self, sent: u64) {
        self.interest_tx += sent;
    }

    pub fn update_average_rtt(&mut self, rtt_ms: f64) {
        self.average_rtt_ms = self.ewma(self.average_rtt_ms, rtt_ms);
    }

    pub fn update_average_window_size(&mut self, window: f64) {
        self.avg_window_size = self.ewma(self.avg_window_size, window);
    }

    pub fn update_average_pending_interests(&mut self, pending: f64) {
        self.avg_pending_interests = self.ewma(self.avg_pending_interests, pending);
    }

    pub fn update_loss_ratio(&mut self, loss_ratio: f64) {
        self.loss_ratio = loss_ratio;
    }

    pub fn update_queuing_delay(&mut self, delay_ms: f64) {
        self.queuing_delay_ms = delay_ms;
    }

    pub fn update_interest_fec_tx(&mut self, sent: u64) {
        self.interest_fec_tx += sent;
    }

    pub fn update_bytes_fec_received(&mut self, bytes: u64) {
        self.bytes_fec_received += bytes;
    }

    pub fn update_lost_data(&mut self, packets: u64) {
        self.lost_data += packets;
    }

    pub fn update_recovered_data(&mut self, bytes: u64) {
        self.recovered_data += bytes;
    }

    pub fn update_received_nacks(&mut self, nacks: u64) {
        self.received_nacks += nacks;
    }

    pub fn update_state(&mut self, state: TransportState) {
        self.state = state;
    }

    pub fn retx_count(&self) -> u64 {
        self.retx_count
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn interest_tx(&self) -> u64 {
        self.interest_tx
    }

    pub fn average_rtt_ms(&self) -> f64 {
        self.average_rtt_ms
    }

    pub fn average_window_size(&self) -> f64 {
        self.avg_window_size
    }

    pub fn average_pending_interests(&self) -> f64 {
        self.avg_pending_interests
    }

    pub fn loss_ratio(&self) -> f64 {
        self.loss_ratio
    }

    pub fn queuing_delay_ms(&self) -> f64 {
        self.queuing_delay_ms
    }

    pub fn interest_fec_tx(&self) -> u64 {
        self.interest_fec_tx
    }

    pub fn bytes_fec_received(&self) -> u64 {
        self.bytes_fec_received
    }

    pub fn lost_data(&self) -> u64 {
        self.lost_data
    }

    pub fn recovered_data(&self) -> u64 {
        self.recovered_data
    }

    pub fn received_nacks(&self) -> u64 {
        self.received_nacks
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Zero everything. The only way any counter decreases.
    pub fn reset(&mut self) {
        let alpha = self.alpha;
        *self = TransportStatistics::new(alpha);
    }
}
