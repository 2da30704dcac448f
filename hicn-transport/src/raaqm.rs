//! Congestion window control for the byte-stream consumer.
//!
//! Two policies: CBR keeps the window fixed; RAAQM adapts it from the
//! observed RTT spread. RAAQM turns the position of each RTT sample inside
//! the recent [min, max] interval into a drop probability scaled by the
//! drop factor; the probability feeds an accumulator and each time the
//! accumulated mass crosses one, the window shrinks by β. Otherwise the
//! window creeps up by 1/W per received segment (AIMD).

use std::collections::VecDeque;

/// RTT samples kept for the min/max percentile estimate.
const RTT_SAMPLE_WINDOW: usize = 30;

/// Floor for the adaptive window.
const MIN_WINDOW: f64 = 1.0;

/// RAAQM adaptive window controller.
pub struct RaaqmController {
    window: f64,
    max_window: f64,
    beta: f64,
    drop_factor: f64,
    samples: VecDeque<f64>,
    drop_accumulator: f64,
}

impl RaaqmController {
    pub fn new(initial_window: u32, max_window: u32, beta: f64, drop_factor: f64) -> Self {
        RaaqmController {
            window: initial_window.max(1) as f64,
            max_window: max_window.max(1) as f64,
            beta,
            drop_factor,
            samples: VecDeque::with_capacity(RTT_SAMPLE_WINDOW),
            drop_accumulator: 0.0,
        }
    }

    fn push_sample(&mut self, rtt_ms: f64) {
        if self.samples.len() == RTT_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    fn drop_probability(&self, rtt_ms: f64) -> f64 {
        let min = self
            .samples
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let max = self
            .samples
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);

        if !min.is_finite() || max <= min {
            return 0.0;
        }
        self.drop_factor * ((rtt_ms - min) / (max - min)).clamp(0.0, 1.0)
    }

    /// Window update on each received segment.
    pub fn on_data(&mut self, rtt_ms: f64) {
        self.push_sample(rtt_ms);

        self.drop_accumulator += self.drop_probability(rtt_ms);
        if self.drop_accumulator >= 1.0 {
            self.drop_accumulator = 0.0;
            self.window = (self.window * self.beta).max(MIN_WINDOW);
        } else {
            self.window = (self.window + 1.0 / self.window).min(self.max_window);
        }
    }

    /// Multiplicative decrease on an interest timeout.
    pub fn on_timeout(&mut self) {
        self.window = (self.window * self.beta).max(MIN_WINDOW);
    }

    pub fn window(&self) -> u32 {
        self.window as u32
    }
}

/// Congestion window: fixed (CBR) or adaptive (RAAQM).
pub enum CongestionWindow {
    Cbr { window: u32 },
    Raaqm(RaaqmController),
}

impl CongestionWindow {
    pub fn cbr(window: u32) -> Self {
        CongestionWindow::Cbr {
            window: window.max(1),
        }
    }

    pub fn raaqm(initial: u32, max: u32, beta: f64, drop_factor: f64) -> Self {
        CongestionWindow::Raaqm(RaaqmController::new(initial, max, beta, drop_factor))
    }

    pub fn window(&self) -> u32 {
        match self {
            CongestionWindow::Cbr { window } => *window,
            CongestionWindow::Raaqm(controller) => controller.window().max(1),
        }
    }

    pub fn on_data(&mut self, rtt_ms: f64) {
        if let CongestionWindow::Raaqm(controller) = self {
            controller.on_data(rtt_ms);
        }
    }

    pub fn on_timeout(&mut self) {
        if let CongestionWindow::Raaqm(controller) = self {
            controller.on_timeout();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbr_window_is_constant() {
        let mut window = CongestionWindow::cbr(4);
        assert_eq!(window.window(), 4);
        window.on_data(10.0);
        window.on_timeout();
        assert_eq!(window.window(), 4);
    }

    #[test]
    fn test_raaqm_grows_on_stable_rtt() {
        let mut controller = RaaqmController::new(2, 64, 0.9, 0.004);
        for _ in 0..50 {
            controller.on_data(10.0);
        }
        assert!(controller.window() > 2);
        assert!(controller.window() <= 64);
    }

    #[test]
    fn test_raaqm_respects_max_window() {
        let mut controller = RaaqmController::new(60, 64, 0.9, 0.0);
        for _ in 0..1000 {
            controller.on_data(10.0);
        }
        assert!(controller.window() <= 64);
    }

    #[test]
    fn test_raaqm_shrinks_under_rtt_inflation() {
        let mut controller = RaaqmController::new(32, 64, 0.5, 1.0);
        // Establish a low baseline, then inflate the RTT: samples near the
        // max of the window accumulate drop probability quickly.
        for _ in 0..10 {
            controller.on_data(10.0);
        }
        let before = controller.window();
        for _ in 0..10 {
            controller.on_data(500.0);
        }
        assert!(controller.window() < before);
    }

    #[test]
    fn test_raaqm_timeout_decrease() {
        let mut controller = RaaqmController::new(32, 64, 0.5, 0.004);
        controller.on_timeout();
        assert_eq!(controller.window(), 16);

        // Never below one interest.
        for _ in 0..20 {
            controller.on_timeout();
        }
        assert!(controller.window() >= 1);
    }
}
