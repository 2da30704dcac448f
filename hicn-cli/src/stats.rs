//! Statistics display and formatting

use hicn::transport::TransportStatistics;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format an RTT in human-readable form
pub fn format_rtt(rtt_ms: f64) -> String {
    if rtt_ms >= 1000.0 {
        format!("{:.2}s", rtt_ms / 1000.0)
    } else if rtt_ms >= 1.0 {
        format!("{:.2}ms", rtt_ms)
    } else {
        format!("{:.0}µs", rtt_ms * 1000.0)
    }
}

/// One interval line of the periodic consumer report.
pub fn summary_line(interval_ms: u64, delta_bytes: u64, stats: &TransportStatistics) -> String {
    let bandwidth = if interval_ms > 0 {
        delta_bytes * 8 * 1000 / interval_ms
    } else {
        0
    };
    format!(
        "{:<12} {:<12} {:<10} cwnd {:<6.1} rtt {:<10} retx {}",
        format_bytes(delta_bytes),
        format_bandwidth(bandwidth),
        format!("loss {:.1}%", stats.loss_ratio() * 100.0),
        stats.average_window_size(),
        format_rtt(stats.average_rtt_ms()),
        stats.retx_count(),
    )
}
