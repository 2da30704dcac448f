//! Configuration parsing for the measurement tools.

use hicn::transport::rtc::TraceEntry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid rate: {0}")]
    InvalidRate(String),

    #[error("malformed trace line {line}: {text}")]
    MalformedTrace { line: usize, text: String },
}

/// A production rate expressed as `"<n>kbps"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rate {
    kbps: u32,
}

impl Rate {
    pub fn from_kbps(kbps: u32) -> Result<Self, ConfigError> {
        if kbps == 0 {
            return Err(ConfigError::InvalidRate("rate must be positive".into()));
        }
        Ok(Rate { kbps })
    }

    pub fn kbps(&self) -> u32 {
        self.kbps
    }

    /// Pacing interval for one packet of `packet_size` bytes.
    pub fn interval_for_packet(&self, packet_size: usize) -> std::time::Duration {
        let micros = packet_size as u64 * 8000 / self.kbps as u64;
        std::time::Duration::from_micros(micros.max(1))
    }
}

impl FromStr for Rate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let digits = lower
            .strip_suffix("kbps")
            .ok_or_else(|| ConfigError::InvalidRate(s.to_string()))?;
        let kbps: u32 = digits
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidRate(s.to_string()))?;
        Rate::from_kbps(kbps)
    }
}

impl TryFrom<String> for Rate {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rate> for String {
    fn from(rate: Rate) -> String {
        format!("{}kbps", rate.kbps)
    }
}

/// Parse a production trace: one `<timestamp_us> <size_bytes>` pair per
/// line, replayed as a looping schedule. Any malformed line fails setup.
pub fn parse_trace_file(path: &Path) -> Result<Vec<TraceEntry>, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_trace(&contents)
}

pub fn parse_trace(contents: &str) -> Result<Vec<TraceEntry>, ConfigError> {
    let mut entries = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let entry = match (parts.next(), parts.next(), parts.next()) {
            (Some(ts), Some(size), None) => {
                match (ts.parse::<u64>(), size.parse::<u32>()) {
                    (Ok(timestamp_us), Ok(size_bytes)) => TraceEntry {
                        timestamp_us,
                        size_bytes,
                    },
                    _ => {
                        return Err(ConfigError::MalformedTrace {
                            line: index + 1,
                            text: line.to_string(),
                        })
                    }
                }
            }
            _ => {
                return Err(ConfigError::MalformedTrace {
                    line: index + 1,
                    text: line.to_string(),
                })
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

/// Consumer profile loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerProfile {
    /// Content name to download.
    pub name: String,
    /// Fixed window; omit for RAAQM.
    pub window: Option<u32>,
    #[serde(default = "default_lifetime_ms")]
    pub interest_lifetime_ms: u32,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    /// Producer certificate (public key PEM) for verification.
    pub certificate: Option<String>,
    /// Shared passphrase for symmetric verification.
    pub passphrase: Option<String>,
}

/// Producer profile loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerProfile {
    /// Served prefix.
    pub prefix: String,
    #[serde(default = "default_content_size")]
    pub content_size: usize,
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    #[serde(default)]
    pub manifest: bool,
    /// Production rate for RTC mode.
    pub rate: Option<Rate>,
}

fn default_lifetime_ms() -> u32 {
    1000
}

fn default_stats_interval_ms() -> u64 {
    1000
}

fn default_content_size() -> usize {
    20 * 1024 * 1024
}

fn default_packet_size() -> usize {
    1500
}

/// Combined tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub consumer: Option<ConsumerProfile>,
    pub producer: Option<ProducerProfile>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_parsing() {
        let rate: Rate = "2048kbps".parse().unwrap();
        assert_eq!(rate.kbps(), 2048);

        let rate: Rate = " 512KBPS ".parse().unwrap();
        assert_eq!(rate.kbps(), 512);

        assert!("2048".parse::<Rate>().is_err());
        assert!("fastkbps".parse::<Rate>().is_err());
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!("0kbps".parse::<Rate>().is_err());
        assert!(Rate::from_kbps(0).is_err());
    }

    #[test]
    fn test_rate_pacing_interval() {
        let rate: Rate = "2048kbps".parse().unwrap();
        // 1400 bytes at 2048 kbps: 5468 microseconds per packet.
        let interval = rate.interval_for_packet(1400);
        assert_eq!(interval.as_micros(), 5468);
    }

    #[test]
    fn test_trace_parsing() {
        let trace = parse_trace("0 1200\n5000 1400\n\n10000 800\n").unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[1].timestamp_us, 5000);
        assert_eq!(trace[1].size_bytes, 1400);
    }

    #[test]
    fn test_malformed_trace_rejected() {
        assert!(parse_trace("0 1200\nbogus line\n").is_err());
        assert!(parse_trace("0\n").is_err());
        assert!(parse_trace("0 1200 77\n").is_err());
    }

    #[test]
    fn test_profile_roundtrip() {
        let config = Config {
            consumer: Some(ConsumerProfile {
                name: "b001::abcd".into(),
                window: Some(4),
                interest_lifetime_ms: 500,
                stats_interval_ms: 1000,
                certificate: None,
                passphrase: None,
            }),
            producer: None,
        };
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.consumer.unwrap().window, Some(4));
    }
}
