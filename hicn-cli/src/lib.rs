//! Shared pieces of the hICN measurement tools: configuration parsing
//! (rates, trace files, TOML profiles) and statistics formatting.

pub mod config;
pub mod stats;

pub use config::{parse_trace_file, Config, ConfigError, Rate};
