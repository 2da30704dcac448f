//! Real-time transport: consumer/producer pair for live datagram flows.
//!
//! The RTC consumer pulls a live flow by chasing the producer's production
//! suffix: NACKs announce where production stands, probes sample RTT, gaps
//! in the suffix sequence drive retransmission scheduling, and a per-round
//! rate controller sizes the interest window. The RTC producer paces
//! datagram production at a configured rate (or a replayed trace) and
//! synthesizes NACKs for out-of-window and probe interests.

pub mod consumer;
pub mod producer;
pub mod rate_control;
pub mod recovery;
pub mod state;

pub use consumer::{RtcConsumer, RtcConsumerConfig};
pub use producer::{ProductionSwitch, RtcProducer, RtcProducerConfig, TraceEntry};
pub use rate_control::{RtcRateControl, SyncState};
pub use recovery::{LossRange, RecoveryList};
pub use state::{RoundSummary, RtcState};
