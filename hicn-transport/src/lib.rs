//! hICN transport protocols.
//!
//! This crate implements the consumer and producer sides of the hICN
//! transport: name-addressed interests are issued against a congestion
//! window, answered out of a bounded output cache, verified against signed
//! manifests and reassembled into an application byte stream — plus the
//! real-time (RTC) consumer/producer pair with NACK-driven loss recovery,
//! probing and rate control.
//!
//! I/O goes through a [`Portal`] over a pluggable module from `hicn-io`;
//! signing and verification come from `hicn-auth`.

pub mod config;
pub mod consumer;
pub mod error;
pub mod indexer;
pub mod manifest;
pub mod name;
pub mod output_buffer;
pub mod packet;
pub mod pit;
pub mod portal;
pub mod producer;
pub mod raaqm;
pub mod reassembly;
pub mod rtc;
pub mod secure;
pub mod stats;

pub use config::{ConsumerCallbacks, ConsumerConfig, ProducerCallbacks, ProducerConfig};
pub use consumer::{ConsumerState, StopHandle, StreamConsumer};
pub use error::TransportError;
pub use indexer::{IncrementalIndexer, Indexer, ManifestIndexer};
pub use name::{AddressFamily, Name, Prefix, INVALID_SUFFIX, MIN_PROBE_SUFFIX};
pub use packet::{ContentObject, Interest, NackPayload, Packet};
pub use portal::Portal;
pub use producer::StreamProducer;
pub use rtc::{RtcConsumer, RtcProducer};
pub use stats::TransportStatistics;
