//! hICN transport
//!
//! High-level Rust API for the hICN transport protocols: byte-stream and
//! real-time consumers and producers over name-addressed interests.

pub use hicn_auth as auth;
pub use hicn_io as io;
pub use hicn_transport as transport;

// Re-export commonly used types
pub use transport::{
    ContentObject, Interest, Name, Prefix, RtcConsumer, RtcProducer, StreamConsumer,
    StreamProducer, TransportError,
};
