//! I/O modules and timing utilities for the hICN transport.
//!
//! The transport core never touches a socket directly: it talks to a
//! pluggable [`IoModule`] that moves whole packet frames in and out. This
//! crate provides the loopback and UDP variants plus the monotonic clock
//! and recurring-deadline scheduling the protocol loops are built on.

pub mod connector;
pub mod time;

pub use connector::{IoError, IoModule, LoopbackConnector, UdpConnector};
pub use time::{PeriodicDeadline, Timestamp};
