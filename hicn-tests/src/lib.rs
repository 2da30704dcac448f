//! Test support for the transport integration tests: a fault-injecting
//! connector wrapper for loss and tampering scenarios.

use bytes::Bytes;
use hicn::io::{IoError, IoModule};
use hicn::transport::packet::Packet;
use std::time::Duration;

/// What to do with an inbound frame.
pub enum FaultAction {
    Keep,
    Drop,
    Replace(Bytes),
}

/// Wraps an I/O module and filters its inbound frames.
pub struct FaultConnector {
    inner: Box<dyn IoModule>,
    filter: Box<dyn FnMut(&Bytes) -> FaultAction + Send>,
}

impl FaultConnector {
    pub fn new(
        inner: Box<dyn IoModule>,
        filter: Box<dyn FnMut(&Bytes) -> FaultAction + Send>,
    ) -> Self {
        FaultConnector { inner, filter }
    }

    /// Drop the first inbound content object carrying `suffix`.
    pub fn dropping_content_once(inner: Box<dyn IoModule>, suffix: u32) -> Self {
        let mut dropped = false;
        FaultConnector::new(
            inner,
            Box::new(move |frame| {
                if dropped {
                    return FaultAction::Keep;
                }
                if content_suffix(frame) == Some(suffix) {
                    dropped = true;
                    return FaultAction::Drop;
                }
                FaultAction::Keep
            }),
        )
    }

    /// Flip the last payload byte of every inbound content object
    /// carrying `suffix`.
    pub fn tampering_content(inner: Box<dyn IoModule>, suffix: u32) -> Self {
        FaultConnector::new(
            inner,
            Box::new(move |frame| {
                if content_suffix(frame) != Some(suffix) {
                    return FaultAction::Keep;
                }
                let mut tampered = frame.to_vec();
                if let Some(last) = tampered.last_mut() {
                    *last ^= 0xFF;
                }
                FaultAction::Replace(Bytes::from(tampered))
            }),
        )
    }
}

/// Suffix of the content object in `frame`, if it is one.
pub fn content_suffix(frame: &Bytes) -> Option<u32> {
    match Packet::decode(frame) {
        Ok(Packet::Content(content)) => Some(content.suffix()),
        _ => None,
    }
}

impl IoModule for FaultConnector {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), IoError> {
        self.inner.send_frame(frame)
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, IoError> {
        match self.inner.recv_frame(timeout)? {
            Some(frame) => match (self.filter)(&frame) {
                FaultAction::Keep => Ok(Some(frame)),
                FaultAction::Drop => Ok(None),
                FaultAction::Replace(replacement) => Ok(Some(replacement)),
            },
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}
