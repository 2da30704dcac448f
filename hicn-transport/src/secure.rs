//! Secure-handshake integration contract.
//!
//! The TLS stack itself lives outside this crate; what the transport
//! provides is the seam it plugs into: a handshake state machine, a
//! single-slot mailbox bridging synchronous handshake reads to
//! asynchronous interest arrivals, and single-writer chunk accounting so
//! the `content_produced` notification fires exactly once per
//! user-visible stream. Handshake flows derive their name with
//! [`crate::name::Prefix::graft_key_id`].

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Handshake progression. States advance strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitiated,
    ClientHello,
    ClientFinished,
    ServerFinished,
}

impl HandshakeState {
    /// The state following this one, if any.
    pub fn next(self) -> Option<HandshakeState> {
        match self {
            HandshakeState::Uninitiated => Some(HandshakeState::ClientHello),
            HandshakeState::ClientHello => Some(HandshakeState::ClientFinished),
            HandshakeState::ClientFinished => Some(HandshakeState::ServerFinished),
            HandshakeState::ServerFinished => None,
        }
    }

    pub fn is_established(self) -> bool {
        self == HandshakeState::ServerFinished
    }
}

/// Mailbox errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MailboxError {
    #[error("mailbox closed")]
    Closed,

    #[error("timed out waiting for handshake bytes")]
    Timeout,
}

struct Slot {
    data: Option<BytesMut>,
    closed: bool,
}

struct MailboxInner {
    slot: Mutex<Slot>,
    cv: Condvar,
}

/// Single-slot mailbox between the I/O loop and the handshake worker.
///
/// The I/O loop fills it with handshake bytes carried by an arriving
/// interest; the worker awaits them with a deadline. Closing the mailbox
/// wakes the worker and fails the handshake.
#[derive(Clone)]
pub struct HandshakeMailbox {
    inner: Arc<MailboxInner>,
}

impl Default for HandshakeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeMailbox {
    pub fn new() -> Self {
        HandshakeMailbox {
            inner: Arc::new(MailboxInner {
                slot: Mutex::new(Slot {
                    data: None,
                    closed: false,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Deposit handshake bytes (I/O loop side). Never blocks; bytes
    /// arriving before the worker reads append to the pending buffer.
    pub fn fill(&self, bytes: &[u8]) -> Result<(), MailboxError> {
        let mut slot = self.inner.slot.lock();
        if slot.closed {
            return Err(MailboxError::Closed);
        }
        match &mut slot.data {
            Some(pending) => pending.extend_from_slice(bytes),
            None => slot.data = Some(BytesMut::from(bytes)),
        }
        self.inner.cv.notify_one();
        Ok(())
    }

    /// Await handshake bytes (worker side) for at most `timeout`.
    pub fn take(&self, timeout: Duration) -> Result<Bytes, MailboxError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();

        loop {
            if let Some(pending) = slot.data.take() {
                return Ok(pending.freeze());
            }
            if slot.closed {
                return Err(MailboxError::Closed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MailboxError::Timeout);
            }
            let result = self.inner.cv.wait_for(&mut slot, deadline - now);
            if result.timed_out() && slot.data.is_none() {
                if slot.closed {
                    return Err(MailboxError::Closed);
                }
                return Err(MailboxError::Timeout);
            }
        }
    }

    /// Cancel the handshake: wake waiters, reject further deposits.
    pub fn close(&self) {
        let mut slot = self.inner.slot.lock();
        slot.closed = true;
        self.inner.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slot.lock().closed
    }
}

/// Single-writer chunk accounting for a handshake-produced stream.
///
/// All mutation happens on the producer loop. The completion signal is
/// returned exactly once, when the last expected chunk has been written.
pub struct ChunkAccounting {
    remaining: u32,
    fired: bool,
}

impl ChunkAccounting {
    pub fn new(expected_chunks: u32) -> Self {
        ChunkAccounting {
            remaining: expected_chunks,
            fired: false,
        }
    }

    /// More chunks became known before completion.
    pub fn add_chunks(&mut self, chunks: u32) {
        if !self.fired {
            self.remaining += chunks;
        }
    }

    /// Record one written chunk. Returns true exactly once, on the write
    /// that completes the stream.
    pub fn on_chunk_written(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn is_complete(&self) -> bool {
        self.fired
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_state_progression() {
        let mut state = HandshakeState::Uninitiated;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                HandshakeState::Uninitiated,
                HandshakeState::ClientHello,
                HandshakeState::ClientFinished,
                HandshakeState::ServerFinished,
            ]
        );
        assert!(state.is_established());
    }

    #[test]
    fn test_mailbox_fill_then_take() {
        let mailbox = HandshakeMailbox::new();
        mailbox.fill(b"client hello").unwrap();

        let bytes = mailbox.take(Duration::from_millis(10)).unwrap();
        assert_eq!(&bytes[..], b"client hello");

        // Slot is empty again.
        assert_eq!(
            mailbox.take(Duration::from_millis(5)),
            Err(MailboxError::Timeout)
        );
    }

    #[test]
    fn test_mailbox_appends_until_taken() {
        let mailbox = HandshakeMailbox::new();
        mailbox.fill(b"part one ").unwrap();
        mailbox.fill(b"part two").unwrap();

        let bytes = mailbox.take(Duration::from_millis(10)).unwrap();
        assert_eq!(&bytes[..], b"part one part two");
    }

    #[test]
    fn test_mailbox_cross_thread_wakeup() {
        let mailbox = HandshakeMailbox::new();
        let filler = mailbox.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            filler.fill(b"bytes").unwrap();
        });

        let bytes = mailbox.take(Duration::from_secs(2)).unwrap();
        assert_eq!(&bytes[..], b"bytes");
        handle.join().unwrap();
    }

    #[test]
    fn test_mailbox_close_cancels_waiter() {
        let mailbox = HandshakeMailbox::new();
        let closer = mailbox.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        assert_eq!(
            mailbox.take(Duration::from_secs(2)),
            Err(MailboxError::Closed)
        );
        assert!(mailbox.fill(b"late").is_err());
        handle.join().unwrap();
    }

    #[test]
    fn test_chunk_accounting_fires_exactly_once() {
        let mut accounting = ChunkAccounting::new(2);
        assert!(!accounting.on_chunk_written());
        assert!(accounting.on_chunk_written());
        assert!(accounting.is_complete());

        // Extra writes never re-fire.
        assert!(!accounting.on_chunk_written());
    }

    #[test]
    fn test_chunk_accounting_growing_stream() {
        let mut accounting = ChunkAccounting::new(1);
        accounting.add_chunks(1);
        assert!(!accounting.on_chunk_written());
        assert!(accounting.on_chunk_written());
        assert!(!accounting.on_chunk_written());
    }
}
