//! Pluggable I/O modules.
//!
//! An [`IoModule`] moves whole packet frames between the transport and the
//! local forwarder. The portal drives it from the protocol loop: one frame
//! per send call, receive with a deadline so protocol timers keep running.
//!
//! Two variants are provided: [`LoopbackConnector`] (paired in-memory
//! queues, used by tests and co-located consumer/producer pairs) and
//! [`UdpConnector`] (datagram socket towards a local forwarder).

use bytes::Bytes;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Largest frame an I/O module will accept or deliver.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Depth of a loopback queue before the sender is considered congested.
const LOOPBACK_QUEUE_DEPTH: usize = 8192;

/// I/O module errors
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connector disconnected")]
    Disconnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("invalid connector: {0}")]
    InvalidConnector(String),

    #[error("invalid connector type: {0}")]
    InvalidConnectorType(String),

    #[error("operation not implemented by this connector")]
    NotImplemented,

    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// A pluggable I/O module.
///
/// Contract with the portal: frames are delivered whole, one receive per
/// call; a `None` return means the deadline elapsed with nothing to read.
/// Optional operations (raw-byte send) default to [`IoError::NotImplemented`].
pub trait IoModule: Send {
    /// Transmit one complete packet frame.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), IoError>;

    /// Wait up to `timeout` for one complete inbound frame.
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, IoError>;

    /// Transmit a raw byte buffer outside the packet framing.
    fn send_raw(&mut self, _bytes: &[u8]) -> Result<(), IoError> {
        Err(IoError::NotImplemented)
    }

    /// Tear the module down. Further sends fail with `Disconnected`.
    fn close(&mut self);

    /// Whether the module can still move frames.
    fn is_connected(&self) -> bool;
}

/// Known I/O module kinds, selectable by name at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoModuleKind {
    Loopback,
    Udp,
}

impl IoModuleKind {
    /// Resolve a module name from configuration.
    pub fn from_name(name: &str) -> Result<Self, IoError> {
        match name {
            "loopback" => Ok(IoModuleKind::Loopback),
            "udp" => Ok(IoModuleKind::Udp),
            other => Err(IoError::InvalidConnectorType(other.to_string())),
        }
    }
}

/// In-memory connector delivering frames to a paired peer.
///
/// Frames sent on one side of a [`LoopbackConnector::pair`] become
/// receivable on the other. Raw-byte send is not supported here.
pub struct LoopbackConnector {
    tx: SyncSender<Bytes>,
    rx: Receiver<Bytes>,
    connected: bool,
}

impl LoopbackConnector {
    /// Create two connected endpoints.
    pub fn pair() -> (LoopbackConnector, LoopbackConnector) {
        let (tx_a, rx_b) = mpsc::sync_channel(LOOPBACK_QUEUE_DEPTH);
        let (tx_b, rx_a) = mpsc::sync_channel(LOOPBACK_QUEUE_DEPTH);

        (
            LoopbackConnector {
                tx: tx_a,
                rx: rx_a,
                connected: true,
            },
            LoopbackConnector {
                tx: tx_b,
                rx: rx_b,
                connected: true,
            },
        )
    }
}

impl IoModule for LoopbackConnector {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), IoError> {
        if !self.connected {
            return Err(IoError::Disconnected);
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(IoError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        trace!(len = frame.len(), "loopback send");
        match self.tx.try_send(Bytes::copy_from_slice(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(IoError::SendFailed("loopback queue full".into())),
            Err(TrySendError::Disconnected(_)) => Err(IoError::Disconnected),
        }
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, IoError> {
        if !self.connected {
            return Err(IoError::Disconnected);
        }

        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(IoError::Disconnected),
        }
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Datagram connector towards a local forwarder.
pub struct UdpConnector {
    socket: UdpSocket,
    remote: SocketAddr,
    connected: bool,
    recv_buf: Vec<u8>,
}

impl UdpConnector {
    /// Bind a local datagram socket and aim it at `remote`.
    pub fn connect(bind: SocketAddr, remote: SocketAddr) -> Result<Self, IoError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let domain = if bind.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(1 << 20)?;
        socket.set_send_buffer_size(1 << 20)?;
        socket.bind(&bind.into())?;

        let socket: UdpSocket = socket.into();
        socket.connect(remote).map_err(|e| {
            IoError::InvalidConnector(format!("cannot reach forwarder {remote}: {e}"))
        })?;

        Ok(UdpConnector {
            socket,
            remote,
            connected: true,
            recv_buf: vec![0u8; MAX_FRAME_SIZE],
        })
    }

    /// The forwarder address this connector sends to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, IoError> {
        Ok(self.socket.local_addr()?)
    }
}

impl IoModule for UdpConnector {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), IoError> {
        if !self.connected {
            return Err(IoError::Disconnected);
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(IoError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        match self.socket.send(frame) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(IoError::SendFailed("socket not ready".into()))
            }
            Err(e) => Err(IoError::Io(e)),
        }
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>, IoError> {
        if !self.connected {
            return Err(IoError::Disconnected);
        }

        // A zero timeout would put the socket in blocking mode.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;

        match self.socket.recv(&mut self.recv_buf) {
            Ok(n) => Ok(Some(Bytes::copy_from_slice(&self.recv_buf[..n]))),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(IoError::Io(e)),
        }
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        self.send_frame(bytes)
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_roundtrip() {
        let (mut a, mut b) = LoopbackConnector::pair();

        a.send_frame(b"interest").unwrap();
        let frame = b.recv_frame(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(&frame[..], b"interest");

        b.send_frame(b"content").unwrap();
        let frame = a.recv_frame(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(&frame[..], b"content");
    }

    #[test]
    fn test_loopback_timeout() {
        let (mut a, _b) = LoopbackConnector::pair();
        let got = a.recv_frame(Duration::from_millis(10)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_loopback_disconnect() {
        let (mut a, b) = LoopbackConnector::pair();
        drop(b);
        assert!(matches!(
            a.send_frame(b"x"),
            Err(IoError::Disconnected)
        ));
    }

    #[test]
    fn test_loopback_raw_send_not_implemented() {
        let (mut a, _b) = LoopbackConnector::pair();
        assert!(matches!(a.send_raw(b"x"), Err(IoError::NotImplemented)));
    }

    #[test]
    fn test_module_kind_parse() {
        assert_eq!(
            IoModuleKind::from_name("loopback").unwrap(),
            IoModuleKind::Loopback
        );
        assert_eq!(IoModuleKind::from_name("udp").unwrap(), IoModuleKind::Udp);
        assert!(matches!(
            IoModuleKind::from_name("memif"),
            Err(IoError::InvalidConnectorType(_))
        ));
    }

    #[test]
    fn test_udp_roundtrip() {
        let a_bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let b_bind: SocketAddr = "127.0.0.1:0".parse().unwrap();

        // Bootstrap: bind both, then cross-connect.
        let probe_a = UdpSocket::bind(a_bind).unwrap();
        let addr_a = probe_a.local_addr().unwrap();
        drop(probe_a);

        let mut b = UdpConnector::connect(b_bind, addr_a).unwrap();
        let addr_b = b.local_addr().unwrap();
        let mut a = UdpConnector::connect(addr_a, addr_b).unwrap();

        a.send_frame(b"ping").unwrap();
        let frame = b.recv_frame(Duration::from_millis(200)).unwrap();
        assert_eq!(&frame.unwrap()[..], b"ping");
    }
}
