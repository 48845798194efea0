//! Contract between the master and the serial RTU link.
//!
//! A transport only *initiates* work: `connect` starts the handshake and
//! `send_read`/`send_write` enqueue a request and hand back a [`RequestHandle`].
//! Everything that happens afterwards (state changes, link errors, replies) is
//! reported as a [`TransportEvent`] on the event channel the transport was
//! created with. Each handle is completed at most once.
use crate::{config::ConnectionConfig, error::ConnectError};
use std::fmt;

/// Opaque correlation token of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing request handles.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub fn next_handle(&mut self) -> RequestHandle {
        self.next += 1;
        RequestHandle(self.next)
    }
}

/// State of the serial link as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Unconnected => "unconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Category of a link level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// A previously reported error was cleared.
    NoError,
    /// The link could not be opened.
    Connection,
    /// I/O failure while reading from the link.
    Read,
    /// I/O failure while writing to the link.
    Write,
}

impl LinkErrorKind {
    /// Benign kinds are not surfaced to observers.
    pub fn is_benign(&self) -> bool {
        matches!(self, LinkErrorKind::NoError)
    }
}

/// Successful answer of a read or write request.
///
/// `slave` and `register` echo the starting address of the request, which is
/// what the master uses to attribute a reply to a monitored point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub slave: u8,
    pub register: u16,
    /// Read registers, or the written values for a write.
    pub values: Vec<u16>,
}

/// Asynchronous notifications of a transport.
#[derive(Debug)]
pub enum TransportEvent {
    StateChanged(LinkState),
    ErrorOccurred {
        kind: LinkErrorKind,
        message: String,
    },
    Completed {
        handle: RequestHandle,
        result: crate::error::Result<Reply>,
    },
}

/// Serial Modbus RTU master primitive driven by the [`Master`](crate::master::Master).
pub trait Transport {
    /// Starts a new session with `config`, tearing down any existing one first.
    ///
    /// Only parameters that can be checked synchronously are reported here; the
    /// outcome of opening the link arrives as [`TransportEvent::StateChanged`] and
    /// [`TransportEvent::ErrorOccurred`].
    fn connect(&mut self, config: &ConnectionConfig) -> Result<(), ConnectError>;

    /// Tears down the current session. Idempotent.
    fn disconnect(&mut self);

    /// Enqueues a read of `count` holding registers.
    ///
    /// Returns `None` if the request could not be enqueued; nothing is left pending then.
    fn send_read(&mut self, slave: u8, register: u16, count: u16) -> Option<RequestHandle>;

    /// Enqueues a write of consecutive holding registers starting at `register`.
    fn send_write(&mut self, slave: u8, register: u16, values: &[u16]) -> Option<RequestHandle>;
}
