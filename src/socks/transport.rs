//! Transport collaborator interface
//!
//! The negotiators never touch sockets directly. Whatever embeds them
//! supplies non-blocking transports implementing these traits and feeds
//! readiness back in as [`TransportEvent`]s.

use crate::error::FailureReason;
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Identifier of a transport, unique within one event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A notification delivered by the event loop for one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A pending `connect` completed
    Connected,
    /// A pending `connect` failed
    ConnectFailed(FailureReason),
    /// The transport was closed underneath us
    Closed(FailureReason),
    /// Data (or EOF) can be read
    Readable,
    /// Data can be written
    Writable,
}

/// Non-blocking byte-stream transport (a TCP socket)
///
/// Reads and writes never block: `io::ErrorKind::WouldBlock` means "try
/// again after the next readiness event".
pub trait StreamTransport {
    /// Identifier the event loop reports events under
    fn id(&self) -> SocketId;

    /// Begin connecting to `addr`; completion arrives as an event
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Append at most `limit` bytes to `buf`. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut BytesMut, limit: usize) -> io::Result<usize>;

    /// Write a prefix of `data`, returning its length
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Ask for (or stop asking for) `Readable` events
    fn set_read_interest(&mut self, enabled: bool);

    /// Ask for (or stop asking for) `Writable` events
    fn set_write_interest(&mut self, enabled: bool);

    /// Local address of a connected transport
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Remote address of a connected transport
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Close the transport; no further events are delivered
    fn close(&mut self);
}

/// Non-blocking datagram transport (a UDP socket)
pub trait DatagramTransport {
    /// Identifier the event loop reports events under
    fn id(&self) -> SocketId;

    /// Bind to a local address
    fn bind(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Fix the remote address for `send` and `recv`
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Send one datagram to the connected peer
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;

    /// Receive one datagram from the connected peer
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Ask for (or stop asking for) `Readable` events
    fn set_read_interest(&mut self, enabled: bool);

    /// Local address of a bound transport
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Close the transport
    fn close(&mut self);
}
