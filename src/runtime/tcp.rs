//! TCP transport backed by tokio

use crate::config::TcpConfig;
use crate::runtime::reactor::{Reactor, Slot, SlotIo};
use crate::socks::{SocketId, StreamTransport};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// Socket options applied to TCP streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts::from_tcp_config(&TcpConfig::default())
    }
}

impl SocketOpts {
    /// Create socket options from TCP config; a zero timeout disables keepalive
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        let keepalive = config.keepalive_secs > 0;
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: keepalive.then_some(config.keepalive_secs),
            keepalive_interval: keepalive.then_some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport not connected")
}

/// A [`StreamTransport`] over a tokio [`TcpStream`].
///
/// Readiness is reported by the [`Reactor`] that created it.
#[derive(Debug)]
pub struct TokioTransport {
    slot: Arc<Slot>,
}

impl Reactor {
    /// A fresh, unconnected stream transport
    pub fn stream(&self) -> TokioTransport {
        TokioTransport {
            slot: self.register(SlotIo::Idle),
        }
    }

    /// Adopt an accepted stream
    pub fn adopt(&self, stream: TcpStream) -> TokioTransport {
        let slot = self.register(SlotIo::Idle);
        if let Err(e) = slot.opts.apply(&stream) {
            trace!("{}: failed to apply socket options: {}", slot.id, e);
        }
        slot.lock().io = SlotIo::Stream(stream);
        TokioTransport { slot }
    }
}

impl TokioTransport {
    /// Take the connected stream out, leaving the transport closed
    pub fn into_stream(self) -> io::Result<TcpStream> {
        let mut state = self.slot.lock();
        match std::mem::replace(&mut state.io, SlotIo::Closed) {
            SlotIo::Stream(stream) => Ok(stream),
            other => {
                state.io = other;
                Err(not_connected())
            }
        }
    }

    /// Whether a connected stream is held
    pub fn is_connected(&self) -> bool {
        matches!(self.slot.lock().io, SlotIo::Stream(_))
    }
}

impl StreamTransport for TokioTransport {
    fn id(&self) -> SocketId {
        self.slot.id
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut state = self.slot.lock();
        match state.io {
            SlotIo::Idle => {
                state.io = SlotIo::Connecting(Box::pin(TcpStream::connect(addr)));
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already in use",
            )),
        }
    }

    fn read(&mut self, buf: &mut BytesMut, limit: usize) -> io::Result<usize> {
        let state = self.slot.lock();
        let stream = match &state.io {
            SlotIo::Stream(stream) => stream,
            _ => return Err(not_connected()),
        };

        let start = buf.len();
        buf.resize(start + limit, 0);
        match stream.try_read(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                buf.truncate(start);
                Err(e)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &self.slot.lock().io {
            SlotIo::Stream(stream) => stream.try_write(data),
            _ => Err(not_connected()),
        }
    }

    fn set_read_interest(&mut self, enabled: bool) {
        self.slot.lock().read_interest = enabled;
    }

    fn set_write_interest(&mut self, enabled: bool) {
        self.slot.lock().write_interest = enabled;
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.slot.lock().io {
            SlotIo::Stream(stream) => stream.local_addr(),
            _ => Err(not_connected()),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.slot.lock().io {
            SlotIo::Stream(stream) => stream.peer_addr(),
            _ => Err(not_connected()),
        }
    }

    fn close(&mut self) {
        let mut state = self.slot.lock();
        state.io = SlotIo::Closed;
        state.read_interest = false;
        state.write_interest = false;
    }
}
