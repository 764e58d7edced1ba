//! Test utilities for Socksrelay
//!
//! An in-memory network implementing the transport traits, so the
//! sans-IO negotiators can be driven end to end without sockets.

#![allow(dead_code)]

use bytes::BytesMut;
use socksrelay::socks::{
    DatagramTransport, RelayEndpoint, RelayHandler, SocketId, StreamTransport, TransportEvent,
};
use socksrelay::FailureReason;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::net::TcpListener;

#[derive(Debug, Default)]
struct Pipe {
    local: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    peer: Option<SocketId>,
    inbox: VecDeque<u8>,
    peer_closed: bool,
    closed: bool,
    read_interest: bool,
    write_interest: bool,
}

#[derive(Debug, Default)]
struct Socket {
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    inbox: VecDeque<(SocketAddr, Vec<u8>)>,
    read_interest: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct NetState {
    next_id: u64,
    next_port: u16,
    pipes: HashMap<SocketId, Pipe>,
    sockets: HashMap<SocketId, Socket>,
    listeners: HashMap<SocketAddr, VecDeque<SocketId>>,
    unreachable: HashSet<SocketAddr>,
    connecting: Vec<(SocketId, SocketAddr)>,
}

impl NetState {
    fn alloc_id(&mut self) -> SocketId {
        self.next_id += 1;
        SocketId(self.next_id)
    }

    fn ephemeral(&mut self) -> SocketAddr {
        self.next_port += 1;
        SocketAddr::from(([192, 0, 2, 10], 40000 + self.next_port))
    }
}

/// A simulated network of stream and datagram sockets
#[derive(Debug, Clone, Default)]
pub struct Network {
    state: Rc<RefCell<NetState>>,
}

impl Network {
    /// Create an empty network
    pub fn new() -> Self {
        Network::default()
    }

    /// Accept connections to `addr` from now on
    pub fn listen(&self, addr: SocketAddr) {
        self.state.borrow_mut().listeners.entry(addr).or_default();
    }

    /// Connections to `addr` fail with `HostUnreachable`
    pub fn make_unreachable(&self, addr: SocketAddr) {
        self.state.borrow_mut().unreachable.insert(addr);
    }

    /// An unconnected stream transport
    pub fn stream(&self) -> MemStream {
        let mut state = self.state.borrow_mut();
        let id = state.alloc_id();
        state.pipes.insert(id, Pipe::default());
        MemStream {
            id,
            net: self.clone(),
        }
    }

    /// An unbound datagram transport
    pub fn datagram(&self) -> MemDatagram {
        let mut state = self.state.borrow_mut();
        let id = state.alloc_id();
        state.sockets.insert(id, Socket::default());
        MemDatagram {
            id,
            net: self.clone(),
        }
    }

    /// Take the next connection accepted on `addr`
    pub fn accept(&self, addr: SocketAddr) -> Option<MemStream> {
        let id = self.state.borrow_mut().listeners.get_mut(&addr)?.pop_front()?;
        Some(MemStream {
            id,
            net: self.clone(),
        })
    }

    /// Whether the transport `id` has been closed locally
    pub fn is_closed(&self, id: SocketId) -> bool {
        self.state
            .borrow()
            .pipes
            .get(&id)
            .map_or(true, |p| p.closed)
    }

    /// Complete pending connects and collect readiness, like one turn of an event loop
    pub fn poll(&self) -> Vec<(SocketId, TransportEvent)> {
        let mut state = self.state.borrow_mut();
        let mut events = Vec::new();

        for (id, addr) in std::mem::take(&mut state.connecting) {
            if state.unreachable.contains(&addr) {
                events.push((id, TransportEvent::ConnectFailed(FailureReason::HostUnreachable)));
                continue;
            }
            if !state.listeners.contains_key(&addr) {
                events.push((id, TransportEvent::ConnectFailed(FailureReason::ConnectionRefused)));
                continue;
            }

            let local = state.ephemeral();
            let accepted = state.alloc_id();
            state.pipes.insert(
                accepted,
                Pipe {
                    local: Some(addr),
                    peer_addr: Some(local),
                    peer: Some(id),
                    ..Pipe::default()
                },
            );
            if let Some(pipe) = state.pipes.get_mut(&id) {
                pipe.local = Some(local);
                pipe.peer_addr = Some(addr);
                pipe.peer = Some(accepted);
            }
            if let Some(queue) = state.listeners.get_mut(&addr) {
                queue.push_back(accepted);
            }
            events.push((id, TransportEvent::Connected));
        }

        let mut ids: Vec<SocketId> = state.pipes.keys().copied().collect();
        ids.sort();
        for id in ids {
            let pipe = &state.pipes[&id];
            if pipe.closed || pipe.peer.is_none() {
                continue;
            }
            if pipe.read_interest && (!pipe.inbox.is_empty() || pipe.peer_closed) {
                events.push((id, TransportEvent::Readable));
            }
            if pipe.write_interest {
                events.push((id, TransportEvent::Writable));
            }
        }

        let mut ids: Vec<SocketId> = state.sockets.keys().copied().collect();
        ids.sort();
        for id in ids {
            let socket = &state.sockets[&id];
            if !socket.closed && socket.read_interest && !socket.inbox.is_empty() {
                events.push((id, TransportEvent::Readable));
            }
        }

        events
    }
}

/// In-memory [`StreamTransport`]
#[derive(Debug)]
pub struct MemStream {
    id: SocketId,
    net: Network,
}

impl MemStream {
    fn with_pipe<R>(&self, f: impl FnOnce(&mut Pipe) -> R) -> R {
        let mut state = self.net.state.borrow_mut();
        let pipe = state.pipes.entry(self.id).or_default();
        f(pipe)
    }

    /// Everything currently readable, for scripted peers
    pub fn drain(&mut self) -> Vec<u8> {
        self.with_pipe(|pipe| pipe.inbox.drain(..).collect())
    }

    /// Whether the remote side has closed
    pub fn peer_closed(&self) -> bool {
        self.with_pipe(|pipe| pipe.peer_closed)
    }

    /// Write all of `data`, for scripted peers
    pub fn send(&mut self, data: &[u8]) {
        let written = self.write(data).unwrap();
        assert_eq!(written, data.len());
    }
}

impl StreamTransport for MemStream {
    fn id(&self) -> SocketId {
        self.id
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut state = self.net.state.borrow_mut();
        state.connecting.push((self.id, addr));
        Ok(())
    }

    fn read(&mut self, buf: &mut BytesMut, limit: usize) -> io::Result<usize> {
        self.with_pipe(|pipe| -> io::Result<usize> {
            if pipe.closed {
                return Err(io::ErrorKind::NotConnected.into());
            }
            if pipe.inbox.is_empty() {
                return if pipe.peer_closed {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = limit.min(pipe.inbox.len());
            buf.extend(pipe.inbox.drain(..n));
            Ok(n)
        })
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.net.state.borrow_mut();
        let peer = match state.pipes.get(&self.id) {
            Some(pipe) if !pipe.closed && !pipe.peer_closed => pipe.peer,
            _ => return Err(io::ErrorKind::BrokenPipe.into()),
        };
        let peer = peer.ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        match state.pipes.get_mut(&peer) {
            Some(pipe) => {
                pipe.inbox.extend(data);
                Ok(data.len())
            }
            None => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn set_read_interest(&mut self, enabled: bool) {
        self.with_pipe(|pipe| pipe.read_interest = enabled);
    }

    fn set_write_interest(&mut self, enabled: bool) {
        self.with_pipe(|pipe| pipe.write_interest = enabled);
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.with_pipe(|pipe| pipe.local)
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.with_pipe(|pipe| pipe.peer_addr)
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    fn close(&mut self) {
        let mut state = self.net.state.borrow_mut();
        let peer = match state.pipes.get_mut(&self.id) {
            Some(pipe) if !pipe.closed => {
                pipe.closed = true;
                pipe.read_interest = false;
                pipe.write_interest = false;
                pipe.peer
            }
            _ => None,
        };
        if let Some(pipe) = peer.and_then(|peer| state.pipes.get_mut(&peer)) {
            pipe.peer_closed = true;
        }
    }
}

/// In-memory [`DatagramTransport`]
#[derive(Debug)]
pub struct MemDatagram {
    id: SocketId,
    net: Network,
}

impl MemDatagram {
    /// Send to an explicit address, for scripted relays
    pub fn send_to(&mut self, datagram: &[u8], to: SocketAddr) {
        let mut state = self.net.state.borrow_mut();
        let from = state.sockets[&self.id].local.expect("bound");
        let target = state
            .sockets
            .iter()
            .find(|(_, s)| s.local == Some(to) && !s.closed)
            .map(|(id, _)| *id);
        if let Some(target) = target {
            if let Some(socket) = state.sockets.get_mut(&target) {
                socket.inbox.push_back((from, datagram.to_vec()));
            }
        }
    }

    /// Receive with the source address, for scripted relays
    pub fn recv_from(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.net
            .state
            .borrow_mut()
            .sockets
            .get_mut(&self.id)?
            .inbox
            .pop_front()
    }
}

impl DatagramTransport for MemDatagram {
    fn id(&self) -> SocketId {
        self.id
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut state = self.net.state.borrow_mut();
        let addr = if addr.port() == 0 { state.ephemeral() } else { addr };
        if state.sockets.values().any(|s| s.local == Some(addr)) {
            return Err(io::ErrorKind::AddrInUse.into());
        }
        if let Some(socket) = state.sockets.get_mut(&self.id) {
            socket.local = Some(addr);
        }
        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut state = self.net.state.borrow_mut();
        match state.sockets.get_mut(&self.id) {
            Some(socket) if socket.local.is_some() => {
                socket.peer = Some(addr);
                Ok(())
            }
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        let peer = {
            let state = self.net.state.borrow();
            state.sockets[&self.id].peer
        };
        let peer = peer.ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.send_to(datagram, peer);
        Ok(datagram.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.net.state.borrow_mut();
        let socket = state
            .sockets
            .get_mut(&self.id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        loop {
            let (from, data) = socket
                .inbox
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
            // A connected socket only hears from its peer
            if socket.peer.map_or(true, |peer| peer == from) {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok(n);
            }
        }
    }

    fn set_read_interest(&mut self, enabled: bool) {
        if let Some(socket) = self.net.state.borrow_mut().sockets.get_mut(&self.id) {
            socket.read_interest = enabled;
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.net.state.borrow().sockets[&self.id]
            .local
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    fn close(&mut self) {
        if let Some(socket) = self.net.state.borrow_mut().sockets.get_mut(&self.id) {
            socket.closed = true;
            socket.read_interest = false;
        }
    }
}

/// What a [`RecordingHandler`] saw
#[derive(Debug, Default)]
pub struct Recorded {
    pub relays: Vec<(RelayEndpoint<MemStream>, MemStream)>,
    pub failures: Vec<(SocketId, FailureReason)>,
    pub outbound_requests: Vec<SocketId>,
}

/// Relay handler handing out in-memory outbound sockets
#[derive(Debug)]
pub struct RecordingHandler {
    pub net: Network,
    pub seen: Recorded,
}

impl RecordingHandler {
    pub fn new(net: &Network) -> Self {
        RecordingHandler {
            net: net.clone(),
            seen: Recorded::default(),
        }
    }
}

impl RelayHandler<MemStream> for RecordingHandler {
    fn on_outbound_socket_requested(&mut self, for_client: SocketId) -> io::Result<MemStream> {
        self.seen.outbound_requests.push(for_client);
        Ok(self.net.stream())
    }

    fn on_relay_established(&mut self, client: RelayEndpoint<MemStream>, outbound: MemStream) {
        self.seen.relays.push((client, outbound));
    }

    fn on_handshake_failed(&mut self, client: SocketId, reason: FailureReason) {
        self.seen.failures.push((client, reason));
    }
}

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let (_listener, addr) = create_test_listener().await;
    addr
}
