//! Relay coordinator
//!
//! Owns every in-flight server negotiator and, once a client asks for a
//! `CONNECT`, the outbound transport paired with it. When both sides are
//! ready the pair is handed to the embedder as a plain relay.
//!
//! All state changes triggered by an event are applied after the
//! negotiator that produced them has returned, so nothing is removed while
//! it is still borrowed.

use crate::error::{FailureReason, Socks5ReplyCode};
use crate::socks::consts::DEFAULT_CANCEL_TIMEOUT_SECS;
use crate::socks::handshake::DriverSignal;
use crate::socks::message::unspecified;
use crate::socks::pairing::PairingTable;
use crate::socks::server::{RelayEndpoint, ServerNegotiator, TcpConnectHandler};
use crate::socks::transport::{SocketId, StreamTransport, TransportEvent};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Callbacks from the coordinator to whatever embeds it
pub trait RelayHandler<T> {
    /// Create an unconnected transport for an outbound connection
    fn on_outbound_socket_requested(&mut self, for_client: SocketId) -> io::Result<T>;

    /// Both sides of a relay are ready
    fn on_relay_established(&mut self, client: RelayEndpoint<T>, outbound: T);

    /// A client handshake failed; its transport has been closed
    fn on_handshake_failed(&mut self, _client: SocketId, _reason: FailureReason) {}
}

/// Counters kept by a [`RelayCoordinator`]
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Client sockets accepted
    pub accepted: AtomicUsize,
    /// Client sockets dropped at accept time
    pub rejected: AtomicUsize,
    /// Outbound connections started
    pub outbound_requested: AtomicUsize,
    /// Outbound connections that failed or closed before relaying
    pub outbound_failed: AtomicUsize,
    /// Relay pairs delivered
    pub relays_established: AtomicUsize,
    /// Client handshakes that failed
    pub handshakes_failed: AtomicUsize,
    /// Inconsistent pairings dropped
    pub corrupted: AtomicUsize,
}

impl RelayStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            outbound_requested: self.outbound_requested.load(Ordering::Relaxed),
            outbound_failed: self.outbound_failed.load(Ordering::Relaxed),
            relays_established: self.relays_established.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RelayStatsSnapshot {
    pub accepted: usize,
    pub rejected: usize,
    pub outbound_requested: usize,
    pub outbound_failed: usize,
    pub relays_established: usize,
    pub handshakes_failed: usize,
    pub corrupted: usize,
}

#[derive(Debug)]
struct Outbound<T> {
    transport: T,
    client: SocketId,
    destination: SocketAddr,
    connected: bool,
}

/// Everything a server negotiator may call back into
struct Links<T, H> {
    handler: H,
    outbound: HashMap<SocketId, Outbound<T>>,
    pairing: PairingTable,
    stats: Arc<RelayStats>,
}

impl<T: StreamTransport, H: RelayHandler<T>> TcpConnectHandler for Links<T, H> {
    fn handle_tcp_connect_request(
        &mut self,
        server: SocketId,
        destination: SocketAddr,
    ) -> Socks5ReplyCode {
        if self.pairing.contains(server) {
            warn!("{}: second CONNECT on an already paired socket", server);
            return Socks5ReplyCode::GeneralFailure;
        }

        let mut transport = match self.handler.on_outbound_socket_requested(server) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("{}: no outbound socket for {}: {}", server, destination, e);
                return Socks5ReplyCode::from(&e);
            }
        };
        let id = transport.id();

        if let Err(e) = transport.connect(destination) {
            debug!("{}: connect to {} failed: {}", id, destination, e);
            transport.close();
            return Socks5ReplyCode::from(&e);
        }
        if !self.pairing.insert(server, id) {
            warn!("{}: outbound socket {} is already paired", server, id);
            transport.close();
            return Socks5ReplyCode::GeneralFailure;
        }

        debug!("{}: connecting outbound {} to {}", server, id, destination);
        RelayStats::bump(&self.stats.outbound_requested);
        self.outbound.insert(
            id,
            Outbound {
                transport,
                client: server,
                destination,
                connected: false,
            },
        );
        Socks5ReplyCode::Succeeded
    }
}

/// SOCKS5 proxy server core: pairs inbound clients with outbound sockets
pub struct RelayCoordinator<T, H> {
    servers: HashMap<SocketId, ServerNegotiator<T>>,
    links: Links<T, H>,
    cancel_timeout: Duration,
}

impl<T: StreamTransport, H: RelayHandler<T>> RelayCoordinator<T, H> {
    /// Create a coordinator delivering relays to `handler`
    pub fn new(handler: H) -> Self {
        RelayCoordinator {
            servers: HashMap::new(),
            links: Links {
                handler,
                outbound: HashMap::new(),
                pairing: PairingTable::new(),
                stats: Arc::new(RelayStats::new()),
            },
            cancel_timeout: Duration::from_secs(DEFAULT_CANCEL_TIMEOUT_SECS),
        }
    }

    /// Use a different cancel timeout for sockets accepted from now on
    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    /// Take ownership of an accepted client transport.
    ///
    /// Returns `None` when the transport is unusable; it is closed and
    /// no record is kept.
    pub fn accept(&mut self, transport: T, now: Instant) -> Option<SocketId> {
        let id = transport.id();
        let server = match ServerNegotiator::new(transport) {
            Ok(server) => server.with_cancel_timeout(self.cancel_timeout),
            Err(e) => {
                debug!("{}: dropping accepted socket: {}", id, e);
                RelayStats::bump(&self.links.stats.rejected);
                return None;
            }
        };

        info!("{}: accepted SOCKS5 client {}", id, server.client_addr());
        RelayStats::bump(&self.links.stats.accepted);
        let server = self.servers.entry(id).or_insert(server);
        let signal = server.start(Some(&mut self.links), now);
        self.apply_server_signal(id, signal);
        Some(id)
    }

    /// Route one transport event to whichever side owns `id`
    pub fn handle_event(&mut self, id: SocketId, event: TransportEvent, now: Instant) {
        if let Some(server) = self.servers.get_mut(&id) {
            let signal = server.handle_event(event, Some(&mut self.links), now);
            self.apply_server_signal(id, signal);
        } else if self.links.outbound.contains_key(&id) {
            self.handle_outbound_event(id, event, now);
        } else {
            trace!("{}: event {:?} for unknown socket", id, event);
        }
    }

    /// Earliest cancel deadline among all client sockets
    pub fn next_deadline(&self) -> Option<Instant> {
        self.servers.values().filter_map(|s| s.deadline()).min()
    }

    /// Fire every cancel timer due at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        let due: Vec<SocketId> = self
            .servers
            .values()
            .filter(|s| s.deadline().map_or(false, |d| d <= now))
            .map(|s| s.id())
            .collect();

        for id in due {
            if let Some(server) = self.servers.get_mut(&id) {
                let signal = server.on_timeout(now);
                self.apply_server_signal(id, signal);
            }
        }
    }

    /// Give up ownership of a client socket.
    ///
    /// Any outbound socket paired with it is closed; the returned
    /// negotiator no longer calls back into this coordinator.
    pub fn detach(&mut self, id: SocketId) -> Option<ServerNegotiator<T>> {
        let mut server = self.servers.remove(&id)?;
        server.detach();
        self.drop_outbound_of(id);
        Some(server)
    }

    /// Statistics counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.links.stats
    }

    /// The embedder's handler
    pub fn handler(&self) -> &H {
        &self.links.handler
    }

    /// The embedder's handler, mutably
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.links.handler
    }

    /// A client socket still negotiating
    pub fn server(&self, id: SocketId) -> Option<&ServerNegotiator<T>> {
        self.servers.get(&id)
    }

    /// Number of client sockets still negotiating
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Number of outbound sockets not yet handed off
    pub fn outbound_count(&self) -> usize {
        self.links.outbound.len()
    }

    /// Number of live pairings
    pub fn pairing_count(&self) -> usize {
        self.links.pairing.len()
    }

    fn apply_server_signal(&mut self, id: SocketId, signal: DriverSignal) {
        match signal {
            DriverSignal::Pending => {}
            DriverSignal::Forward(event) => {
                trace!("{}: ignoring {:?} after handshake", id, event);
            }
            DriverSignal::Connected => self.complete_relay(id),
            DriverSignal::ConnectFailed(reason) => self.fail_server(id, reason),
        }
    }

    fn handle_outbound_event(&mut self, id: SocketId, event: TransportEvent, now: Instant) {
        let client = match self.links.pairing.peer_of(id) {
            Some(client) if self.servers.contains_key(&client) => client,
            _ => {
                warn!("{}: outbound socket without a live client", id);
                self.drop_corrupted(id);
                return;
            }
        };

        match event {
            TransportEvent::Connected => {
                let bound = match self.links.outbound.get_mut(&id) {
                    Some(outbound) => {
                        outbound.connected = true;
                        info!("{}: connected to {}", id, outbound.destination);
                        outbound.transport.local_addr().unwrap_or_else(|_| unspecified())
                    }
                    None => return,
                };
                if let Some(server) = self.servers.get_mut(&client) {
                    server.handled_tcp_connect(Socks5ReplyCode::Succeeded, bound, now);
                }
            }
            TransportEvent::ConnectFailed(reason) | TransportEvent::Closed(reason) => {
                debug!("{}: outbound for {} failed: {}", id, client, reason);
                RelayStats::bump(&self.links.stats.outbound_failed);
                self.drop_outbound_of(client);
                // Every outbound failure is reported to the client as refused.
                // The client cleans itself up through its own cancel path.
                if let Some(server) = self.servers.get_mut(&client) {
                    server.handled_tcp_connect(
                        Socks5ReplyCode::ConnectionRefused,
                        unspecified(),
                        now,
                    );
                }
            }
            TransportEvent::Readable | TransportEvent::Writable => {}
        }
    }

    fn complete_relay(&mut self, id: SocketId) {
        let server = match self.servers.remove(&id) {
            Some(server) => server,
            None => return,
        };
        let outbound = self
            .links
            .pairing
            .remove(id)
            .and_then(|peer| self.links.outbound.remove(&peer));

        match (outbound, server.into_relay()) {
            (Some(outbound), Ok(endpoint)) if outbound.connected && outbound.client == id => {
                info!(
                    "{}: relay established {} <-> {}",
                    id, endpoint.client_addr, outbound.destination
                );
                RelayStats::bump(&self.links.stats.relays_established);
                self.links
                    .handler
                    .on_relay_established(endpoint, outbound.transport);
            }
            (None, server) => {
                debug!("{}: outbound side went away before the relay started", id);
                RelayStats::bump(&self.links.stats.handshakes_failed);
                close_client(server);
                self.links
                    .handler
                    .on_handshake_failed(id, FailureReason::ConnectionRefused);
            }
            (Some(mut outbound), server) => {
                warn!("{}: inconsistent pairing at completion", id);
                RelayStats::bump(&self.links.stats.corrupted);
                outbound.transport.close();
                close_client(server);
            }
        }
    }

    fn fail_server(&mut self, id: SocketId, reason: FailureReason) {
        if let Some(mut server) = self.servers.remove(&id) {
            debug!("{}: handshake failed: {}", id, reason);
            server.close();
        }
        self.drop_outbound_of(id);
        RelayStats::bump(&self.links.stats.handshakes_failed);
        self.links.handler.on_handshake_failed(id, reason);
    }

    /// Close and forget the outbound socket paired with client `id`
    fn drop_outbound_of(&mut self, id: SocketId) {
        if let Some(peer) = self.links.pairing.remove(id) {
            if let Some(mut outbound) = self.links.outbound.remove(&peer) {
                outbound.transport.close();
            }
        }
    }

    /// Drop every record that mentions `id`
    fn drop_corrupted(&mut self, id: SocketId) {
        RelayStats::bump(&self.links.stats.corrupted);
        self.links.pairing.remove(id);
        if let Some(mut outbound) = self.links.outbound.remove(&id) {
            outbound.transport.close();
        }
        if let Some(mut server) = self.servers.remove(&id) {
            server.close();
        }
    }
}

fn close_client<T: StreamTransport>(server: Result<RelayEndpoint<T>, ServerNegotiator<T>>) {
    match server {
        Ok(mut endpoint) => endpoint.transport.close(),
        Err(mut server) => server.close(),
    }
}
