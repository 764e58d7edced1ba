//! Server negotiator
//!
//! Accepts one SOCKS5 client: method selection, request parsing and
//! command dispatch. `CONNECT` is forwarded to a [`TcpConnectHandler`]
//! (normally the relay coordinator) and the reply is deferred until the
//! outbound connection resolves. `BIND` and `UDP ASSOCIATE` are refused.
//!
//! On any failure the server sends the matching reply and then lingers in
//! `Cancelled` for at most the cancel timeout (RFC 1928, section 6) before
//! reporting the failure to its owner, so the client has a chance to read
//! the reply and close first.

use crate::error::{DecodeError, FailureReason, Socks5ReplyCode};
use crate::socks::consts::DEFAULT_CANCEL_TIMEOUT_SECS;
use crate::socks::handshake::{ControlProgress, ControlProtocol, ControlQueue, DriverSignal, HandshakeDriver};
use crate::socks::message::{MethodSelectMessage, ReplyMessage, RequestMessage, VersionMessage, WireMessage};
use crate::socks::transport::{SocketId, StreamTransport, TransportEvent};
use crate::socks::types::{AuthMethod, SocksCommand};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Server handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the client greeting
    ReceivingVersion,
    /// Waiting for the request
    ReceivingRequest,
    /// `CONNECT` forwarded, waiting for the outbound connection
    AwaitingTcpConnection,
    /// `UDP ASSOCIATE` received
    AwaitingUdpAssociation,
    /// `BIND` received, no listener yet
    AwaitingBoundTcpListener,
    /// `BIND` listener up, waiting for the inbound connection
    AwaitingInboundTcpConnection,
    /// Success reply queued for a `CONNECT`
    TcpConnected,
    /// Success reply queued for a `UDP ASSOCIATE`
    UdpAssociated,
    /// Success reply queued for a `BIND`
    TcpBound,
    /// Failed; waiting for the client to close or the timer to expire
    Cancelled,
}

impl ServerState {
    /// Whether a success reply has been queued
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ServerState::TcpConnected | ServerState::UdpAssociated | ServerState::TcpBound
        )
    }
}

/// Receives the destination of an accepted `CONNECT` request
pub trait TcpConnectHandler {
    /// Start an outbound connection for `server`.
    ///
    /// `Succeeded` means the request was accepted and the reply is deferred
    /// until [`ServerNegotiator::handled_tcp_connect`] is called; any other
    /// code is sent to the client right away.
    fn handle_tcp_connect_request(
        &mut self,
        server: SocketId,
        destination: SocketAddr,
    ) -> Socks5ReplyCode;
}

/// Per-event inputs of the server role
struct ServerContext<'a> {
    handler: Option<&'a mut dyn TcpConnectHandler>,
    now: Instant,
}

#[derive(Debug)]
struct ServerRole {
    id: SocketId,
    state: ServerState,
    failure: Option<FailureReason>,
    deadline: Option<Instant>,
    cancel_timeout: Duration,
    destination: Option<SocketAddr>,
}

impl ServerRole {
    /// Returns false when already cancelled or connected
    fn cancel(&mut self, reason: FailureReason, now: Instant) -> bool {
        if self.state == ServerState::Cancelled || self.state.is_connected() {
            return false;
        }
        info!("{}: cancelling SOCKS5 session: {}", self.id, reason);
        self.state = ServerState::Cancelled;
        self.failure = Some(reason);
        // A timeout past the end of the clock never fires
        self.deadline = now.checked_add(self.cancel_timeout);
        true
    }

    /// Queue a failure reply, then cancel
    fn reject(
        &mut self,
        reply: Socks5ReplyCode,
        reason: FailureReason,
        inbound: &mut BytesMut,
        queue: &mut ControlQueue,
        now: Instant,
    ) -> Result<ControlProgress, FailureReason> {
        queue.queue_message(&ReplyMessage::failure(reply))?;
        self.cancel(reason, now);
        inbound.clear();
        Ok(ControlProgress::Pause)
    }

    fn receive_version(
        &mut self,
        inbound: &mut BytesMut,
        queue: &mut ControlQueue,
        now: Instant,
    ) -> Result<ControlProgress, FailureReason> {
        let greeting = match VersionMessage::decode_and_consume(inbound) {
            Ok((message, _)) => message,
            Err(DecodeError::NeedMoreBytes(n)) => return Ok(ControlProgress::NeedMore(n)),
            Err(e) => {
                // Nothing sensible to reply to a broken greeting
                warn!("{}: invalid greeting: {}", self.id, e);
                self.cancel(FailureReason::from(e), now);
                inbound.clear();
                return Ok(ControlProgress::Progressed);
            }
        };

        if greeting.offers(AuthMethod::NoAuthRequired) {
            queue.queue_message(&MethodSelectMessage::new(AuthMethod::NoAuthRequired))?;
            self.state = ServerState::ReceivingRequest;
        } else {
            debug!(
                "{}: no acceptable method among {:?}",
                self.id,
                greeting.methods()
            );
            queue.queue_message(&MethodSelectMessage::none_acceptable())?;
            self.cancel(FailureReason::NoAcceptableMethod, now);
            inbound.clear();
        }
        Ok(ControlProgress::Pause)
    }

    fn receive_request(
        &mut self,
        inbound: &mut BytesMut,
        queue: &mut ControlQueue,
        ctx: &mut ServerContext<'_>,
    ) -> Result<ControlProgress, FailureReason> {
        let request = match RequestMessage::decode_and_consume(inbound) {
            Ok((message, _)) => message,
            Err(DecodeError::NeedMoreBytes(n)) => return Ok(ControlProgress::NeedMore(n)),
            Err(e) => {
                warn!("{}: invalid request: {}", self.id, e);
                let reason = FailureReason::from(e);
                return self.reject(reason.into(), reason, inbound, queue, ctx.now);
            }
        };

        debug!(
            "{}: {} request for {}",
            self.id, request.command, request.destination
        );
        self.destination = Some(request.destination);

        match request.command {
            SocksCommand::TcpConnect => {
                let reply = match ctx.handler.as_deref_mut() {
                    Some(handler) => {
                        handler.handle_tcp_connect_request(self.id, request.destination)
                    }
                    None => {
                        warn!("{}: no coordinator to handle CONNECT", self.id);
                        Socks5ReplyCode::GeneralFailure
                    }
                };
                match reply.failure_reason() {
                    None => {
                        self.state = ServerState::AwaitingTcpConnection;
                        Ok(ControlProgress::Pause)
                    }
                    Some(reason) => self.reject(reply, reason, inbound, queue, ctx.now),
                }
            }
            SocksCommand::TcpBind => {
                self.state = ServerState::AwaitingBoundTcpListener;
                self.reject(
                    Socks5ReplyCode::CommandNotSupported,
                    FailureReason::CommandNotSupported,
                    inbound,
                    queue,
                    ctx.now,
                )
            }
            SocksCommand::UdpAssociate => {
                self.state = ServerState::AwaitingUdpAssociation;
                self.reject(
                    Socks5ReplyCode::CommandNotSupported,
                    FailureReason::CommandNotSupported,
                    inbound,
                    queue,
                    ctx.now,
                )
            }
        }
    }
}

impl<'a> ControlProtocol<ServerContext<'a>> for ServerRole {
    fn on_ready_to_send_control_data(
        &mut self,
        queue: &mut ControlQueue,
        _ctx: &mut ServerContext<'a>,
    ) -> Result<(), FailureReason> {
        if self.state.is_connected() {
            queue.complete_handshake();
        }
        Ok(())
    }

    fn on_receive_control_data(
        &mut self,
        inbound: &mut BytesMut,
        queue: &mut ControlQueue,
        ctx: &mut ServerContext<'a>,
    ) -> Result<ControlProgress, FailureReason> {
        match self.state {
            ServerState::ReceivingVersion => self.receive_version(inbound, queue, ctx.now),
            ServerState::ReceivingRequest => self.receive_request(inbound, queue, ctx),
            ServerState::Cancelled => {
                if inbound.is_empty() {
                    // Read one byte to tell a close from more data
                    Ok(ControlProgress::NeedMore(1))
                } else {
                    Err(self.failure.unwrap_or(FailureReason::GeneralFailure))
                }
            }
            ServerState::AwaitingTcpConnection
            | ServerState::AwaitingUdpAssociation
            | ServerState::AwaitingBoundTcpListener
            | ServerState::AwaitingInboundTcpConnection => {
                if inbound.is_empty() {
                    Ok(ControlProgress::Pause)
                } else {
                    warn!("{}: data received in state {:?}", self.id, self.state);
                    self.reject(
                        Socks5ReplyCode::GeneralFailure,
                        FailureReason::ProtocolError,
                        inbound,
                        queue,
                        ctx.now,
                    )
                }
            }
            ServerState::TcpConnected | ServerState::UdpAssociated | ServerState::TcpBound => {
                Ok(ControlProgress::Done)
            }
        }
    }
}

/// A client socket whose handshake completed, ready for plain relaying
#[derive(Debug)]
pub struct RelayEndpoint<T> {
    /// Identifier of the transport
    pub id: SocketId,
    /// The client-facing transport
    pub transport: T,
    /// Address of the SOCKS5 client
    pub client_addr: SocketAddr,
    /// Destination the client asked for
    pub destination: SocketAddr,
}

/// Server side of a SOCKS5 handshake over one accepted transport
#[derive(Debug)]
pub struct ServerNegotiator<T> {
    transport: T,
    driver: HandshakeDriver,
    role: ServerRole,
    client_addr: SocketAddr,
    attached: bool,
}

impl<T: StreamTransport> ServerNegotiator<T> {
    /// Wrap an accepted transport.
    ///
    /// Fails, closing the transport, when it has no peer address.
    pub fn new(mut transport: T) -> io::Result<Self> {
        let client_addr = match transport.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        let id = transport.id();
        Ok(ServerNegotiator {
            transport,
            driver: HandshakeDriver::new(),
            role: ServerRole {
                id,
                state: ServerState::ReceivingVersion,
                failure: None,
                deadline: None,
                cancel_timeout: Duration::from_secs(DEFAULT_CANCEL_TIMEOUT_SECS),
                destination: None,
            },
            client_addr,
            attached: true,
        })
    }

    /// Use a different cancel timeout
    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.role.cancel_timeout = timeout;
        self
    }

    /// Begin reading the greeting
    pub fn start(
        &mut self,
        handler: Option<&mut dyn TcpConnectHandler>,
        now: Instant,
    ) -> DriverSignal {
        let mut ctx = ServerContext {
            handler: if self.attached { handler } else { None },
            now,
        };
        self.driver
            .start(&mut self.transport, &mut self.role, &mut ctx)
    }

    /// Handle one transport event
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        handler: Option<&mut dyn TcpConnectHandler>,
        now: Instant,
    ) -> DriverSignal {
        if self.role.state == ServerState::Cancelled {
            if let TransportEvent::Closed(_) = event {
                return DriverSignal::ConnectFailed(FailureReason::ClosedByPeer);
            }
        }
        let mut ctx = ServerContext {
            handler: if self.attached { handler } else { None },
            now,
        };
        self.driver
            .handle_event(event, &mut self.transport, &mut self.role, &mut ctx)
    }

    /// Resolve a deferred `CONNECT`.
    ///
    /// On success the reply carries `bound`; the negotiator reports
    /// `Connected` once that reply has been written. On failure the mapped
    /// reply is sent and the session cancelled.
    pub fn handled_tcp_connect(&mut self, reply: Socks5ReplyCode, bound: SocketAddr, now: Instant) {
        if self.role.state != ServerState::AwaitingTcpConnection {
            debug!(
                "{}: ignoring connect result {:?} in state {:?}",
                self.role.id, reply, self.role.state
            );
            return;
        }

        let queued = match reply.failure_reason() {
            None => {
                self.role.state = ServerState::TcpConnected;
                self.driver.queue_mut().queue_message(&ReplyMessage::success(bound))
            }
            Some(reason) => {
                let queued = self
                    .driver
                    .queue_mut()
                    .queue_message(&ReplyMessage::failure(reply));
                self.role.cancel(reason, now);
                self.driver.clear_inbound();
                queued
            }
        };
        if let Err(e) = queued {
            warn!("{}: could not queue reply: {}", self.role.id, e);
            self.cancel(FailureReason::GeneralFailure, now);
        }
        self.driver.sync_interest(&mut self.transport);
    }

    /// Cancel the session without sending anything further.
    ///
    /// No-op once cancelled or connected.
    pub fn cancel(&mut self, reason: FailureReason, now: Instant) {
        if self.role.cancel(reason, now) {
            self.driver.clear_inbound();
        }
    }

    /// Fire the cancel timer if it is due
    pub fn on_timeout(&mut self, now: Instant) -> DriverSignal {
        match self.role.deadline {
            Some(deadline) if deadline <= now => {
                self.role.deadline = None;
                let reason = self.role.failure.unwrap_or(FailureReason::TimedOut);
                debug!("{}: cancel timer expired ({})", self.role.id, reason);
                DriverSignal::ConnectFailed(reason)
            }
            _ => DriverSignal::Pending,
        }
    }

    /// When the cancel timer expires, if running
    pub fn deadline(&self) -> Option<Instant> {
        self.role.deadline
    }

    /// Stop calling back into the coordinator; later `CONNECT`s fail
    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// Whether a coordinator still receives this socket's requests
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Identifier of the underlying transport
    pub fn id(&self) -> SocketId {
        self.role.id
    }

    /// Current handshake state
    pub fn state(&self) -> ServerState {
        self.role.state
    }

    /// The stored failure, once cancelled
    pub fn failure(&self) -> Option<FailureReason> {
        self.role.failure
    }

    /// Destination of the last parsed request
    pub fn destination(&self) -> Option<SocketAddr> {
        self.role.destination
    }

    /// Address of the SOCKS5 client
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Whether the handshake completed
    pub fn is_complete(&self) -> bool {
        self.driver.is_complete()
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close the underlying transport
    pub fn close(&mut self) {
        self.role.deadline = None;
        self.transport.close();
    }

    /// Turn a completed negotiator into a relay endpoint.
    ///
    /// Gives the negotiator back when the handshake is not complete.
    pub fn into_relay(self) -> Result<RelayEndpoint<T>, Self> {
        match self.role.destination {
            Some(destination) if self.driver.is_complete() => Ok(RelayEndpoint {
                id: self.role.id,
                transport: self.transport,
                client_addr: self.client_addr,
                destination,
            }),
            _ => Err(self),
        }
    }
}
