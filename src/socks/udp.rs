//! UDP associate path
//!
//! A datagram socket paired with a TCP control channel. The control
//! channel is a [`ClientNegotiator`] sending `UDP ASSOCIATE`; its reply
//! names the proxy's UDP relay address, which the datagram transport then
//! connects to. Every datagram carries a [`UdpRequestHeader`].
//!
//! The association lives exactly as long as the control channel: when it
//! closes or fails, so does the datagram side.

use crate::error::FailureReason;
use crate::socks::client::ClientNegotiator;
use crate::socks::handshake::DriverSignal;
use crate::socks::message::UdpRequestHeader;
use crate::socks::transport::{DatagramTransport, SocketId, StreamTransport, TransportEvent};
use crate::socks::types::SocksCommand;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Largest datagram accepted from the relay
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// What the owner of a [`UdpAssociation`] learns from an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpSignal {
    /// Nothing to report
    Pending,
    /// The association is usable; datagrams go to this relay address
    Associated(SocketAddr),
    /// The association failed and both transports were closed
    Failed(FailureReason),
}

/// Association lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpState {
    /// `connect` not called yet
    Idle,
    /// Control handshake in progress
    Negotiating,
    /// Datagrams may flow
    Associated,
    /// Closed after a failure
    Failed,
}

/// A UDP socket relayed through a SOCKS5 proxy
#[derive(Debug)]
pub struct UdpAssociation<T, D> {
    control: ClientNegotiator<T>,
    datagram: D,
    state: UdpState,
    datagram_connected: bool,
    relay: Option<SocketAddr>,
    last_remote: Option<SocketAddr>,
}

impl<T: StreamTransport, D: DatagramTransport> UdpAssociation<T, D> {
    /// Pair a control transport with a bound datagram transport
    pub fn new(control: T, datagram: D) -> Self {
        UdpAssociation {
            control: ClientNegotiator::with_command(control, SocksCommand::UdpAssociate),
            datagram,
            state: UdpState::Idle,
            datagram_connected: false,
            relay: None,
            last_remote: None,
        }
    }

    /// Start associating through the proxy at `proxy`.
    ///
    /// `target` is sent in the request and becomes the default destination
    /// of [`UdpAssociation::send`].
    pub fn connect(&mut self, proxy: SocketAddr, target: SocketAddr) -> io::Result<()> {
        self.control.connect(proxy, target)?;
        self.state = UdpState::Negotiating;
        self.last_remote = Some(target);
        Ok(())
    }

    /// Handle an event of the control transport
    pub fn handle_control_event(&mut self, event: TransportEvent) -> UdpSignal {
        if self.state == UdpState::Failed {
            return UdpSignal::Failed(FailureReason::ClosedByPeer);
        }

        match self.control.handle_event(event) {
            DriverSignal::Pending => UdpSignal::Pending,
            DriverSignal::Connected => self.on_control_connected(),
            DriverSignal::ConnectFailed(reason) => self.fail(reason),
            DriverSignal::Forward(event) => self.on_control_event_after_handshake(event),
        }
    }

    fn on_control_connected(&mut self) -> UdpSignal {
        let bound = match self.control.bound_addr() {
            Some(bound) => bound,
            None => return self.fail(FailureReason::ProtocolError),
        };
        // A wildcard reply means "same host as the control connection"
        let relay = match self.control.proxy() {
            Some(proxy) if bound.ip().is_unspecified() => SocketAddr::new(proxy.ip(), bound.port()),
            _ => bound,
        };

        if let Err(e) = self.datagram.connect(relay) {
            warn!("{}: cannot connect datagram socket to relay {}: {}", self.id(), relay, e);
            return self.fail(FailureReason::from(&e));
        }
        self.datagram.set_read_interest(true);
        // The control channel is only watched for closure from here on
        self.control.transport_mut().set_read_interest(true);

        self.datagram_connected = true;
        self.relay = Some(relay);
        self.state = UdpState::Associated;
        debug!("{}: UDP association through relay {}", self.id(), relay);
        UdpSignal::Associated(relay)
    }

    fn on_control_event_after_handshake(&mut self, event: TransportEvent) -> UdpSignal {
        match event {
            TransportEvent::Readable => {
                let mut scratch = BytesMut::new();
                match self.control.transport_mut().read(&mut scratch, 512) {
                    Ok(0) => self.fail(FailureReason::ClosedByPeer),
                    Ok(n) => {
                        trace!("{}: discarding {} bytes on control channel", self.id(), n);
                        UdpSignal::Pending
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => UdpSignal::Pending,
                    Err(e) => self.fail(FailureReason::from(&e)),
                }
            }
            TransportEvent::Closed(reason) | TransportEvent::ConnectFailed(reason) => {
                self.fail(reason)
            }
            TransportEvent::Connected | TransportEvent::Writable => UdpSignal::Pending,
        }
    }

    fn fail(&mut self, reason: FailureReason) -> UdpSignal {
        if self.state != UdpState::Failed {
            debug!("{}: UDP association failed: {}", self.id(), reason);
            self.state = UdpState::Failed;
            self.datagram_connected = false;
            self.control.transport_mut().close();
            self.datagram.close();
        }
        UdpSignal::Failed(reason)
    }

    /// Send `payload` to the last-seen remote address
    pub fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        let destination = self
            .last_remote
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no destination"))?;
        self.send_to(payload, destination)
    }

    /// Send `payload` to `destination` through the relay.
    ///
    /// Returns the payload length; nothing is sent unless the association
    /// is up and `destination` is a usable address.
    pub fn send_to(&mut self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
        if !self.is_associated() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "UDP association not established",
            ));
        }
        if destination.ip().is_unspecified() || destination.port() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable destination {}", destination),
            ));
        }

        let datagram = UdpRequestHeader::new(destination).encapsulate(payload);
        self.datagram.send(&datagram)?;
        Ok(payload.len())
    }

    /// Receive one datagram from the relay.
    ///
    /// `Ok(None)` means a datagram arrived but was discarded (bad header or
    /// a fragment). `WouldBlock` means nothing is waiting.
    pub fn recv(&mut self) -> io::Result<Option<(SocketAddr, Bytes)>> {
        if !self.is_associated() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "UDP association not established",
            ));
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let n = self.datagram.recv(&mut buf)?;
        match UdpRequestHeader::strip(&buf[..n]) {
            Ok((header, _)) if header.is_fragmented() => {
                debug!("{}: dropping fragment {} from relay", self.id(), header.fragment);
                Ok(None)
            }
            Ok((header, payload)) => {
                self.last_remote = Some(header.address);
                Ok(Some((header.address, Bytes::copy_from_slice(payload))))
            }
            Err(e) => {
                debug!("{}: dropping datagram with bad header: {}", self.id(), e);
                Ok(None)
            }
        }
    }

    /// Identifier of the control transport
    pub fn id(&self) -> SocketId {
        self.control.id()
    }

    /// Identifier of the datagram transport
    pub fn datagram_id(&self) -> SocketId {
        self.datagram.id()
    }

    /// Association lifecycle state
    pub fn state(&self) -> UdpState {
        self.state
    }

    /// Whether both the handshake and the datagram transport are connected
    pub fn is_associated(&self) -> bool {
        self.state == UdpState::Associated && self.datagram_connected && self.control.is_connected()
    }

    /// The proxy's UDP relay address
    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.relay
    }

    /// Source of the most recent datagram, or the `connect` target
    pub fn last_remote(&self) -> Option<SocketAddr> {
        self.last_remote
    }

    /// Borrow the datagram transport
    pub fn datagram(&self) -> &D {
        &self.datagram
    }

    /// Mutably borrow the datagram transport
    pub fn datagram_mut(&mut self) -> &mut D {
        &mut self.datagram
    }

    /// Borrow the control negotiator
    pub fn control(&self) -> &ClientNegotiator<T> {
        &self.control
    }

    /// Close both transports
    pub fn close(&mut self) {
        self.state = UdpState::Failed;
        self.datagram_connected = false;
        self.control.transport_mut().close();
        self.datagram.close();
    }
}
