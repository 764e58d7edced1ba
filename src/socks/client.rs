//! Client negotiator
//!
//! Runs the client side of a SOCKS5 handshake against a proxy:
//!
//! ```text
//! NotConnected --greeting--> AwaitingMethod --request--> AwaitingReply --reply--> Connected
//! ```
//!
//! The same negotiator doubles as the control channel of a UDP
//! association by sending `UDP ASSOCIATE` instead of `CONNECT`.

use crate::error::{DecodeError, FailureReason};
use crate::socks::handshake::{ControlProgress, ControlProtocol, ControlQueue, DriverSignal, HandshakeDriver};
use crate::socks::message::{MethodSelectMessage, ReplyMessage, RequestMessage, VersionMessage, WireMessage};
use crate::socks::transport::{SocketId, StreamTransport, TransportEvent};
use crate::socks::types::{AuthMethod, SocksCommand};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Client handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connect attempt yet, or the proxy connection is in progress
    NotConnected,
    /// Greeting sent, waiting for the method selection
    AwaitingMethod,
    /// Request sent, waiting for the reply
    AwaitingReply,
    /// Handshake complete
    Connected,
}

#[derive(Debug)]
struct ClientRole {
    state: ClientState,
    command: SocksCommand,
    target: Option<SocketAddr>,
    bound: Option<SocketAddr>,
}

impl ControlProtocol<()> for ClientRole {
    fn on_ready_to_send_control_data(
        &mut self,
        queue: &mut ControlQueue,
        _ctx: &mut (),
    ) -> Result<(), FailureReason> {
        match self.state {
            ClientState::NotConnected => {
                queue.queue_message(&VersionMessage::no_auth())?;
                self.state = ClientState::AwaitingMethod;
            }
            ClientState::Connected => queue.complete_handshake(),
            ClientState::AwaitingMethod | ClientState::AwaitingReply => {}
        }
        Ok(())
    }

    fn on_receive_control_data(
        &mut self,
        inbound: &mut BytesMut,
        queue: &mut ControlQueue,
        _ctx: &mut (),
    ) -> Result<ControlProgress, FailureReason> {
        match self.state {
            ClientState::AwaitingMethod => {
                let selected = match MethodSelectMessage::decode_and_consume(inbound) {
                    Ok((message, _)) => message,
                    Err(DecodeError::NeedMoreBytes(n)) => return Ok(ControlProgress::NeedMore(n)),
                    Err(e) => {
                        warn!("Invalid method selection from proxy: {}", e);
                        return Err(FailureReason::ProtocolError);
                    }
                };
                match selected.method {
                    AuthMethod::NoAuthRequired => {}
                    AuthMethod::NoneAcceptable => return Err(FailureReason::NoAcceptableMethod),
                    other => {
                        warn!("Proxy selected an authentication method we never offered: {:?}", other);
                        return Err(FailureReason::ProtocolError);
                    }
                }

                let target = self.target.ok_or(FailureReason::GeneralFailure)?;
                queue.queue_message(&RequestMessage::new(self.command, target))?;
                self.state = ClientState::AwaitingReply;
                Ok(ControlProgress::Pause)
            }
            ClientState::AwaitingReply => {
                let reply = match ReplyMessage::decode_and_consume(inbound) {
                    Ok((message, _)) => message,
                    Err(DecodeError::NeedMoreBytes(n)) => return Ok(ControlProgress::NeedMore(n)),
                    Err(e) => {
                        warn!("Invalid reply from proxy: {}", e);
                        return Err(FailureReason::ProtocolError);
                    }
                };
                if let Some(reason) = reply.reply.failure_reason() {
                    debug!("Proxy rejected {} request: {}", self.command, reason);
                    return Err(reason);
                }
                self.bound = Some(reply.bound);
                self.state = ClientState::Connected;
                Ok(ControlProgress::Done)
            }
            ClientState::NotConnected | ClientState::Connected => Ok(ControlProgress::Done),
        }
    }
}

/// Client side of a SOCKS5 handshake over one transport
#[derive(Debug)]
pub struct ClientNegotiator<T> {
    transport: T,
    driver: HandshakeDriver,
    role: ClientRole,
    proxy: Option<SocketAddr>,
}

impl<T: StreamTransport> ClientNegotiator<T> {
    /// Negotiator that sends `CONNECT`
    pub fn new(transport: T) -> Self {
        ClientNegotiator::with_command(transport, SocksCommand::TcpConnect)
    }

    /// Negotiator that sends `command`
    pub fn with_command(transport: T, command: SocksCommand) -> Self {
        ClientNegotiator {
            transport,
            driver: HandshakeDriver::new(),
            role: ClientRole {
                state: ClientState::NotConnected,
                command,
                target: None,
                bound: None,
            },
            proxy: None,
        }
    }

    /// Start connecting to `target` through the proxy at `proxy`.
    ///
    /// The transport connects to the proxy; `target` becomes the logical
    /// remote address. The outcome is always reported through
    /// [`ClientNegotiator::handle_event`], even when the transport fails
    /// synchronously.
    pub fn connect(&mut self, proxy: SocketAddr, target: SocketAddr) -> io::Result<()> {
        if self.role.target.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "connect already called",
            ));
        }
        self.role.target = Some(target);
        self.proxy = Some(proxy);

        debug!("{}: connecting to {} via proxy {}", self.transport.id(), target, proxy);
        if let Err(e) = self.transport.connect(proxy) {
            debug!("{}: proxy connect failed immediately: {}", self.transport.id(), e);
            self.driver.defer_failure(&mut self.transport, FailureReason::from(&e));
        }
        Ok(())
    }

    /// Handle one transport event
    pub fn handle_event(&mut self, event: TransportEvent) -> DriverSignal {
        let signal = self
            .driver
            .handle_event(event, &mut self.transport, &mut self.role, &mut ());
        if signal == DriverSignal::Connected {
            debug!(
                "{}: {} to {:?} established, proxy bound {:?}",
                self.transport.id(),
                self.role.command,
                self.role.target,
                self.role.bound
            );
        }
        signal
    }

    /// Identifier of the underlying transport
    pub fn id(&self) -> SocketId {
        self.transport.id()
    }

    /// Current handshake state
    pub fn state(&self) -> ClientState {
        self.role.state
    }

    /// Command this negotiator requests
    pub fn command(&self) -> SocksCommand {
        self.role.command
    }

    /// The logical remote address given to `connect`
    pub fn target(&self) -> Option<SocketAddr> {
        self.role.target
    }

    /// The proxy address given to `connect`
    pub fn proxy(&self) -> Option<SocketAddr> {
        self.proxy
    }

    /// Address from the proxy's success reply
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.role.bound
    }

    /// Whether the handshake completed
    pub fn is_connected(&self) -> bool {
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

    /// Release the transport, normally once connected
    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Socks5ReplyCode;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeProxy {
        to_client: VecDeque<u8>,
        from_client: Vec<u8>,
        connect_error: Option<io::ErrorKind>,
        connected_to: Option<SocketAddr>,
    }

    impl StreamTransport for FakeProxy {
        fn id(&self) -> SocketId {
            SocketId(7)
        }

        fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
            if let Some(kind) = self.connect_error {
                return Err(kind.into());
            }
            self.connected_to = Some(addr);
            Ok(())
        }

        fn read(&mut self, buf: &mut BytesMut, limit: usize) -> io::Result<usize> {
            if self.to_client.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = limit.min(self.to_client.len());
            buf.extend(self.to_client.drain(..n));
            Ok(n)
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.from_client.extend_from_slice(data);
            Ok(data.len())
        }

        fn set_read_interest(&mut self, _enabled: bool) {}

        fn set_write_interest(&mut self, _enabled: bool) {}

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("10.0.0.2:50000".parse().unwrap())
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            self.connected_to.ok_or_else(|| io::ErrorKind::NotConnected.into())
        }

        fn close(&mut self) {}
    }

    fn proxy_addr() -> SocketAddr {
        "10.0.0.1:1080".parse().unwrap()
    }

    fn target_addr() -> SocketAddr {
        "93.184.216.34:80".parse().unwrap()
    }

    fn negotiate_until_request(client: &mut ClientNegotiator<FakeProxy>) {
        client.connect(proxy_addr(), target_addr()).unwrap();
        assert_eq!(client.handle_event(TransportEvent::Connected), DriverSignal::Pending);
        assert_eq!(client.handle_event(TransportEvent::Writable), DriverSignal::Pending);
        assert_eq!(client.transport().from_client, vec![0x05, 0x01, 0x00]);

        client.transport_mut().to_client.extend([0x05, 0x00]);
        assert_eq!(client.handle_event(TransportEvent::Readable), DriverSignal::Pending);
        assert_eq!(client.state(), ClientState::AwaitingReply);
        client.handle_event(TransportEvent::Writable);
    }

    #[test]
    fn test_connects_to_proxy_not_target() {
        let mut client = ClientNegotiator::new(FakeProxy::default());
        client.connect(proxy_addr(), target_addr()).unwrap();
        assert_eq!(client.transport().connected_to, Some(proxy_addr()));
        assert_eq!(client.target(), Some(target_addr()));
        assert!(client.connect(proxy_addr(), target_addr()).is_err());
    }

    #[test]
    fn test_successful_connect() {
        let mut client = ClientNegotiator::new(FakeProxy::default());
        negotiate_until_request(&mut client);
        assert_eq!(
            &client.transport().from_client[3..],
            &[0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0x00, 0x50]
        );

        client
            .transport_mut()
            .to_client
            .extend(ReplyMessage::success("10.0.0.1:40000".parse().unwrap()).to_bytes());
        assert_eq!(client.handle_event(TransportEvent::Readable), DriverSignal::Connected);
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.bound_addr(), Some("10.0.0.1:40000".parse().unwrap()));
        assert!(client.is_connected());
    }

    #[test]
    fn test_rejected_method() {
        let mut client = ClientNegotiator::new(FakeProxy::default());
        client.connect(proxy_addr(), target_addr()).unwrap();
        client.handle_event(TransportEvent::Connected);
        client.handle_event(TransportEvent::Writable);

        client.transport_mut().to_client.extend([0x05, 0xFF]);
        assert_eq!(
            client.handle_event(TransportEvent::Readable),
            DriverSignal::ConnectFailed(FailureReason::NoAcceptableMethod)
        );
    }

    #[test]
    fn test_unoffered_method_is_protocol_error() {
        let mut client = ClientNegotiator::new(FakeProxy::default());
        client.connect(proxy_addr(), target_addr()).unwrap();
        client.handle_event(TransportEvent::Connected);
        client.handle_event(TransportEvent::Writable);

        client.transport_mut().to_client.extend([0x05, 0x02]);
        assert_eq!(
            client.handle_event(TransportEvent::Readable),
            DriverSignal::ConnectFailed(FailureReason::ProtocolError)
        );
    }

    #[test]
    fn test_reply_code_maps_to_reason() {
        let mut client = ClientNegotiator::new(FakeProxy::default());
        negotiate_until_request(&mut client);

        client
            .transport_mut()
            .to_client
            .extend(ReplyMessage::failure(Socks5ReplyCode::AddressTypeNotSupported).to_bytes());
        assert_eq!(
            client.handle_event(TransportEvent::Readable),
            DriverSignal::ConnectFailed(FailureReason::AddressTypeNotSupported)
        );
    }

    #[test]
    fn test_unknown_reply_code_is_protocol_error() {
        let mut client = ClientNegotiator::new(FakeProxy::default());
        negotiate_until_request(&mut client);

        client
            .transport_mut()
            .to_client
            .extend([0x05, 0x2A, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            client.handle_event(TransportEvent::Readable),
            DriverSignal::ConnectFailed(FailureReason::ProtocolError)
        );
    }

    #[test]
    fn test_synchronous_connect_failure_is_deferred() {
        let mut client = ClientNegotiator::new(FakeProxy {
            connect_error: Some(io::ErrorKind::ConnectionRefused),
            ..Default::default()
        });
        assert!(client.connect(proxy_addr(), target_addr()).is_ok());
        assert_eq!(
            client.handle_event(TransportEvent::Writable),
            DriverSignal::ConnectFailed(FailureReason::ConnectionRefused)
        );
    }

    #[test]
    fn test_udp_associate_command() {
        let mut client =
            ClientNegotiator::with_command(FakeProxy::default(), SocksCommand::UdpAssociate);
        negotiate_until_request(&mut client);
        assert_eq!(client.transport().from_client[4], 0x03);
    }
}
