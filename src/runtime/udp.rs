//! UDP transport and the async UDP associate client

use crate::error::SocksRelayError;
use crate::runtime::reactor::{Reactor, Slot, SlotIo};
use crate::runtime::tcp::TokioTransport;
use crate::socks::{DatagramTransport, SocketId, UdpAssociation, UdpSignal};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// A [`DatagramTransport`] over a tokio [`UdpSocket`]
#[derive(Debug)]
pub struct TokioDatagram {
    slot: Arc<Slot>,
}

impl Reactor {
    /// A fresh, unbound datagram transport
    pub fn datagram(&self) -> TokioDatagram {
        TokioDatagram {
            slot: self.register(SlotIo::Idle),
        }
    }
}

impl TokioDatagram {
    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        match &self.slot.lock().io {
            SlotIo::Datagram(socket) => Ok(Arc::clone(socket)),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "socket not bound")),
        }
    }

    /// Wait until the socket can send
    pub async fn writable(&self) -> io::Result<()> {
        self.socket()?.writable().await
    }
}

impl DatagramTransport for TokioDatagram {
    fn id(&self) -> SocketId {
        self.slot.id
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;

        let mut state = self.slot.lock();
        match state.io {
            SlotIo::Idle => {
                state.io = SlotIo::Datagram(Arc::new(socket));
                Ok(())
            }
            _ => Err(io::Error::new(io::ErrorKind::AlreadyExists, "socket already bound")),
        }
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let socket = self.socket()?;
        // UDP connect only records the peer, so it never blocks
        socket2::SockRef::from(socket.as_ref()).connect(&addr.into())
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self.socket()?.try_send(datagram)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket()?.try_recv(buf)
    }

    fn set_read_interest(&mut self, enabled: bool) {
        self.slot.lock().read_interest = enabled;
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    fn close(&mut self) {
        let mut state = self.slot.lock();
        state.io = SlotIo::Closed;
        state.read_interest = false;
        state.write_interest = false;
    }
}

/// A UDP socket whose datagrams travel through a SOCKS5 proxy.
///
/// The association is torn down when the proxy closes the control
/// connection; later calls then fail with `NotConnected`.
#[derive(Debug)]
pub struct Socks5Datagram {
    reactor: Reactor,
    association: UdpAssociation<TokioTransport, TokioDatagram>,
}

impl Socks5Datagram {
    /// Associate through `proxy`; `target` is the default destination
    pub async fn associate(proxy: SocketAddr, target: SocketAddr) -> Result<Self, SocksRelayError> {
        let reactor = Reactor::default();
        let mut datagram = reactor.datagram();
        let local: SocketAddr = if proxy.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        datagram.bind(local)?;

        let mut association = UdpAssociation::new(reactor.stream(), datagram);
        association.connect(proxy, target)?;

        loop {
            for (id, event) in reactor.next_events().await {
                if id != association.id() {
                    continue;
                }
                match association.handle_control_event(event) {
                    UdpSignal::Pending => {}
                    UdpSignal::Associated(relay) => {
                        debug!("UDP association via {} relaying through {}", proxy, relay);
                        return Ok(Socks5Datagram {
                            reactor,
                            association,
                        });
                    }
                    UdpSignal::Failed(reason) => return Err(reason.into()),
                }
            }
        }
    }

    /// The proxy's UDP relay address
    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.association.relay_addr()
    }

    /// Local address of the datagram socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.association.datagram().local_addr()
    }

    /// Send `payload` to `destination`
    pub async fn send_to(&mut self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
        loop {
            match self.association.send_to(payload, destination) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.association.datagram().writable().await?;
                }
                result => return result,
            }
        }
    }

    /// Send `payload` to the last address heard from
    pub async fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        let destination = self
            .association
            .last_remote()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no destination"))?;
        self.send_to(payload, destination).await
    }

    /// Receive the next datagram and the address it came from
    pub async fn recv_from(&mut self) -> Result<(Bytes, SocketAddr), SocksRelayError> {
        let datagram_id = self.association.datagram_id();
        loop {
            for (id, event) in self.reactor.next_events().await {
                if id == self.association.id() {
                    if let UdpSignal::Failed(reason) = self.association.handle_control_event(event) {
                        return Err(reason.into());
                    }
                    continue;
                }
                if id != datagram_id {
                    continue;
                }
                match self.association.recv() {
                    Ok(Some((from, payload))) => return Ok((payload, from)),
                    Ok(None) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        trace!("{}: spurious datagram readiness", datagram_id);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Close the control connection and the datagram socket
    pub fn close(&mut self) {
        self.association.close();
    }
}
