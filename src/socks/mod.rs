//! SOCKS5 protocol engine
//!
//! Sans-IO implementation of the RFC 1928 handshake. Nothing in this
//! module performs I/O or reads the clock: transports are supplied by the
//! embedder through [`StreamTransport`] / [`DatagramTransport`], readiness
//! arrives as [`TransportEvent`]s and time as explicit `Instant`s.
//!
//! - [`message`]: wire codecs
//! - [`HandshakeDriver`]: byte pump shared by both roles
//! - [`ClientNegotiator`] / [`ServerNegotiator`]: the two handshake roles
//! - [`RelayCoordinator`]: pairs accepted clients with outbound sockets
//! - [`UdpAssociation`]: datagram socket relayed through a proxy

pub mod consts;
pub mod message;

mod client;
mod coordinator;
mod handshake;
mod pairing;
mod server;
mod transport;
mod types;
mod udp;

pub use client::{ClientNegotiator, ClientState};
pub use coordinator::{RelayCoordinator, RelayHandler, RelayStats, RelayStatsSnapshot};
pub use handshake::{ControlProgress, ControlProtocol, ControlQueue, DriverSignal, HandshakeDriver};
pub use pairing::PairingTable;
pub use server::{RelayEndpoint, ServerNegotiator, ServerState, TcpConnectHandler};
pub use transport::{DatagramTransport, SocketId, StreamTransport, TransportEvent};
pub use types::{AddressType, AuthMethod, SocksCommand};
pub use udp::{UdpAssociation, UdpSignal, UdpState, MAX_DATAGRAM_SIZE};
