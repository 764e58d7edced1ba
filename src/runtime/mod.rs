//! Tokio runtime adapter
//!
//! Supplies the transports the sans-IO engine in [`crate::socks`] expects,
//! a [`Reactor`] translating tokio readiness into transport events, and
//! the server and client front ends built on top of them.

mod client;
mod reactor;
mod relay;
mod server;
mod tcp;
mod udp;

pub use client::{connect_via_proxy, connect_via_proxy_timeout, connect_via_proxy_with};
pub use reactor::Reactor;
pub use relay::{relay_tcp, RelayTotals};
pub use server::Socks5Server;
pub use tcp::{SocketOpts, TokioTransport};
pub use udp::{Socks5Datagram, TokioDatagram};
