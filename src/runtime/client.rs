//! Async SOCKS5 client helpers

use crate::error::SocksRelayError;
use crate::runtime::reactor::Reactor;
use crate::runtime::tcp::{SocketOpts, TokioTransport};
use crate::socks::message::unspecified;
use crate::socks::{ClientNegotiator, DriverSignal};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Open a TCP connection to `target` through the SOCKS5 proxy at `proxy`.
///
/// Returns the stream, ready for application data, and the address the
/// proxy reported as bound for the outbound connection.
pub async fn connect_via_proxy(
    proxy: SocketAddr,
    target: SocketAddr,
) -> Result<(TcpStream, SocketAddr), SocksRelayError> {
    connect_via_proxy_with(proxy, target, SocketOpts::default()).await
}

/// [`connect_via_proxy`], giving up after `timeout`
pub async fn connect_via_proxy_timeout(
    proxy: SocketAddr,
    target: SocketAddr,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), SocksRelayError> {
    tokio::time::timeout(timeout, connect_via_proxy(proxy, target))
        .await
        .map_err(|_| {
            SocksRelayError::Timeout(format!("connecting to {} via {}", target, proxy))
        })?
}

/// [`connect_via_proxy`] with explicit socket options
pub async fn connect_via_proxy_with(
    proxy: SocketAddr,
    target: SocketAddr,
    opts: SocketOpts,
) -> Result<(TcpStream, SocketAddr), SocksRelayError> {
    let reactor = Reactor::new(opts);
    let mut negotiator: ClientNegotiator<TokioTransport> = ClientNegotiator::new(reactor.stream());
    negotiator.connect(proxy, target)?;

    loop {
        for (_, event) in reactor.next_events().await {
            match negotiator.handle_event(event) {
                DriverSignal::Connected => {
                    let bound = negotiator.bound_addr().unwrap_or_else(unspecified);
                    debug!("connected to {} via {}, bound {}", target, proxy, bound);
                    let stream = negotiator.into_inner().into_stream()?;
                    return Ok((stream, bound));
                }
                DriverSignal::ConnectFailed(reason) => return Err(reason.into()),
                DriverSignal::Pending | DriverSignal::Forward(_) => {}
            }
        }
    }
}
