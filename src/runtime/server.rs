//! SOCKS5 relay server on tokio
//!
//! Accepts clients on a TCP listener and drives a [`RelayCoordinator`]
//! from one task. Each established relay is spliced on its own task.

use crate::config::ServerConfig;
use crate::error::{FailureReason, SocksRelayError};
use crate::runtime::reactor::Reactor;
use crate::runtime::relay::relay_tcp;
use crate::runtime::tcp::{SocketOpts, TokioTransport};
use crate::socks::{RelayCoordinator, RelayEndpoint, RelayHandler, RelayStats, SocketId};
use anyhow::{Context, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Relay handler that splices each established pair on a new task
#[derive(Debug)]
struct SpawnRelays {
    reactor: Reactor,
}

impl RelayHandler<TokioTransport> for SpawnRelays {
    fn on_outbound_socket_requested(&mut self, _for_client: SocketId) -> io::Result<TokioTransport> {
        Ok(self.reactor.stream())
    }

    fn on_relay_established(&mut self, client: RelayEndpoint<TokioTransport>, outbound: TokioTransport) {
        let id = client.id;
        let destination = client.destination;
        let (inbound, outbound) = match (client.transport.into_stream(), outbound.into_stream()) {
            (Ok(inbound), Ok(outbound)) => (inbound, outbound),
            (Err(e), _) | (_, Err(e)) => {
                warn!("{}: relay to {} lost its socket: {}", id, destination, e);
                return;
            }
        };

        tokio::spawn(async move {
            match relay_tcp(inbound, outbound).await {
                Ok(totals) => debug!(
                    "{}: relay to {} finished, {} bytes up, {} bytes down",
                    id, destination, totals.upstream, totals.downstream
                ),
                Err(e) => debug!("{}: relay to {} failed: {:#}", id, destination, e),
            }
        });
    }

    fn on_handshake_failed(&mut self, client: SocketId, reason: FailureReason) {
        debug!("{}: handshake failed: {}", client, reason);
    }
}

/// A SOCKS5 server bound to its listen address
pub struct Socks5Server {
    listener: TcpListener,
    reactor: Reactor,
    coordinator: RelayCoordinator<TokioTransport, SpawnRelays>,
}

impl Socks5Server {
    /// Validate `config` and bind its listen address
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate().map_err(SocksRelayError::Config)?;
        let addr = config.listen_socket_addr().map_err(SocksRelayError::Config)?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind SOCKS5 listener on {}", addr))?;

        let reactor = Reactor::new(SocketOpts::from_tcp_config(&config.tcp));
        let coordinator = RelayCoordinator::new(SpawnRelays {
            reactor: reactor.clone(),
        })
        .with_cancel_timeout(config.cancel_timeout());

        Ok(Socks5Server {
            listener,
            reactor,
            coordinator,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Counters of the underlying coordinator
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(self.coordinator.stats())
    }

    /// Serve clients until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<bool>) -> Result<()> {
        info!("SOCKS5 server listening on {}", self.local_addr()?);

        loop {
            let deadline = self.coordinator.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        let transport = self.reactor.adopt(stream);
                        self.coordinator.accept(transport, Instant::now());
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                events = self.reactor.next_events() => {
                    let now = Instant::now();
                    for (id, event) in events {
                        self.coordinator.handle_event(id, event, now);
                    }
                },
                _ = timer => self.coordinator.handle_timeout(Instant::now()),
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping SOCKS5 server");
                    break;
                }
            }
        }

        let stats = self.coordinator.stats().snapshot();
        info!(
            "SOCKS5 server stopped: {} accepted, {} relays, {} failed handshakes",
            stats.accepted, stats.relays_established, stats.handshakes_failed
        );
        Ok(())
    }
}
