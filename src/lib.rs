//! # Socksrelay - SOCKS5 protocol engine
//!
//! Socksrelay implements the RFC 1928 handshake as a sans-IO state
//! machine, plus a tokio adapter that turns it into a working proxy
//! server and client.
//!
//! ## Features
//!
//! - **Wire codecs**: every SOCKS5 message, decoded incrementally
//! - **Client negotiator**: `CONNECT` and `UDP ASSOCIATE` through a proxy
//! - **Server negotiator**: no-auth `CONNECT` with RFC-mandated cancel timers
//! - **Relay coordinator**: pairs accepted clients with outbound sockets
//! - **Tokio runtime**: listener, reactor and bidirectional relay
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksrelay::config::ServerConfig;
//! use socksrelay::runtime::Socks5Server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Socks5Server::bind(&ServerConfig::new("127.0.0.1:1080")).await?;
//!     let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     server.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> ServerNegotiator -> RelayCoordinator -> outbound socket -> Target
//! ```
//!
//! Everything under [`socks`] is free of I/O: embedders own the sockets,
//! report readiness as [`socks::TransportEvent`]s and pass the current
//! time in explicitly. [`runtime`] is one such embedder.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod runtime;
pub mod socks;

// Re-export commonly used items
pub use config::{load_config, Config, ServerConfig};
pub use error::{DecodeError, FailureReason, Socks5ReplyCode, SocksRelayError};
pub use runtime::{connect_via_proxy, Socks5Datagram, Socks5Server};

/// Version of the Socksrelay library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
