//! Server configuration types
//!
//! Defines the configuration of the SOCKS5 relay server.

use super::TcpConfig;
use crate::socks::consts::DEFAULT_CANCEL_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Longest delay RFC 1928 allows between a failure and closing the socket
pub const MAX_CANCEL_TIMEOUT_SECS: u64 = 10;

/// Default cancel timeout in seconds
fn default_cancel_timeout_secs() -> u64 {
    DEFAULT_CANCEL_TIMEOUT_SECS
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
}

/// SOCKS5 relay server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to accept SOCKS5 clients on (e.g., "127.0.0.1:1080")
    pub listen_addr: String,

    /// Seconds a failed client socket may linger before it is closed
    #[serde(default = "default_cancel_timeout_secs")]
    pub cancel_timeout_secs: u64,

    /// Socket options for accepted and outbound sockets
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl ServerConfig {
    /// Config listening on `listen_addr` with defaults elsewhere
    pub fn new(listen_addr: impl Into<String>) -> Self {
        ServerConfig {
            listen_addr: listen_addr.into(),
            cancel_timeout_secs: default_cancel_timeout_secs(),
            tcp: TcpConfig::default(),
        }
    }

    /// The parsed listen address
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, String> {
        self.listen_addr
            .parse()
            .map_err(|e| format!("Invalid listen_addr {:?}: {}", self.listen_addr, e))
    }

    /// The cancel timeout as a duration
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.listen_socket_addr()?;
        if self.cancel_timeout_secs == 0 || self.cancel_timeout_secs > MAX_CANCEL_TIMEOUT_SECS {
            return Err(format!(
                "cancel_timeout_secs must be between 1 and {}, got {}",
                MAX_CANCEL_TIMEOUT_SECS, self.cancel_timeout_secs
            ));
        }
        Ok(())
    }
}
