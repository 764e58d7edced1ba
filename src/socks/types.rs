//! SOCKS5 type definitions
//!
//! Defines the core enums carried inside SOCKS5 wire messages.

use super::consts::*;
use crate::error::DecodeError;
use std::fmt;
use std::net::SocketAddr;

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to target
    TcpConnect,
    /// TCP BIND - wait for incoming connection (not implemented)
    TcpBind,
    /// UDP ASSOCIATE - establish UDP relay
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte into SocksCommand
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::TcpConnect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::TcpBind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// Convert SocksCommand to byte
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::TcpConnect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::TcpBind => SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::TcpConnect => write!(f, "CONNECT"),
            SocksCommand::TcpBind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Authentication method codes
///
/// Any byte is a legal method code on the wire; only `NoAuthRequired`
/// is ever selected by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// No authentication required
    NoAuthRequired,
    /// GSSAPI
    Gssapi,
    /// Username/password
    UsernamePassword,
    /// No acceptable methods (server reply only)
    NoneAcceptable,
    /// IANA-assigned or private method
    Other(u8),
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::NoAuthRequired => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Gssapi => SOCKS5_AUTH_METHOD_GSSAPI,
            AuthMethod::UsernamePassword => SOCKS5_AUTH_METHOD_PASSWORD,
            AuthMethod::NoneAcceptable => SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE,
            AuthMethod::Other(byte) => byte,
        }
    }

    /// Parse from SOCKS5 method byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            SOCKS5_AUTH_METHOD_NONE => AuthMethod::NoAuthRequired,
            SOCKS5_AUTH_METHOD_GSSAPI => AuthMethod::Gssapi,
            SOCKS5_AUTH_METHOD_PASSWORD => AuthMethod::UsernamePassword,
            SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => AuthMethod::NoneAcceptable,
            other => AuthMethod::Other(other),
        }
    }
}

/// The ATYP field of an address message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    /// 4-byte IPv4 address
    Ipv4,
    /// Length-prefixed domain name (recognized, never decoded)
    DomainName,
    /// 16-byte IPv6 address
    Ipv6,
}

impl AddressType {
    /// Parse an ATYP byte
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            SOCKS5_ADDR_TYPE_IPV4 => Ok(AddressType::Ipv4),
            SOCKS5_ADDR_TYPE_DOMAIN => Ok(AddressType::DomainName),
            SOCKS5_ADDR_TYPE_IPV6 => Ok(AddressType::Ipv6),
            other => Err(DecodeError::UnknownAddressType(other)),
        }
    }

    /// Convert to ATYP byte
    pub fn to_byte(self) -> u8 {
        match self {
            AddressType::Ipv4 => SOCKS5_ADDR_TYPE_IPV4,
            AddressType::DomainName => SOCKS5_ADDR_TYPE_DOMAIN,
            AddressType::Ipv6 => SOCKS5_ADDR_TYPE_IPV6,
        }
    }

    /// Address type used to carry `addr`
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressType::Ipv4,
            SocketAddr::V6(_) => AddressType::Ipv6,
        }
    }

    /// Length of the address payload, `None` when it is not fixed
    pub fn payload_len(self) -> Option<usize> {
        match self {
            AddressType::Ipv4 => Some(IPV4_ADDR_LEN),
            AddressType::Ipv6 => Some(IPV6_ADDR_LEN),
            AddressType::DomainName => None,
        }
    }
}
