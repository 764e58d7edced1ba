//! Error types for Socksrelay
//!
//! This module defines the error taxonomy shared by the codecs, the
//! negotiators and the runtime adapter.

use std::io;
use thiserror::Error;

/// Main error type for the runtime and the binary
#[derive(Error, Debug)]
pub enum SocksRelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SOCKS5 negotiation failed
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] FailureReason),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Outcome of a failed decode.
///
/// `NeedMoreBytes` is not an error as such: it tells the caller how many
/// additional bytes the decoder needs before it can make progress.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ends before the message does
    #[error("need {0} more bytes")]
    NeedMoreBytes(usize),

    /// Bad version or reserved field
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// Command byte outside the RFC 1928 set
    #[error("unknown command: {0:#04x}")]
    UnknownCommand(u8),

    /// ATYP byte outside the RFC 1928 set
    #[error("unknown address type: {0:#04x}")]
    UnknownAddressType(u8),

    /// Recognized wire feature that is not implemented
    #[error("not implemented: {0}")]
    Unsupported(&'static str),
}

impl DecodeError {
    /// Whether the input is structurally invalid (always fatal to a handshake)
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            DecodeError::Malformed(_)
                | DecodeError::UnknownCommand(_)
                | DecodeError::UnknownAddressType(_)
        )
    }
}

/// A message field was out of its legal range at construction time
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// More than 255 authentication methods
    #[error("too many authentication methods: {0}")]
    TooManyMethods(usize),
}

/// Refusal to queue control bytes on a handshake driver
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The handshake already completed
    #[error("handshake already complete")]
    HandshakeComplete,

    /// A previous control message has not fully drained
    #[error("previous control message still pending")]
    Busy,
}

/// Why a logical connection failed.
///
/// This is the only failure vocabulary owners of a negotiator ever see;
/// raw reply codes are mapped onto it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The peer closed the transport
    #[error("closed by peer")]
    ClosedByPeer,

    /// Connection refused
    #[error("connection refused")]
    ConnectionRefused,

    /// Host unreachable
    #[error("host unreachable")]
    HostUnreachable,

    /// Network unreachable
    #[error("network unreachable")]
    NetworkUnreachable,

    /// Connection not allowed by ruleset
    #[error("connection not allowed by ruleset")]
    ConnectionNotAllowed,

    /// TTL expired
    #[error("TTL expired")]
    TtlExpired,

    /// Command not supported
    #[error("command not supported")]
    CommandNotSupported,

    /// Address type not supported
    #[error("address type not supported")]
    AddressTypeNotSupported,

    /// General SOCKS server failure
    #[error("general SOCKS server failure")]
    GeneralFailure,

    /// No acceptable authentication method
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    /// The peer violated the protocol
    #[error("protocol error")]
    ProtocolError,

    /// The operation timed out
    #[error("timed out")]
    TimedOut,

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Transport(io::ErrorKind),
}

impl FailureReason {
    /// Map a transport error kind onto a failure reason
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => FailureReason::ConnectionRefused,
            io::ErrorKind::TimedOut => FailureReason::TimedOut,
            io::ErrorKind::AddrNotAvailable => FailureReason::HostUnreachable,
            io::ErrorKind::PermissionDenied => FailureReason::ConnectionNotAllowed,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => FailureReason::ClosedByPeer,
            kind => FailureReason::Transport(kind),
        }
    }
}

impl From<&io::Error> for FailureReason {
    fn from(err: &io::Error) -> Self {
        FailureReason::from_io_kind(err.kind())
    }
}

impl From<DecodeError> for FailureReason {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownCommand(_) => FailureReason::CommandNotSupported,
            DecodeError::UnknownAddressType(_) | DecodeError::Unsupported(_) => {
                FailureReason::AddressTypeNotSupported
            }
            DecodeError::NeedMoreBytes(_) | DecodeError::Malformed(_) => {
                FailureReason::ProtocolError
            }
        }
    }
}

impl From<QueueError> for FailureReason {
    fn from(_: QueueError) -> Self {
        FailureReason::GeneralFailure
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl Socks5ReplyCode {
    /// The failure a client reports for this reply, `None` for success
    pub fn failure_reason(self) -> Option<FailureReason> {
        match self {
            Socks5ReplyCode::Succeeded => None,
            Socks5ReplyCode::GeneralFailure => Some(FailureReason::GeneralFailure),
            Socks5ReplyCode::ConnectionNotAllowed => Some(FailureReason::ConnectionNotAllowed),
            Socks5ReplyCode::NetworkUnreachable => Some(FailureReason::NetworkUnreachable),
            Socks5ReplyCode::HostUnreachable => Some(FailureReason::HostUnreachable),
            Socks5ReplyCode::ConnectionRefused => Some(FailureReason::ConnectionRefused),
            Socks5ReplyCode::TtlExpired => Some(FailureReason::TtlExpired),
            Socks5ReplyCode::CommandNotSupported => Some(FailureReason::CommandNotSupported),
            Socks5ReplyCode::AddressTypeNotSupported => {
                Some(FailureReason::AddressTypeNotSupported)
            }
        }
    }

    /// Whether this is the success code
    pub fn is_success(self) -> bool {
        self == Socks5ReplyCode::Succeeded
    }
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            _ => Err(DecodeError::Malformed("unknown reply code")),
        }
    }
}

impl From<&io::Error> for Socks5ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => Socks5ReplyCode::ConnectionNotAllowed,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

impl From<FailureReason> for Socks5ReplyCode {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            FailureReason::HostUnreachable | FailureReason::TimedOut => {
                Socks5ReplyCode::HostUnreachable
            }
            FailureReason::NetworkUnreachable => Socks5ReplyCode::NetworkUnreachable,
            FailureReason::ConnectionNotAllowed => Socks5ReplyCode::ConnectionNotAllowed,
            FailureReason::TtlExpired => Socks5ReplyCode::TtlExpired,
            FailureReason::CommandNotSupported => Socks5ReplyCode::CommandNotSupported,
            FailureReason::AddressTypeNotSupported => Socks5ReplyCode::AddressTypeNotSupported,
            FailureReason::ClosedByPeer
            | FailureReason::GeneralFailure
            | FailureReason::NoAcceptableMethod
            | FailureReason::ProtocolError
            | FailureReason::Transport(_) => Socks5ReplyCode::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_reply_code_from_u8_valid() {
        for value in 0x00..=0x08u8 {
            let code = Socks5ReplyCode::try_from(value).unwrap();
            assert_eq!(u8::from(code), value);
        }
    }

    #[test]
    fn test_socks5_reply_code_from_u8_invalid() {
        assert!(Socks5ReplyCode::try_from(0xFF).is_err());
        assert!(Socks5ReplyCode::try_from(0x09).is_err());
        assert!(Socks5ReplyCode::try_from(100).is_err());
    }

    #[test]
    fn test_socks5_reply_code_from_io_error() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            Socks5ReplyCode::from(&err),
            Socks5ReplyCode::ConnectionRefused
        );

        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(
            Socks5ReplyCode::from(&err),
            Socks5ReplyCode::HostUnreachable
        );

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        assert_eq!(
            Socks5ReplyCode::from(&err),
            Socks5ReplyCode::ConnectionNotAllowed
        );

        let err = io::Error::new(io::ErrorKind::Other, "other");
        assert_eq!(Socks5ReplyCode::from(&err), Socks5ReplyCode::GeneralFailure);
    }

    #[test]
    fn test_reply_code_failure_reason_round_trip() {
        assert_eq!(Socks5ReplyCode::Succeeded.failure_reason(), None);
        for value in 0x01..=0x08u8 {
            let code = Socks5ReplyCode::try_from(value).unwrap();
            let reason = code.failure_reason().unwrap();
            assert_eq!(Socks5ReplyCode::from(reason), code);
        }
    }

    #[test]
    fn test_failure_reason_from_io_kind() {
        assert_eq!(
            FailureReason::from_io_kind(io::ErrorKind::ConnectionRefused),
            FailureReason::ConnectionRefused
        );
        assert_eq!(
            FailureReason::from_io_kind(io::ErrorKind::ConnectionReset),
            FailureReason::ClosedByPeer
        );
        assert_eq!(
            FailureReason::from_io_kind(io::ErrorKind::NotFound),
            FailureReason::Transport(io::ErrorKind::NotFound)
        );
    }

    #[test]
    fn test_failure_reason_from_decode_error() {
        assert_eq!(
            FailureReason::from(DecodeError::Unsupported("domain name")),
            FailureReason::AddressTypeNotSupported
        );
        assert_eq!(
            FailureReason::from(DecodeError::Malformed("bad version")),
            FailureReason::ProtocolError
        );
        assert_eq!(
            FailureReason::from(DecodeError::UnknownCommand(9)),
            FailureReason::CommandNotSupported
        );
        assert_eq!(
            FailureReason::from(DecodeError::UnknownAddressType(2)),
            FailureReason::AddressTypeNotSupported
        );
    }

    #[test]
    fn test_decode_error_is_malformed() {
        assert!(DecodeError::Malformed("x").is_malformed());
        assert!(DecodeError::UnknownCommand(9).is_malformed());
        assert!(DecodeError::UnknownAddressType(2).is_malformed());
        assert!(!DecodeError::NeedMoreBytes(1).is_malformed());
        assert!(!DecodeError::Unsupported("domain name address").is_malformed());
    }

    #[test]
    fn test_socks_relay_error_display() {
        let err = SocksRelayError::Config("invalid config".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid config");

        let err = SocksRelayError::Timeout("timeout".to_string());
        assert_eq!(format!("{}", err), "Timeout: timeout");

        let err: SocksRelayError = FailureReason::ConnectionRefused.into();
        assert_eq!(format!("{}", err), "SOCKS5 error: connection refused");
    }

    #[test]
    fn test_socks_relay_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: SocksRelayError = io_err.into();
        assert!(matches!(err, SocksRelayError::Io(_)));
    }

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            format!("{}", DecodeError::NeedMoreBytes(3)),
            "need 3 more bytes"
        );
        assert_eq!(
            format!("{}", DecodeError::Malformed("bad version")),
            "malformed message: bad version"
        );
        assert_eq!(
            format!("{}", DecodeError::Unsupported("domain name address")),
            "not implemented: domain name address"
        );
        assert_eq!(
            format!("{}", DecodeError::UnknownCommand(9)),
            "unknown command: 0x09"
        );
    }
}
