//! Request message (client to server), `05 cmd 00 atyp addr port`

use super::{address, WireMessage};
use crate::error::DecodeError;
use crate::socks::consts::*;
use crate::socks::types::SocksCommand;
use bytes::BufMut;
use std::net::SocketAddr;

/// A SOCKS5 command request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMessage {
    /// Requested command
    pub command: SocksCommand,
    /// Destination of the command
    pub destination: SocketAddr,
}

impl RequestMessage {
    /// Build a request
    pub fn new(command: SocksCommand, destination: SocketAddr) -> Self {
        RequestMessage {
            command,
            destination,
        }
    }
}

impl WireMessage for RequestMessage {
    fn encoded_len(&self) -> usize {
        address::encoded_len(&self.destination)
    }

    fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        address::write(
            buf,
            [SOCKS5_VERSION, self.command.to_byte(), SOCKS5_RESERVED],
            &self.destination,
        );
    }

    fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (command, destination, consumed) = address::decode(input, |[ver, cmd, rsv]| {
            if ver != SOCKS5_VERSION {
                return Err(DecodeError::Malformed("unsupported SOCKS version"));
            }
            if rsv != SOCKS5_RESERVED {
                return Err(DecodeError::Malformed("non-zero reserved field"));
            }
            SocksCommand::from_byte(cmd).ok_or(DecodeError::UnknownCommand(cmd))
        })?;
        Ok((RequestMessage::new(command, destination), consumed))
    }
}
