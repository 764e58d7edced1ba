//! Reply message (server to client), `05 rep 00 atyp addr port`

use super::{address, WireMessage};
use crate::error::{DecodeError, Socks5ReplyCode};
use crate::socks::consts::*;
use bytes::BufMut;
use std::net::SocketAddr;

/// The server's answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMessage {
    /// Reply code
    pub reply: Socks5ReplyCode,
    /// Address the server bound for the command
    pub bound: SocketAddr,
}

impl ReplyMessage {
    /// Build a reply
    pub fn new(reply: Socks5ReplyCode, bound: SocketAddr) -> Self {
        ReplyMessage { reply, bound }
    }

    /// Success reply carrying `bound`
    pub fn success(bound: SocketAddr) -> Self {
        ReplyMessage::new(Socks5ReplyCode::Succeeded, bound)
    }

    /// Failure reply with the all-zero IPv4 address
    pub fn failure(reply: Socks5ReplyCode) -> Self {
        ReplyMessage::new(reply, address::unspecified())
    }
}

impl WireMessage for ReplyMessage {
    fn encoded_len(&self) -> usize {
        address::encoded_len(&self.bound)
    }

    fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        address::write(
            buf,
            [SOCKS5_VERSION, self.reply.into(), SOCKS5_RESERVED],
            &self.bound,
        );
    }

    fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (reply, bound, consumed) = address::decode(input, |[ver, rep, rsv]| {
            if ver != SOCKS5_VERSION {
                return Err(DecodeError::Malformed("unsupported SOCKS version"));
            }
            if rsv != SOCKS5_RESERVED {
                return Err(DecodeError::Malformed("non-zero reserved field"));
            }
            Socks5ReplyCode::try_from(rep)
        })?;
        Ok((ReplyMessage::new(reply, bound), consumed))
    }
}
