//! UDP request header
//!
//! ```text
//! +-----+------+------+----------+----------+----------+
//! | RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +-----+------+------+----------+----------+----------+
//! |  2  |  1   |  1   | Variable |    2     | Variable |
//! +-----+------+------+----------+----------+----------+
//! ```
//!
//! Only the header is a message; the payload is whatever follows it.

use super::{address, WireMessage};
use crate::error::DecodeError;
use crate::socks::consts::SOCKS5_RESERVED;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// Header prefixed to every datagram on a UDP association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpRequestHeader {
    /// Fragment number, 0 for standalone datagrams
    pub fragment: u8,
    /// Destination (outbound) or source (inbound) of the payload
    pub address: SocketAddr,
}

impl UdpRequestHeader {
    /// Header for an unfragmented datagram
    pub fn new(address: SocketAddr) -> Self {
        UdpRequestHeader {
            fragment: 0,
            address,
        }
    }

    /// Whether the datagram is part of a fragment sequence
    pub fn is_fragmented(&self) -> bool {
        self.fragment != 0
    }

    /// Header followed by `payload` in one buffer
    pub fn encapsulate(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len() + payload.len());
        self.write_to_buf(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Split a datagram into its header and payload
    pub fn strip(datagram: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (header, consumed) = UdpRequestHeader::decode(datagram)?;
        Ok((header, &datagram[consumed..]))
    }
}

impl WireMessage for UdpRequestHeader {
    fn encoded_len(&self) -> usize {
        address::encoded_len(&self.address)
    }

    fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        address::write(
            buf,
            [SOCKS5_RESERVED, SOCKS5_RESERVED, self.fragment],
            &self.address,
        );
    }

    fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (fragment, address, consumed) = address::decode(input, |[rsv0, rsv1, frag]| {
            if rsv0 != SOCKS5_RESERVED || rsv1 != SOCKS5_RESERVED {
                return Err(DecodeError::Malformed("non-zero reserved field"));
            }
            Ok(frag)
        })?;
        Ok((UdpRequestHeader { fragment, address }, consumed))
    }
}
