//! Shared address-message layout
//!
//! ```text
//! +--------+--------+--------+------+----------+----------+
//! | LEAD 0 | LEAD 1 | LEAD 2 | ATYP | ADDR     | PORT     |
//! +--------+--------+--------+------+----------+----------+
//! |   1    |   1    |   1    |  1   | 4 or 16  |    2     |
//! +--------+--------+--------+------+----------+----------+
//! ```
//!
//! Requests, replies and UDP request headers differ only in what the three
//! leading bytes mean.

use super::require;
use crate::error::DecodeError;
use crate::socks::consts::*;
use crate::socks::types::AddressType;
use bytes::BufMut;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Encoded length of an address message carrying `addr`
pub(super) fn encoded_len(addr: &SocketAddr) -> usize {
    let payload = match addr {
        SocketAddr::V4(_) => IPV4_ADDR_LEN,
        SocketAddr::V6(_) => IPV6_ADDR_LEN,
    };
    ADDRESS_MESSAGE_HEADER_LEN + payload + PORT_LEN
}

/// Write the three role bytes followed by ATYP, address and port
pub(super) fn write<B: BufMut>(buf: &mut B, lead: [u8; 3], addr: &SocketAddr) {
    buf.put_slice(&lead);
    buf.put_u8(AddressType::of(addr).to_byte());
    match addr {
        SocketAddr::V4(v4) => buf.put_slice(&v4.ip().octets()),
        SocketAddr::V6(v6) => buf.put_slice(&v6.ip().octets()),
    }
    buf.put_u16(addr.port());
}

/// Decode an address message.
///
/// `parse_lead` validates the three role bytes once the fixed header is
/// available and turns them into the caller's typed fields.
pub(super) fn decode<R>(
    input: &[u8],
    parse_lead: impl FnOnce([u8; 3]) -> Result<R, DecodeError>,
) -> Result<(R, SocketAddr, usize), DecodeError> {
    require(input, ADDRESS_MESSAGE_HEADER_LEN)?;

    let lead = parse_lead([input[0], input[1], input[2]])?;

    let atyp = AddressType::from_byte(input[3])?;
    let payload_len = atyp
        .payload_len()
        .ok_or(DecodeError::Unsupported("domain name address"))?;

    let total = ADDRESS_MESSAGE_HEADER_LEN + payload_len + PORT_LEN;
    require(input, total)?;

    let body = &input[ADDRESS_MESSAGE_HEADER_LEN..total];
    let (ip, port) = body.split_at(payload_len);
    let port = u16::from_be_bytes([port[0], port[1]]);

    let addr = match atyp {
        AddressType::Ipv4 => {
            let octets: [u8; IPV4_ADDR_LEN] = ip
                .try_into()
                .map_err(|_| DecodeError::Malformed("truncated IPv4 address"))?;
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port))
        }
        AddressType::Ipv6 => {
            let octets: [u8; IPV6_ADDR_LEN] = ip
                .try_into()
                .map_err(|_| DecodeError::Malformed("truncated IPv6 address"))?;
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0))
        }
        AddressType::DomainName => return Err(DecodeError::Unsupported("domain name address")),
    };

    Ok((lead, addr, total))
}

/// The all-zero IPv4 address used in failure replies
pub(crate) fn unspecified() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
}
