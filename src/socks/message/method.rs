//! Method-selection reply (server to client)

use super::{require, WireMessage};
use crate::error::DecodeError;
use crate::socks::consts::SOCKS5_VERSION;
use crate::socks::types::AuthMethod;
use bytes::BufMut;

/// The server's chosen authentication method, `05 method`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelectMessage {
    /// Selected method; `NoneAcceptable` rejects every offered method
    pub method: AuthMethod,
}

impl MethodSelectMessage {
    /// Select `method`
    pub fn new(method: AuthMethod) -> Self {
        MethodSelectMessage { method }
    }

    /// Reply rejecting every offered method
    pub fn none_acceptable() -> Self {
        MethodSelectMessage::new(AuthMethod::NoneAcceptable)
    }

    /// Whether the server chose "no authentication required"
    pub fn is_no_auth(&self) -> bool {
        self.method == AuthMethod::NoAuthRequired
    }
}

impl WireMessage for MethodSelectMessage {
    fn encoded_len(&self) -> usize {
        2
    }

    fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.method.to_byte());
    }

    fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError> {
        require(input, 2)?;
        if input[0] != SOCKS5_VERSION {
            return Err(DecodeError::Malformed("unsupported SOCKS version"));
        }
        Ok((MethodSelectMessage::new(AuthMethod::from_byte(input[1])), 2))
    }
}
