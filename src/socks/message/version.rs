//! Version / method-selection message (client to server)
//!
//! ```text
//! +-----+----------+----------+
//! | VER | NMETHODS | METHODS  |
//! +-----+----------+----------+
//! |  1  |    1     | 1 to 255 |
//! +-----+----------+----------+
//! ```

use super::{require, WireMessage};
use crate::error::{DecodeError, EncodeError};
use crate::socks::consts::*;
use crate::socks::types::AuthMethod;
use bytes::BufMut;

/// The client's greeting listing the authentication methods it offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    methods: Vec<AuthMethod>,
}

impl VersionMessage {
    /// Build a greeting; fails when more than 255 methods are offered
    pub fn new(methods: Vec<AuthMethod>) -> Result<Self, EncodeError> {
        if methods.len() > MAX_AUTH_METHODS {
            return Err(EncodeError::TooManyMethods(methods.len()));
        }
        Ok(VersionMessage { methods })
    }

    /// Greeting offering only "no authentication required"
    pub fn no_auth() -> Self {
        VersionMessage {
            methods: vec![AuthMethod::NoAuthRequired],
        }
    }

    /// Offered methods in wire order
    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }

    /// Whether `method` is among the offered methods
    pub fn offers(&self, method: AuthMethod) -> bool {
        self.methods.contains(&method)
    }
}

impl WireMessage for VersionMessage {
    fn encoded_len(&self) -> usize {
        2 + self.methods.len()
    }

    fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(SOCKS5_VERSION);
        // Length is bounded by the constructor
        buf.put_u8(self.methods.len() as u8);
        for method in &self.methods {
            buf.put_u8(method.to_byte());
        }
    }

    fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError> {
        require(input, 2)?;
        if input[0] != SOCKS5_VERSION {
            return Err(DecodeError::Malformed("unsupported SOCKS version"));
        }

        let total = 2 + input[1] as usize;
        require(input, total)?;

        let methods = input[2..total]
            .iter()
            .copied()
            .map(AuthMethod::from_byte)
            .collect();
        Ok((VersionMessage { methods }, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::message::test_util::assert_fragmented_decode;

    #[test]
    fn test_no_auth_encoding() {
        assert_eq!(&VersionMessage::no_auth().to_bytes()[..], &[0x05, 0x01, 0x00]);
    }

    #[test]
    fn test_too_many_methods() {
        let methods = vec![AuthMethod::Other(0x80); 256];
        assert_eq!(
            VersionMessage::new(methods),
            Err(EncodeError::TooManyMethods(256))
        );
        assert!(VersionMessage::new(vec![AuthMethod::Other(0x80); 255]).is_ok());
    }

    #[test]
    fn test_empty_method_list() {
        let message = VersionMessage::new(vec![]).unwrap();
        let bytes = message.to_bytes();
        assert_eq!(&bytes[..], &[0x05, 0x00]);
        let (decoded, consumed) = VersionMessage::decode(&bytes).unwrap();
        assert!(decoded.methods().is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_decode_offers() {
        let (message, consumed) = VersionMessage::decode(&[0x05, 0x02, 0x02, 0x00]).unwrap();
        assert_eq!(consumed, 4);
        assert!(message.offers(AuthMethod::NoAuthRequired));
        assert!(message.offers(AuthMethod::UsernamePassword));
        assert!(!message.offers(AuthMethod::Gssapi));
    }

    #[test]
    fn test_decode_bad_version() {
        assert_eq!(
            VersionMessage::decode(&[0x04, 0x01, 0x00]),
            Err(DecodeError::Malformed("unsupported SOCKS version"))
        );
    }

    #[test]
    fn test_decode_fragmented() {
        let message = VersionMessage::new(vec![
            AuthMethod::Gssapi,
            AuthMethod::UsernamePassword,
            AuthMethod::NoAuthRequired,
        ])
        .unwrap();
        let decoded: VersionMessage = assert_fragmented_decode(&message.to_bytes());
        assert_eq!(decoded, message);
    }
}
