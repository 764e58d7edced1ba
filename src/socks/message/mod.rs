//! SOCKS5 wire messages
//!
//! Typed encode/decode of the five RFC 1928 messages. Every decoder is an
//! explicit, length-checked field-by-field parser; the three messages that
//! end in an address share one routine in [`address`].
//!
//! Decoders validate in a fixed order:
//!
//! 1. enough bytes for the fixed header, else [`DecodeError::NeedMoreBytes`]
//! 2. version and reserved fields
//! 3. address type
//! 4. enough bytes for the variable-length body, else `NeedMoreBytes`
//!
//! `NeedMoreBytes(n)` always counts the bytes missing up to the next point
//! where the decoder can decide something, so it never exceeds what is
//! actually left of the message.

mod address;
mod method;
mod reply;
mod request;
mod udp;
mod version;

pub(crate) use address::unspecified;
pub use method::MethodSelectMessage;
pub use reply::ReplyMessage;
pub use request::RequestMessage;
pub use udp::UdpRequestHeader;
pub use version::VersionMessage;

use crate::error::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A SOCKS5 wire message
pub trait WireMessage: Sized {
    /// Number of bytes [`WireMessage::write_to_buf`] produces
    fn encoded_len(&self) -> usize;

    /// Serialize the message into `buf`
    fn write_to_buf<B: BufMut>(&self, buf: &mut B);

    /// Parse a message from the front of `input`.
    ///
    /// Returns the message and the number of bytes it occupied.
    fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError>;

    /// Serialize into a fresh, immutable buffer
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to_buf(&mut buf);
        buf.freeze()
    }

    /// Parse a message and remove exactly its bytes from `input`.
    ///
    /// `input` is left untouched on any error.
    fn decode_and_consume(input: &mut BytesMut) -> Result<(Self, usize), DecodeError> {
        let (message, consumed) = Self::decode(input)?;
        input.advance(consumed);
        Ok((message, consumed))
    }
}

/// `Ok` when `input` holds at least `want` bytes
fn require(input: &[u8], want: usize) -> Result<(), DecodeError> {
    if input.len() < want {
        Err(DecodeError::NeedMoreBytes(want - input.len()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Feed `encoded` to `M::decode` one byte at a time and check the
    /// `NeedMoreBytes` hints along the way.
    pub(crate) fn assert_fragmented_decode<M>(encoded: &[u8]) -> M
    where
        M: WireMessage + std::fmt::Debug,
    {
        let mut last_known_total = 0;
        for have in 0..encoded.len() {
            match M::decode(&encoded[..have]) {
                Err(DecodeError::NeedMoreBytes(n)) => {
                    assert!(n > 0);
                    assert!(
                        have + n <= encoded.len(),
                        "claimed {} more bytes after {} of {}",
                        n,
                        have,
                        encoded.len()
                    );
                    assert!(have + n >= last_known_total);
                    last_known_total = have + n;
                }
                other => panic!("prefix of {} bytes decoded to {:?}", have, other),
            }
        }
        let (message, consumed) = M::decode(encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        message
    }
}
