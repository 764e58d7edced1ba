//! Plain byte relay between a client and its outbound connection
//!
//! Once a handshake completes, neither side carries SOCKS5 framing any
//! more and the pair is simply spliced together.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bytes moved by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTotals {
    /// Client to destination
    pub upstream: u64,
    /// Destination to client
    pub downstream: u64,
}

/// Copy bytes both ways until either direction hits EOF or an error.
///
/// When one direction ends, the write half of the other side is shut
/// down and the remaining direction is abandoned.
pub async fn relay_tcp<A, B>(client: A, outbound: B) -> Result<RelayTotals>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut outbound_read, mut outbound_write) = tokio::io::split(outbound);
    let mut totals = RelayTotals::default();

    tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut outbound_write) => {
            match result {
                Ok(bytes) => {
                    debug!("client closed after {} bytes upstream", bytes);
                    totals.upstream = bytes;
                }
                Err(e) => debug!("upstream copy error: {}", e),
            }
            let _ = outbound_write.shutdown().await;
        }
        result = tokio::io::copy(&mut outbound_read, &mut client_write) => {
            match result {
                Ok(bytes) => {
                    debug!("destination closed after {} bytes downstream", bytes);
                    totals.downstream = bytes;
                }
                Err(e) => debug!("downstream copy error: {}", e),
            }
            let _ = client_write.shutdown().await;
        }
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_relay_tcp_bidirectional() {
        let (mut client, client_side) = duplex(1024);
        let (mut target, target_side) = duplex(1024);

        let relay = tokio::spawn(async move { relay_tcp(client_side, target_side).await });

        client.write_all(b"message A->B").await.unwrap();
        let mut buf = [0u8; 12];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"message A->B");

        target.write_all(b"message B->A").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"message B->A");

        drop(client);
        let totals = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(totals.upstream, 12);
    }

    #[tokio::test]
    async fn test_relay_tcp_large_data() {
        let (mut client, client_side) = duplex(65536);
        let (mut target, target_side) = duplex(65536);

        let relay = tokio::spawn(async move { relay_tcp(client_side, target_side).await });

        let payload = vec![0xAB; 50_000];
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client
        });

        let mut received = vec![0u8; 50_000];
        target.read_exact(&mut received).await.unwrap();
        assert!(received.iter().all(|&b| b == 0xAB));

        drop(writer.await.unwrap());
        let _ = tokio::time::timeout(Duration::from_secs(1), relay).await;
    }

    #[tokio::test]
    async fn test_relay_tcp_scripted_client() {
        let client = tokio_test::io::Builder::new().read(b"ping").build();
        let (mut target, target_side) = duplex(1024);

        let totals = tokio::time::timeout(Duration::from_secs(1), relay_tcp(client, target_side))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(totals, RelayTotals { upstream: 4, downstream: 0 });

        let mut buf = Vec::new();
        target.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ping");
    }

    #[tokio::test]
    async fn test_relay_tcp_half_close_propagates() {
        let (client, client_side) = duplex(1024);
        let (mut target, target_side) = duplex(1024);

        let relay = tokio::spawn(async move { relay_tcp(client_side, target_side).await });

        drop(client);
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(1), target.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        let result = tokio::time::timeout(Duration::from_secs(1), relay).await;
        assert!(result.is_ok());
    }
}
