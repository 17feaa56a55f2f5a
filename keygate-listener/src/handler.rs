//! Post-activation connection handling.
//!
//! The protocol spoken once the server is operational is wired in through
//! [`ConnectionHandler`]; the listener itself only owns accepting, TLS, and
//! activation gating.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// Per-connection protocol handler, invoked after the TLS handshake on an
/// operational (post-activation) server.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(&self, stream: TlsStream<TcpStream>, peer: SocketAddr) -> anyhow::Result<()>;
}

/// Minimal liveness handler: answers `PING` with `PONG` and closes.
pub struct PingHandler;

#[async_trait]
impl ConnectionHandler for PingHandler {
    async fn handle(&self, stream: TlsStream<TcpStream>, _peer: SocketAddr) -> anyhow::Result<()> {
        let (read, mut write) = tokio::io::split(stream);
        let mut line = String::new();
        BufReader::new(read.take(128)).read_line(&mut line).await?;
        if line.trim_end() == "PING" {
            write.write_all(b"PONG\n").await?;
        }
        write.shutdown().await?;
        Ok(())
    }
}
