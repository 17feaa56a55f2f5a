use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Per-server connection counters, exposed on the metrics address.
pub(crate) struct ServerMetrics {
    registry: Registry,
    pub connections_accepted: IntCounter,
    pub tls_handshake_failures: IntCounter,
    pub activation_attempts: IntCounter,
    pub activation_grants: IntCounter,
}

impl ServerMetrics {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let connections_accepted = IntCounter::new(
            "keygate_connections_accepted_total",
            "TCP connections accepted by the listener",
        )?;
        let tls_handshake_failures = IntCounter::new(
            "keygate_tls_handshake_failures_total",
            "Accepted connections that failed the TLS handshake",
        )?;
        let activation_attempts = IntCounter::new(
            "keygate_activation_attempts_total",
            "Connections served in activation mode",
        )?;
        let activation_grants = IntCounter::new(
            "keygate_activation_grants_total",
            "Activation requests that presented the correct secret",
        )?;

        registry.register(Box::new(connections_accepted.clone()))?;
        registry.register(Box::new(tls_handshake_failures.clone()))?;
        registry.register(Box::new(activation_attempts.clone()))?;
        registry.register(Box::new(activation_grants.clone()))?;

        Ok(Self {
            registry,
            connections_accepted,
            tls_handshake_failures,
            activation_attempts,
            activation_grants,
        })
    }

    /// Render prometheus text exposition format.
    pub(crate) fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or(());
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Serve the metrics endpoint: a plain-text scrape target, one response per
/// connection.
pub(crate) async fn serve(
    addr: SocketAddr,
    metrics: std::sync::Arc<ServerMetrics>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "metrics endpoint started");
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let metrics = metrics.clone();
        tokio::spawn(async move {
            // Drain the request head; the path is irrelevant, every request
            // gets the full exposition.
            let mut head = [0u8; 1024];
            let _ = stream.read(&mut head).await;

            let body = metrics.render();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                debug!(peer = %peer, error = %e, "metrics response failed");
            }
            let _ = stream.shutdown().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_counter_names() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.connections_accepted.inc();
        let output = metrics.render();
        assert!(output.contains("keygate_connections_accepted_total"));
        assert!(output.contains("keygate_tls_handshake_failures_total"));
    }

    #[test]
    fn counters_start_at_zero() {
        let metrics = ServerMetrics::new().unwrap();
        assert_eq!(metrics.activation_attempts.get(), 0);
        assert_eq!(metrics.activation_grants.get(), 0);
    }
}
