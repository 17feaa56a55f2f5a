//! The key server listener.
//!
//! Owns the accept loop, the TLS configuration, and the activation gate.
//! Trust material is held behind an atomically swapped resolver so the
//! bootstrap task can install the enrolled certificate while connections
//! are being accepted; each handshake sees a consistent snapshot.

use crate::handler::{ConnectionHandler, PingHandler};
use crate::identity;
use crate::metrics::{self, ServerMetrics};
use crate::secret::{ActivationSecret, ActivationState};
use anyhow::Context;
use arc_swap::ArcSwapOption;
use rustls::crypto::ring;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

/// Server certificate resolver over an atomically swapped identity.
///
/// Holding no identity is valid: the listener binds and accepts, but every
/// handshake fails until one is installed.
struct SwapResolver {
    identity: ArcSwapOption<CertifiedKey>,
}

impl fmt::Debug for SwapResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SwapResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.identity.load_full()
    }
}

/// TLS listener with activation gating and hot-swappable certificates.
pub struct KeyServer {
    listen_addr: SocketAddr,
    metrics_addr: SocketAddr,
    resolver: Arc<SwapResolver>,
    tls_config: Arc<rustls::ServerConfig>,
    activation: ActivationSecret,
    handler: Box<dyn ConnectionHandler>,
    metrics: Arc<ServerMetrics>,
    local_addr: OnceLock<SocketAddr>,
}

impl fmt::Debug for KeyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyServer")
            .field("listen_addr", &self.listen_addr)
            .field("metrics_addr", &self.metrics_addr)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl KeyServer {
    /// Build a server from certificate files on disk.
    ///
    /// A missing cert/key pair yields an empty initial identity so the
    /// listener can bind before any certificate exists. A present `ca_path`
    /// enables client-certificate verification against that bundle.
    pub fn from_files(
        cert_path: &Path,
        key_path: &Path,
        ca_path: &Path,
        listen_addr: &str,
        metrics_addr: &str,
    ) -> anyhow::Result<Self> {
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {listen_addr}"))?;
        let metrics_addr: SocketAddr = metrics_addr
            .parse()
            .with_context(|| format!("invalid metrics address {metrics_addr}"))?;

        let initial = identity::maybe_load(cert_path, key_path)
            .context("failed to load initial identity")?;
        if initial.is_none() {
            info!("no initial identity on disk, listener will start without a certificate");
        }
        let resolver = Arc::new(SwapResolver {
            identity: ArcSwapOption::from(initial),
        });

        let provider = Arc::new(ring::default_provider());
        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .context("unsupported protocol versions")?;
        let tls_config = if ca_path.exists() {
            let mut roots = rustls::RootCertStore::empty();
            for cert in identity::load_cert_chain(ca_path)? {
                roots.add(cert).context("invalid CA certificate")?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .context("failed to build client verifier")?;
            builder
                .with_client_cert_verifier(verifier)
                .with_cert_resolver(resolver.clone())
        } else {
            warn!(
                path = %ca_path.display(),
                "client CA bundle not found, client certificates will not be required"
            );
            builder
                .with_no_client_auth()
                .with_cert_resolver(resolver.clone())
        };

        Ok(Self {
            listen_addr,
            metrics_addr,
            resolver,
            tls_config: Arc::new(tls_config),
            activation: ActivationSecret::new(),
            handler: Box::new(PingHandler),
            metrics: Arc::new(ServerMetrics::new()?),
            local_addr: OnceLock::new(),
        })
    }

    /// Replace the default connection handler. Call before the accept loop
    /// starts.
    pub fn with_handler(mut self, handler: Box<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Install the activation secret. Must happen before the accept loop
    /// starts so no connection is served without a gate.
    pub fn set_activation_secret(&self, secret: &[u8]) {
        self.activation.set(secret);
    }

    /// Permanently disable activation-mode authentication.
    pub fn clear_activation_secret(&self) {
        self.activation.disable();
    }

    /// Atomically install the active certificate set.
    ///
    /// The server serves exactly one identity; an empty slice uninstalls it.
    pub fn replace_certificates(&self, identities: Vec<Arc<CertifiedKey>>) {
        if identities.len() > 1 {
            warn!(
                count = identities.len(),
                "multiple identities supplied, installing the first"
            );
        }
        self.resolver.identity.store(identities.into_iter().next());
    }

    /// Accept loop. Blocks for the life of the process; any returned error
    /// is fatal to the listener.
    pub async fn listen_and_serve(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.listen_addr))?;
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(addr = %local, "listener started");

        let metrics = self.metrics.clone();
        let metrics_addr = self.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(metrics_addr, metrics).await {
                warn!(error = %e, "metrics endpoint failed");
            }
        });

        let acceptor = TlsAcceptor::from(self.tls_config.clone());
        loop {
            let (tcp, peer) = listener.accept().await.context("accept failed")?;
            self.metrics.connections_accepted.inc();

            let acceptor = acceptor.clone();
            let server = self.clone();
            tokio::spawn(async move {
                match acceptor.accept(tcp).await {
                    Ok(stream) => {
                        if let Err(e) = server.serve_connection(stream, peer).await {
                            debug!(peer = %peer, error = %e, "connection failed");
                        }
                    }
                    Err(e) => {
                        server.metrics.tls_handshake_failures.inc();
                        debug!(peer = %peer, error = %e, "TLS handshake failed");
                    }
                }
            });
        }
    }

    async fn serve_connection(
        &self,
        stream: TlsStream<TcpStream>,
        peer: SocketAddr,
    ) -> anyhow::Result<()> {
        match &*self.activation.load() {
            ActivationState::Pending(secret) => self.serve_activation(stream, peer, secret).await,
            ActivationState::Disabled => self.handler.handle(stream, peer).await,
            ActivationState::Unset => {
                debug!(peer = %peer, "connection refused before activation secret installed");
                Ok(())
            }
        }
    }

    /// The restricted exchange spoken while activation is pending: one line
    /// bearing the secret, answered `OK` on a constant-time match.
    async fn serve_activation(
        &self,
        stream: TlsStream<TcpStream>,
        peer: SocketAddr,
        secret: &[u8],
    ) -> anyhow::Result<()> {
        self.metrics.activation_attempts.inc();

        let (read, mut write) = tokio::io::split(stream);
        let mut line = String::new();
        BufReader::new(read.take(1024)).read_line(&mut line).await?;
        let presented = line.trim_end_matches(['\r', '\n']).as_bytes();

        if bool::from(presented.ct_eq(secret)) {
            self.metrics.activation_grants.inc();
            write.write_all(b"OK\n").await?;
        } else {
            debug!(peer = %peer, "activation request with invalid secret");
        }
        write.shutdown().await?;
        Ok(())
    }

    /// Address the listener actually bound, available once the accept loop
    /// has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn activation_pending(&self) -> bool {
        self.activation.is_pending()
    }

    pub fn activation_disabled(&self) -> bool {
        self.activation.is_disabled()
    }

    /// Snapshot of the currently installed identity.
    pub fn current_identity(&self) -> Option<Arc<CertifiedKey>> {
        self.resolver.identity.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};
    use std::fs;
    use tempfile::tempdir;

    fn write_self_signed(dir: &Path, host: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let cert_path = dir.join(format!("{host}-cert.pem"));
        let key_path = dir.join(format!("{host}-key.pem"));
        let key_pair = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec![host.to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    fn server_without_files() -> KeyServer {
        let dir = tempdir().unwrap();
        KeyServer::from_files(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
            &dir.path().join("ca.pem"),
            "127.0.0.1:0",
            "127.0.0.1:0",
        )
        .unwrap()
    }

    #[test]
    fn from_files_without_identity_starts_empty() {
        let server = server_without_files();
        assert!(server.current_identity().is_none());
        assert!(!server.activation_pending());
        assert!(!server.activation_disabled());
    }

    #[test]
    fn from_files_with_identity_loads_it() {
        let dir = tempdir().unwrap();
        let (cert, key) = write_self_signed(dir.path(), "example.com");
        let server = KeyServer::from_files(
            &cert,
            &key,
            &dir.path().join("ca.pem"),
            "127.0.0.1:0",
            "127.0.0.1:0",
        )
        .unwrap();
        assert!(server.current_identity().is_some());
    }

    #[test]
    fn from_files_rejects_invalid_listen_addr() {
        let dir = tempdir().unwrap();
        let result = KeyServer::from_files(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
            &dir.path().join("ca.pem"),
            "not-an-address",
            "127.0.0.1:0",
        );
        assert!(result.is_err());
    }

    #[test]
    fn replace_certificates_installs_exactly_one_identity() {
        let dir = tempdir().unwrap();
        let server = server_without_files();

        let (cert, key) = write_self_signed(dir.path(), "example.com");
        let identity = identity::load(&cert, &key).unwrap();
        server.replace_certificates(vec![identity.clone()]);

        let installed = server.current_identity().expect("identity installed");
        assert_eq!(installed.cert, identity.cert);
    }

    #[test]
    fn replace_certificates_with_empty_set_uninstalls() {
        let dir = tempdir().unwrap();
        let (cert, key) = write_self_signed(dir.path(), "example.com");
        let server = KeyServer::from_files(
            &cert,
            &key,
            &dir.path().join("ca.pem"),
            "127.0.0.1:0",
            "127.0.0.1:0",
        )
        .unwrap();
        assert!(server.current_identity().is_some());

        server.replace_certificates(Vec::new());
        assert!(server.current_identity().is_none());
    }

    #[test]
    fn secret_lifecycle_is_visible_through_the_handle() {
        let server = server_without_files();
        server.set_activation_secret(b"abc123");
        assert!(server.activation_pending());

        server.clear_activation_secret();
        assert!(server.activation_disabled());
        assert!(!server.activation_pending());
    }
}
