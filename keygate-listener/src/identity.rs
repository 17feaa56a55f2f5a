//! Loading PEM certificate/key pairs into rustls identities.

use anyhow::{Context, anyhow};
use rustls::crypto::ring;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Load a matched certificate chain + private key pair from PEM files.
pub fn load(cert_path: &Path, key_path: &Path) -> anyhow::Result<Arc<CertifiedKey>> {
    let certs = load_cert_chain(cert_path)?;
    let key = load_private_key(key_path)?;
    let provider = ring::default_provider();
    let certified = CertifiedKey::from_der(certs, key, &provider)
        .map_err(|e| anyhow!("certificate and key do not form an identity: {e}"))?;
    Ok(Arc::new(certified))
}

/// Load an identity only when both files exist.
///
/// Missing files are a normal first-run condition (no identity yet); files
/// that exist but do not parse are an error.
pub fn maybe_load(cert_path: &Path, key_path: &Path) -> anyhow::Result<Option<Arc<CertifiedKey>>> {
    if !cert_path.exists() || !key_path.exists() {
        return Ok(None);
    }
    load(cert_path, key_path).map(Some)
}

pub(crate) fn load_cert_chain(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let certs: Result<Vec<_>, _> = CertificateDer::pem_reader_iter(reader).collect();
    let certs = certs.map_err(|e| anyhow!("invalid PEM in {}: {e}", path.display()))?;

    if certs.is_empty() {
        return Err(anyhow!("no certificates found in {}", path.display()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let keys: Result<Vec<_>, _> = PrivateKeyDer::pem_reader_iter(reader).collect();
    let keys = keys.map_err(|e| anyhow!("invalid PEM in {}: {e}", path.display()))?;

    keys.into_iter()
        .next()
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}
