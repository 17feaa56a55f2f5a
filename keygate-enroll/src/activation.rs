//! The activation state machine.
//!
//! `Loading → Activating → Enrolling → Finalized`, driven once at startup.
//! There is no failure state: every error aborts the run, because a
//! half-enrolled server must never serve with stale or missing trust
//! material. The listener is the one concurrent piece — it starts accepting
//! during `Activating` and keeps running while enrollment proceeds.

use crate::api::EnrollClient;
use crate::{csr, persist};
use anyhow::Context;
use keygate_core::{CredentialStore, KeygateConfig, Prompter};
use keygate_listener::{KeyServer, identity};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Boot the server through the activation lifecycle.
///
/// Returns the fully operational server handle together with the listener
/// task, which runs for the remainder of the process lifetime. Ordering
/// guarantees: the activation secret is installed before the listener task
/// is spawned, and it is cleared only alongside installing the enrolled
/// certificate set — both complete before this function returns.
pub async fn run(
    config: &KeygateConfig,
    prompter: &mut dyn Prompter,
) -> anyhow::Result<(Arc<KeyServer>, JoinHandle<()>)> {
    // Loading: credential, fresh key material, and a listener bound to
    // whatever identity already exists on disk.
    let store = CredentialStore::new(&config.paths.credential_file);
    let credential = store
        .load(prompter)
        .context("failed to load enrollment credential")?;

    let material =
        csr::generate(&credential.host).context("failed to generate key material")?;
    persist::write_private_key(&config.paths.key_file, material.private_key_pem())
        .with_context(|| {
            format!("failed to write private key to {}", config.paths.key_file.display())
        })?;
    info!(path = %config.paths.key_file.display(), "private key generated and saved");

    let server = Arc::new(
        KeyServer::from_files(
            &config.paths.init_cert_file,
            &config.paths.init_key_file,
            &config.paths.ca_file,
            &config.listen.addr,
            &config.listen.metrics_addr,
        )
        .context("failed to initialize key server")?,
    );

    // Activating: the gate goes up, then the listener starts accepting
    // without waiting for enrollment to finish.
    server.set_activation_secret(credential.token.as_bytes());
    info!("server entering activation state");
    let listener = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.listen_and_serve().await {
                error!(error = format!("{e:#}"), "listener failed");
                std::process::exit(1);
            }
        })
    };

    // Enrolling: one blocking call to the authority.
    let client = EnrollClient::new(config.enrollment.endpoint.clone())
        .context("failed to build enrollment client")?;
    let certificate = client
        .enroll(&credential, &material.csr_pem)
        .await
        .context("enrollment request failed")?;
    persist::write_certificate(&config.paths.cert_file, &certificate).with_context(|| {
        format!("failed to write certificate to {}", config.paths.cert_file.display())
    })?;
    info!(path = %config.paths.cert_file.display(), "certificate saved");

    // Finalized: activation dies, the enrolled identity goes live.
    server.clear_activation_secret();
    let identity = identity::load(&config.paths.cert_file, &config.paths.key_file)
        .context("failed to load enrolled identity")?;
    server.replace_certificates(vec![identity]);
    info!("server exiting activation state");

    Ok((server, listener))
}

/// Delete the persisted identity so the next run performs a fresh
/// enrollment.
pub fn reset(config: &KeygateConfig) -> anyhow::Result<()> {
    for path in [&config.paths.key_file, &config.paths.cert_file] {
        persist::remove_if_exists(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        info!(path = %path.display(), "removed");
    }
    Ok(())
}
