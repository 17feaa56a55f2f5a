// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Keygate — keyless TLS key server
//
//  Boot:      credential → key material → listener in activation mode
//  Enroll:    one authenticated call to the certificate authority
//  Finalize:  persist cert, kill the activation gate, swap the identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use clap::Parser;
use keygate_core::{KeygateConfig, StdinPrompter};
use keygate_enroll::activation;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "keygate", version, about = "Keygate — keyless TLS key server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/keygate/keygate.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Delete the persisted key and certificate, then exit.
    /// The next run performs a fresh enrollment.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Keygate starting");

    if let Err(e) = run(&cli).await {
        error!(error = format!("{e:#}"), "Keygate failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        KeygateConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        KeygateConfig::default()
    };

    if cli.reset {
        activation::reset(&config)?;
        info!("Persisted identity removed");
        return Ok(());
    }

    // ── Activation lifecycle ──
    let mut prompter = StdinPrompter;
    let (server, listener) = activation::run(&config, &mut prompter).await?;

    info!(
        addr = %config.listen.addr,
        metrics_addr = %config.listen.metrics_addr,
        identities = usize::from(server.current_identity().is_some()),
        "Keygate is operational"
    );

    // The listener owns the rest of the process lifetime.
    listener.await?;
    Ok(())
}
