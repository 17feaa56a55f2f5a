use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level Keygate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygateConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
}

/// Listener addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_addr")]
    pub addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

/// On-disk locations of the credential and the TLS material.
///
/// The `init_*` pair is the placeholder identity the listener binds with
/// before enrollment completes; the enrolled identity is persisted to
/// `key_file`/`cert_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_credential_file")]
    pub credential_file: PathBuf,
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,
    #[serde(default = "default_ca_file")]
    pub ca_file: PathBuf,
    #[serde(default = "default_init_cert_file")]
    pub init_cert_file: PathBuf,
    #[serde(default = "default_init_key_file")]
    pub init_key_file: PathBuf,
}

/// Enrollment authority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_listen_addr() -> String { "0.0.0.0:2407".into() }
fn default_metrics_addr() -> String { "0.0.0.0:2406".into() }
fn default_credential_file() -> PathBuf { "/etc/keygate/token.json".into() }
fn default_key_file() -> PathBuf { "/etc/keygate/server-key.pem".into() }
fn default_cert_file() -> PathBuf { "/etc/keygate/server-cert.pem".into() }
fn default_ca_file() -> PathBuf { "/etc/keygate/keygate-ca.pem".into() }
fn default_init_cert_file() -> PathBuf { "/etc/keygate/default-cert.pem".into() }
fn default_init_key_file() -> PathBuf { "/etc/keygate/default-key.pem".into() }
fn default_endpoint() -> String { "https://ca.keygate.dev/api/v4/certificates".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for KeygateConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            paths: PathsConfig::default(),
            enrollment: EnrollmentConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            credential_file: default_credential_file(),
            key_file: default_key_file(),
            cert_file: default_cert_file(),
            ca_file: default_ca_file(),
            init_cert_file: default_init_cert_file(),
            init_key_file: default_init_key_file(),
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

impl KeygateConfig {
    /// Load configuration from YAML file + env overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: KeygateConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("KEYGATE_").split("__"))
            .extract()?;
        Ok(config)
    }
}
