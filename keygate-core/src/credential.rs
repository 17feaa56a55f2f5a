//! Persisted enrollment credential with an interactive fallback.
//!
//! The credential authenticates this server to the enrollment authority.
//! It is loaded from a JSON file; when the file is absent or unreadable the
//! operator is prompted once and the entered credential is persisted back to
//! the same file, so subsequent runs load it without prompting.

use crate::error::KeygateError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Credential used to authenticate to the enrollment authority.
///
/// `host` names the hostname being certified, not where the authority lives.
/// Never mutated after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Source of interactively entered values.
///
/// Injected into [`CredentialStore::load`] so the store is testable without
/// a TTY.
pub trait Prompter {
    fn prompt(&mut self, label: &str) -> io::Result<String>;
}

/// Prompter that writes the label to stdout and reads one line from stdin.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, label: &str) -> io::Result<String> {
        print!("{label}: ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// File-backed credential store.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the stored credential, prompting for a new one when the file is
    /// absent or unreadable.
    ///
    /// A corrupt or missing file is a recoverable condition: the operator is
    /// prompted and the entered credential is persisted before returning.
    /// Failure to persist the prompted credential is fatal — future runs
    /// would have nothing durable to authenticate with.
    pub fn load(&self, prompter: &mut dyn Prompter) -> Result<Credential, KeygateError> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<Credential>(&bytes) {
                Ok(credential) => return Ok(credential),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "credential file unreadable, falling back to prompt"
                    );
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no credential file, prompting");
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "credential file unopenable, falling back to prompt"
                );
            }
        }

        let host = prompter.prompt("Authority hostname")?;
        let token = prompter.prompt("API key")?;
        if host.is_empty() || token.is_empty() {
            return Err(KeygateError::Credential(
                "hostname and API key must not be empty".into(),
            ));
        }
        let credential = Credential { token, host, port: None };
        self.persist(&credential)?;
        info!(path = %self.path.display(), "credential saved");
        Ok(credential)
    }

    fn persist(&self, credential: &Credential) -> Result<(), KeygateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(credential)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
