use thiserror::Error;

/// Unified error type for Keygate.
#[derive(Error, Debug)]
pub enum KeygateError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Key generation failed: {0}")]
    Keygen(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
