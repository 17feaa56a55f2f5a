pub mod config;
pub mod credential;
pub mod error;

pub use config::KeygateConfig;
pub use credential::{Credential, CredentialStore, Prompter, StdinPrompter};
pub use error::KeygateError;
