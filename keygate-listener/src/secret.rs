//! Activation secret lifecycle.
//!
//! The secret gates the restricted service the listener speaks before the
//! real certificate is installed. State moves strictly forward:
//! `Unset → Pending → Disabled`. Once disabled it can never be re-armed,
//! so clearing the secret at finalization is irreversible for the life of
//! the process.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Activation lifecycle of the listener.
#[derive(Debug)]
pub enum ActivationState {
    /// No secret installed yet; nothing is trusted.
    Unset,
    /// Connections bearing this secret are trusted.
    Pending(Vec<u8>),
    /// Activation permanently disabled; the listener is operational.
    Disabled,
}

/// Atomically swapped holder for the activation state.
///
/// Written by the bootstrap task, read on every accepted connection.
#[derive(Debug)]
pub struct ActivationSecret {
    state: ArcSwap<ActivationState>,
}

impl ActivationSecret {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(ActivationState::Unset),
        }
    }

    /// Install the secret. Ignored once activation has been disabled.
    pub fn set(&self, secret: &[u8]) {
        if matches!(**self.state.load(), ActivationState::Disabled) {
            return;
        }
        self.state
            .store(Arc::new(ActivationState::Pending(secret.to_vec())));
    }

    /// Permanently disable activation-mode authentication.
    pub fn disable(&self) {
        self.state.store(Arc::new(ActivationState::Disabled));
    }

    /// Consistent snapshot of the current state.
    pub fn load(&self) -> Arc<ActivationState> {
        self.state.load_full()
    }

    pub fn is_pending(&self) -> bool {
        matches!(**self.state.load(), ActivationState::Pending(_))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(**self.state.load(), ActivationState::Disabled)
    }
}

impl Default for ActivationSecret {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let secret = ActivationSecret::new();
        assert!(!secret.is_pending());
        assert!(!secret.is_disabled());
    }

    #[test]
    fn set_moves_to_pending_with_the_given_bytes() {
        let secret = ActivationSecret::new();
        secret.set(b"abc123");
        match &*secret.load() {
            ActivationState::Pending(s) => assert_eq!(s, b"abc123"),
            other => panic!("expected Pending, got {other:?}"),
        }
    }

    #[test]
    fn disable_is_permanent() {
        let secret = ActivationSecret::new();
        secret.set(b"abc123");
        secret.disable();
        assert!(secret.is_disabled());

        // A late set must not re-arm activation.
        secret.set(b"other");
        assert!(secret.is_disabled());
        assert!(!secret.is_pending());
    }

    #[test]
    fn set_replaces_a_pending_secret() {
        let secret = ActivationSecret::new();
        secret.set(b"old");
        secret.set(b"new");
        match &*secret.load() {
            ActivationState::Pending(s) => assert_eq!(s, b"new"),
            other => panic!("expected Pending, got {other:?}"),
        }
    }
}
