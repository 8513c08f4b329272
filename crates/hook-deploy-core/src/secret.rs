//! # Webhook Secret
//!
//! The single shared secret used to authenticate deliveries from every
//! provider. Loaded once at startup and zeroed when dropped.

use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Shared webhook secret.
///
/// `Debug` output is redacted so the value never reaches logs or error
/// messages.
#[derive(Clone)]
pub struct WebhookSecret(Zeroizing<String>);

impl WebhookSecret {
    /// Wrap a raw secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Read the secret from a file, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Missing`] when the file does not exist,
    /// [`SecretError::Unreadable`] when it cannot be read and
    /// [`SecretError::Empty`] when it holds only whitespace.
    pub fn load_from_file(path: &Path) -> Result<Self, SecretError> {
        if !path.is_file() {
            return Err(SecretError::Missing {
                path: path.to_path_buf(),
            });
        }

        let raw = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            SecretError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            }
        })?);

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SecretError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(Self::new(trimmed))
    }

    /// Raw secret bytes, for keying HMACs and token comparison.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WebhookSecret").field(&"<REDACTED>").finish()
    }
}

/// Errors while loading the secret file
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret file is missing: {}", .path.display())]
    Missing { path: PathBuf },

    #[error("Secret file {} could not be read: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file {} is empty", .path.display())]
    Empty { path: PathBuf },
}
