//! In-memory handling of sensitive material
//!
//! Master passwords, cipher passphrases, and vault session tokens are held
//! in wrappers that zero their memory on drop. Holders are passed by value
//! and dropped as soon as the secret has been handed to the external tool.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{SnapkeepError, SnapkeepResult};

/// A passphrase or master password, zeroed on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Passphrase {
    inner: String,
}

impl Passphrase {
    pub fn new(s: impl Into<String>) -> Self {
        Self { inner: s.into() }
    }

    /// Read the passphrase from an environment variable
    pub fn from_env(var: &str) -> SnapkeepResult<Self> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(Self::new(value)),
            _ => Err(SnapkeepError::Config(format!(
                "Environment variable {} is not set",
                var
            ))),
        }
    }

    /// Prompt interactively without echoing
    pub fn prompt(message: &str) -> SnapkeepResult<Self> {
        let value = rpassword::prompt_password(message)
            .map_err(|e| SnapkeepError::Io(format!("Failed to read passphrase: {}", e)))?;
        if value.is_empty() {
            return Err(SnapkeepError::Auth("Empty passphrase".into()));
        }
        Ok(Self::new(value))
    }

    /// Read the passphrase from the configured variable, falling back to an
    /// interactive prompt when it is unset
    pub fn from_env_or_prompt(var: Option<&str>, message: &str) -> SnapkeepResult<Self> {
        if let Some(var) = var {
            if let Ok(secret) = Self::from_env(var) {
                return Ok(secret);
            }
        }
        Self::prompt(message)
    }

    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passphrase")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED {} bytes]", self.inner.len())
    }
}

/// A short-lived session token returned by a vault unlock, zeroed on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionToken {
    inner: String,
}

impl SessionToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self { inner: s.into() }
    }

    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED {} bytes]", self.inner.len())
    }
}
