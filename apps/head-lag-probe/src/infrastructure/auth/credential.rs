//! Session credential holder.

use parking_lot::RwLock;

use crate::application::ports::AuthError;

/// The long-lived session credential.
///
/// Read-only from the core's perspective; [`SessionCredential::replace`]
/// exists for an external refresh to swap in a new value.
pub struct SessionCredential {
    value: RwLock<Option<String>>,
}

impl SessionCredential {
    /// Wrap an optional credential. Empty strings count as absent.
    #[must_use]
    pub fn new(value: Option<String>) -> Self {
        Self {
            value: RwLock::new(value.filter(|v| !v.trim().is_empty())),
        }
    }

    /// Whether a credential is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.value.read().is_some()
    }

    /// Current credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredential`] if none is configured.
    pub fn require(&self) -> Result<String, AuthError> {
        self.value.read().clone().ok_or(AuthError::MissingCredential)
    }

    /// Swap in a new credential.
    pub fn replace(&self, value: impl Into<String>) {
        let value = value.into();
        *self.value.write() = if value.trim().is_empty() {
            None
        } else {
            Some(value)
        };
        tracing::info!("Session credential replaced");
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("value", &if self.is_configured() { "[REDACTED]" } else { "<none>" })
            .finish()
    }
}
