//! Error types for the chime core.

/// Top-level error type for the reminder sync and delivery core.
#[derive(Debug, thiserror::Error)]
pub enum ChimeError {
    /// Transient network failure: timeout, unreachable backend, 5xx.
    /// Always retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Permanent rejection from the backend (e.g. invalid phone number).
    /// Never retried; skips straight to the next channel or abandonment.
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// Missing or corrupt configuration / profile data.
    #[error("config error: {0}")]
    Config(String),

    /// Local store read/write failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChimeError {
    /// Whether a failed remote operation should stay on the retry path.
    ///
    /// Only [`ChimeError::Network`] qualifies; a [`ChimeError::Rejected`]
    /// is final, and everything else is a local fault that retrying the
    /// remote call cannot fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChimeError>;
