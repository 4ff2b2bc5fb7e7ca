//! Error types shared across the session and polling engine.

use thiserror::Error;

/// Failures surfaced by the engine. Nothing here terminates the process;
/// every variant is scoped to the operation that produced it and the caller
/// decides presentation.
#[derive(Error, Debug)]
pub enum DuckyError {
    /// The model API returned a non-success status.
    #[error("model backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// The model backend could not be reached at all.
    #[error("model backend unavailable: {0}")]
    BackendUnavailable(#[from] reqwest::Error),

    /// The model replied with something we could not use.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// A re-run was requested but no turn carries a command.
    #[error("no suggested command available")]
    NoCommandAvailable,

    /// A poll targeted a crumb that does not exist.
    #[error("crumb '{name}' not found")]
    CrumbNotFound { name: String },

    /// A script could not be started or executed.
    #[error("script execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DuckyError {
    /// Create a new backend API error.
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { status, .. } => (500..=599).contains(status),
            Self::BackendUnavailable(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Whether this is a backend-side failure (as opposed to local state).
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::BackendUnavailable(_) | Self::InvalidResponse(_)
        )
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DuckyError>;

#[cfg(test)]
mod tests {
    use super::DuckyError;

    #[test]
    fn server_errors_are_retryable() {
        assert!(DuckyError::backend(503, "overloaded").is_retryable());
        assert!(!DuckyError::backend(401, "unauthorized").is_retryable());
    }

    #[test]
    fn local_errors_are_not_backend_failures() {
        assert!(!DuckyError::NoCommandAvailable.is_backend_failure());
        assert!(DuckyError::backend(500, "boom").is_backend_failure());
    }

    #[test]
    fn display_includes_crumb_name() {
        let err = DuckyError::CrumbNotFound {
            name: "deploy".into(),
        };
        assert!(err.to_string().contains("deploy"));
    }
}
