//! Error taxonomy for bundling, publishing and job composition.

use std::path::Path;

/// Errors surfaced by the bundling core.
///
/// `Config` and `CredentialInvalid` abort before anything touches the
/// store. `Build` aborts before any transfer. `Transfer` is the only kind a
/// caller may retry, and re-publishing is always safe because archive names
/// are content-addressed.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Missing or invalid configuration (environment, settings, parameters).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The access credential is missing or expired.
    #[error("credential not valid ({path}): {reason}")]
    CredentialInvalid { path: String, reason: String },

    /// The local archive could not be built.
    #[error("failed to build bundle from {path}: {message}")]
    Build { path: String, message: String },

    /// One or more replica pushes failed.
    #[error("transfer of {name} failed, {succeeded}/{attempted} replicas pushed: {message}")]
    Transfer {
        name: String,
        succeeded: usize,
        attempted: usize,
        message: String,
    },
}

impl BundleError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn build(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Build {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    pub fn credential(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::CredentialInvalid {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::CredentialInvalid { .. } => 3,
            Self::Build { .. } => 4,
            Self::Transfer { .. } => 5,
        }
    }

    /// Whether repeating the whole publish may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }

    pub fn is_credential_invalid(&self) -> bool {
        matches!(self, Self::CredentialInvalid { .. })
    }
}

/// Result type for bundling operations.
pub type BundleResult<T> = Result<T, BundleError>;
