//! Error types for wheelvend
//!
//! All modules use `VendResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for wheelvend operations
pub type VendResult<T> = Result<T, VendError>;

/// All errors that can occur in wheelvend
#[derive(Error, Debug)]
pub enum VendError {
    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported runtime: {0}. Supported runtimes are 2 (python2.7) and 3 (python3.6).")]
    UnsupportedRuntime(String),

    // Build errors
    #[error("Failed to provision build worker: {reason}")]
    ProvisionFailure { reason: String },

    #[error("Build failed: {summary}")]
    BuildFailure { summary: String, diagnostic: String },

    #[error("Worker exceeded its lifetime of {secs}s")]
    WorkerLifetimeExceeded { secs: u64 },

    // Store errors
    #[error("Artifact store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Store key {key} is outside the worker scope")]
    StoreScope { key: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing worker parameter: {0}")]
    MissingParameter(&'static str),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VendError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a store unavailable error
    pub fn store(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a provisioning error
    pub fn provision(reason: impl Into<String>) -> Self {
        Self::ProvisionFailure {
            reason: reason.into(),
        }
    }

    /// Create a build failure with captured worker output
    pub fn build(summary: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::BuildFailure {
            summary: summary.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProvisionFailure { .. }
                | Self::StoreUnavailable { .. }
                | Self::BuildFailure { .. }
        )
    }

    /// Short machine-readable error kind used in responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedRuntime(_) => "invalid_request",
            Self::ProvisionFailure { .. } => "provision_failure",
            Self::BuildFailure { .. } | Self::WorkerLifetimeExceeded { .. } => "build_failure",
            Self::StoreUnavailable { .. } | Self::StoreScope { .. } => "store_unavailable",
            _ => "internal",
        }
    }

    /// HTTP-equivalent status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedRuntime(_) => 400,
            Self::BuildFailure { .. } | Self::WorkerLifetimeExceeded { .. } => 422,
            Self::ProvisionFailure { .. } | Self::StoreUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedRuntime(_) => Some("Use 2 or 3 as the runtime selector"),
            Self::ProvisionFailure { .. } => Some("Retry shortly; the reservation was released"),
            Self::BuildFailure { .. } => {
                Some("Missing system libraries can be added with --extra <package>")
            }
            Self::StoreUnavailable { .. } => Some("Check store.root in: wheelvend config show"),
            _ => None,
        }
    }
}
