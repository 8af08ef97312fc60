//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Environment errors
    #[error("Backend CLI not found: {name}. {hint}")]
    BackendNotFound { name: String, hint: String },

    #[error("Backend {name} is not ready: {reason}")]
    BackendNotReady { name: String, reason: String },

    #[error("Backend {name} is too old: found {found}, need at least {minimum}")]
    BackendTooOld {
        name: String,
        found: String,
        minimum: String,
    },

    #[error("Unsupported backend: {0}. Kiln supports lxd and multipass.")]
    UnsupportedBackend(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid base specification: {0}")]
    InvalidSpec(String),

    // Lock errors
    #[error("Lock for {key} is not held by this process")]
    LockOwnership { key: String },

    #[error("Could not acquire provisioning lock for {key} within {waited_secs}s")]
    ProvisioningContention { key: String, waited_secs: u64 },

    // Provisioning errors
    #[error("Setup step '{step}' failed: {reason}")]
    SetupFailed { step: String, reason: String },

    #[error("Provisioning exceeded the overall deadline after {elapsed_secs}s")]
    ProvisioningTimeout { elapsed_secs: u64 },

    #[error("Operation '{operation}' exceeded its deadline after {elapsed_secs}s")]
    OperationTimeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Operation '{operation}' failed after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<KilnError>,
    },

    // Backend errors
    #[error("Backend communication failed during {operation}: {reason}")]
    BackendCommunication { operation: String, reason: String },

    #[error("Backend refused {operation}: permission denied: {reason}")]
    PermissionDenied { operation: String, reason: String },

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Instance already exists: {0}")]
    InstanceExists(String),

    #[error("Command exited with status {exit_code} in instance {instance}")]
    CommandNonZero {
        instance: String,
        exit_code: i32,
        stderr: String,
    },

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

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

    #[error("{0}")]
    User(String),
}

impl KilnError {
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

    /// Create a backend communication error
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendCommunication {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is worth retrying.
    ///
    /// Transient backend conditions (daemon momentarily unresponsive,
    /// connectivity hiccups, per-attempt timeouts) qualify. Everything else
    /// either indicates operator error or has already consumed its retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendCommunication { .. } | Self::BackendNotReady { .. }
        )
    }

    /// Check if the error must never be retried.
    ///
    /// Fatal errors short-circuit the retry policy without consuming
    /// attempts: retrying a permission failure or a malformed spec only
    /// wastes the deadline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::InvalidSpec(_)
                | Self::LockOwnership { .. }
                | Self::UnsupportedBackend(_)
                | Self::BackendNotFound { .. }
                | Self::BackendTooOld { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::BackendNotFound { hint, .. } => Some(hint.clone()),
            Self::BackendNotReady { name, .. } if name == "lxd" => {
                Some("Run: lxd init --auto".to_string())
            }
            Self::BackendNotReady { name, .. } if name == "multipass" => {
                Some("Check: multipass version".to_string())
            }
            Self::ProvisioningContention { .. } => Some(
                "Another kiln process is provisioning the same base; retry shortly".to_string(),
            ),
            _ => None,
        }
    }
}
