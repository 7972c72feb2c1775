//! Error types for the multisite operator

use thiserror::Error;

/// Main error type for multisite operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error, returned unmodified from kube-rs
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid site identifier, path or configuration value
    #[error("validation error: {0}")]
    Validation(String),

    /// Exec or HTTP connectivity failure (connection, auth, stream, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote command reported a non-zero exit marker
    #[error("step {step} failed: {message}")]
    RemoteCommand {
        /// Workflow step that ran the command
        step: String,
        /// Captured stderr, or a description of the failing marker
        message: String,
    },

    /// The DNS API rejected a record change
    #[error("dns error: {0}")]
    Dns(String),

    /// Writing the reconcile outcome back to the MultiSite failed
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transport error with the given message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a remote command failure for a workflow step
    pub fn remote_command(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteCommand {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a DNS error with the given message
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create a persistence error with the given message
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// True for a Kubernetes 404, i.e. the object is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Text recorded in `spec.errorMsg` when creation fails.
    ///
    /// Remote command failures store the captured stderr verbatim; every
    /// other variant stores the underlying error text.
    pub fn status_message(&self) -> String {
        match self {
            Error::RemoteCommand { message, .. } => message.clone(),
            Error::Transport(msg) | Error::Dns(msg) | Error::Validation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
