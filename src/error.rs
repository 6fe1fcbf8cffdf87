// ============================================================================
// File: src/error.rs
// ----------------------------------------------------------------------------
// Error taxonomy shared by hypervisor control, readiness probing, remote
// sessions and the deployment orchestrator.
// ============================================================================

use std::path::PathBuf;

/// Errors produced by deployment components
///
/// Boundary components log the reason where the failure happens and hand
/// the error back; the orchestrator turns it into a state transition.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The hypervisor control executable could not be found
    #[error("Hypervisor executable not found: {}", path.display())]
    ToolMissing { path: PathBuf },

    /// An external process ran but reported failure
    #[error("{operation} failed: {details}")]
    ProcessFailure {
        operation: &'static str,
        details: String,
    },

    /// A TCP endpoint never became reachable
    #[error("{host}:{port} not reachable within {seconds} seconds")]
    NetworkTimeout {
        host: String,
        port: u16,
        seconds: u64,
    },

    /// Opening or authenticating the remote session failed
    #[error("SSH authentication failed: {details}")]
    AuthFailure { details: String },

    /// A remote command ran but its output signalled an error
    #[error("Remote command '{command}' reported an error: {details}")]
    RemoteCommandSignaledError { command: String, details: String },

    /// Remote file transfer failed
    #[error("File transfer failed: {details}")]
    TransferFailure { details: String },

    /// The private key file is in a format no loader accepts
    #[error("Unsupported private key {}: {details}", path.display())]
    UnsupportedKey { path: PathBuf, details: String },

    /// Configuration is missing or invalid
    #[error("Invalid configuration: {details}")]
    Config { details: String },

    /// Another deploy or rollback already holds the VM
    #[error("A deployment run is already active for VM '{vm}'")]
    RunInProgress { vm: String },

    /// A background operation panicked or was cancelled
    #[error("Background task failed: {details}")]
    TaskFailed { details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Shorthand for a configuration error
    pub fn config<D: Into<String>>(details: D) -> Self {
        DeployError::Config {
            details: details.into(),
        }
    }

    /// Shorthand for an authentication error
    pub fn auth<D: Into<String>>(details: D) -> Self {
        DeployError::AuthFailure {
            details: details.into(),
        }
    }

    /// Shorthand for a transfer error
    pub fn transfer<D: Into<String>>(details: D) -> Self {
        DeployError::TransferFailure {
            details: details.into(),
        }
    }

    pub fn is_tool_missing(&self) -> bool {
        matches!(self, DeployError::ToolMissing { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployError::NetworkTimeout { .. })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            DeployError::AuthFailure { .. } | DeployError::UnsupportedKey { .. }
        )
    }
}

impl From<tokio::task::JoinError> for DeployError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeployError::TaskFailed {
            details: err.to_string(),
        }
    }
}

/// Result type for deployment operations
pub type DeployResult<T> = Result<T, DeployError>;
