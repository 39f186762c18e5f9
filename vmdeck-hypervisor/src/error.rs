//! Error types for the VM lifecycle core.

use thiserror::Error;

/// Errors that can occur during hypervisor operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HypervisorError {
    /// The daemon is unreachable or native client support is missing.
    #[error("Failed to connect to hypervisor: {0}")]
    ConnectionFailed(String),

    /// No domain with the given name or UUID is known to the daemon.
    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    /// The domain is in the wrong state for the requested transition.
    #[error("Invalid domain state for operation: {0}")]
    InvalidState(String),

    /// A domain with the same name or UUID is already defined.
    #[error("Domain definition conflict: {0}")]
    DefinitionConflict(String),

    /// The domain definition template could not be read or rendered.
    #[error("Failed to render domain template: {0}")]
    TemplateRender(String),

    /// The in-guest agent is not reachable, timed out, or rejected the command.
    #[error("Guest agent error: {0}")]
    GuestAgent(String),

    /// The caller supplied an invalid request.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other failure reported by the daemon, message preserved.
    #[error("Hypervisor daemon error: {0}")]
    Daemon(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HypervisorError {
    /// True when the error means the requested domain does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HypervisorError::DomainNotFound(_))
    }
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
