//! Error types for the DHCP sync system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for DHCP sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message carried by [`Error::NoChangeDetected`]
pub const NO_CHANGE_MESSAGE: &str = "No changes detected in DHCP configuration.";

/// Core error type for the DHCP sync system
#[derive(Error, Debug)]
pub enum Error {
    /// A required input was missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// No credential, configuration file or backup for the device
    #[error("Not found: {0}")]
    NotFound(String),

    /// A remote session could not be established or timed out
    #[error("Connection error: {0}")]
    Connection(String),

    /// The submitted configuration matches the deployed one
    #[error("{}", NO_CHANGE_MESSAGE)]
    NoChangeDetected,

    /// The remote state file could not be parsed at all
    #[error("Parse error: {0}")]
    Parse(String),

    /// A command or file operation failed on an open session
    #[error("Remote error: {0}")]
    Remote(String),

    /// Credential store errors
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Backup store errors
    #[error("Backup store error: {0}")]
    BackupStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`] for callers that map errors to
/// response classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied bad input
    Validation,
    /// Nothing stored for the device
    NotFound,
    /// Remote host unreachable
    Connection,
    /// Checksum-gated refusal; nothing to do
    NoChange,
    /// Anything else
    Internal,
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a remote operation error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a credential store error
    pub fn credential_store(msg: impl Into<String>) -> Self {
        Self::CredentialStore(msg.into())
    }

    /// Create a backup store error
    pub fn backup_store(msg: impl Into<String>) -> Self {
        Self::BackupStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Connection(_) => ErrorKind::Connection,
            Error::NoChangeDetected => ErrorKind::NoChange,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this is the checksum-gated "nothing to do" refusal
    pub fn is_no_change(&self) -> bool {
        matches!(self, Error::NoChangeDetected)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
