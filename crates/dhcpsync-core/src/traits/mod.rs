//! Core traits for the DHCP sync system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`RemoteTransport`]: Open remote shell sessions to managed devices
//! - [`CredentialStore`]: Persist one credential per device
//! - [`BackupStore`]: Persist archived configuration versions

pub mod transport;
pub mod credential_store;
pub mod backup_store;

pub use transport::{RemoteTransport, RemoteSession, SessionTarget, CommandOutput};
pub use credential_store::{CredentialStore, Credential, CredentialView};
pub use backup_store::{BackupStore, Backup, BackupMeta};
