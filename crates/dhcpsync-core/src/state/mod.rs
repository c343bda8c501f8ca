// # Store Implementations
//
// This module provides implementations of the CredentialStore and
// BackupStore traits for different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileBackupStore, FileCredentialStore};
pub use memory::{MemoryBackupStore, MemoryCredentialStore};

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::traits::{BackupStore, CredentialStore};

/// Build the credential store described by `config`
pub async fn credential_store_from_config(
    config: &StoreConfig,
) -> Result<Arc<dyn CredentialStore>> {
    Ok(match config {
        StoreConfig::Memory => Arc::new(MemoryCredentialStore::new()),
        StoreConfig::File { path } => Arc::new(FileCredentialStore::new(path).await?),
    })
}

/// Build the backup store described by `config`
pub async fn backup_store_from_config(config: &StoreConfig) -> Result<Arc<dyn BackupStore>> {
    Ok(match config {
        StoreConfig::Memory => Arc::new(MemoryBackupStore::new()),
        StoreConfig::File { path } => Arc::new(FileBackupStore::new(path).await?),
    })
}
