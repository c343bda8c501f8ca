// # Backup Store Trait
//
// Defines the interface for persisting configuration backups.
//
// ## Purpose
//
// Stores the configuration that was deployed on a device right before it
// was overwritten. Rotation policy lives in `BackupArchive`; stores only
// insert, list and delete.
//
// ## Implementations
//
// - In-memory: `MemoryBackupStore`
// - File-based (one JSON document per backup): `FileBackupStore`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One archived configuration version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub device_ip: String,
    /// `<prefix><timestamp>_<sequence>`, unique per device
    pub filename: String,
    /// Configuration that was deployed before the overwrite
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Tiebreaker for backups created within the same second
    pub sequence: u32,
}

impl Backup {
    /// Metadata without the content
    pub fn meta(&self) -> BackupMeta {
        BackupMeta {
            device_ip: self.device_ip.clone(),
            filename: self.filename.clone(),
            created_at: self.created_at,
        }
    }

    /// Newest-first ordering by creation time, then sequence
    pub fn newest_first(a: &Backup, b: &Backup) -> Ordering {
        (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence))
    }
}

/// Backup listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    pub device_ip: String,
    pub filename: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Trait for backup store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently. Callers serialize
/// insert-then-rotate sequences per device; stores need not.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Insert a new backup
    ///
    /// Must fail with [`crate::Error::BackupStore`] if a backup with the same
    /// filename already exists for the device. Never overwrites.
    async fn insert(&self, backup: &Backup) -> Result<(), crate::Error>;

    /// All backups for a device, newest first
    async fn list(&self, device_ip: &str) -> Result<Vec<Backup>, crate::Error>;

    /// Get one backup by filename
    async fn get(&self, device_ip: &str, filename: &str) -> Result<Option<Backup>, crate::Error>;

    /// Delete one backup
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Deleted
    /// - `Ok(false)`: Did not exist
    async fn delete(&self, device_ip: &str, filename: &str) -> Result<bool, crate::Error>;

    /// Devices that have at least one backup
    async fn devices(&self) -> Result<Vec<String>, crate::Error>;
}
