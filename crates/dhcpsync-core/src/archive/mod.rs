//! Bounded, oldest-first rotating archive of superseded configurations
//!
//! ## Naming
//!
//! `<prefix><YYYYmmddTHHMMSS>_<seq>` where `seq` is a four-digit counter that
//! restarts every second. A new backup's creation time is never earlier than
//! the newest existing one, so creation order, filename order and sequence
//! order always agree, and two backups never share a filename.
//!
//! ## Concurrency
//!
//! `record` (insert + rotation) and `enforce_retention` hold the device's
//! lock for their whole duration, so the retained count is exact under
//! concurrent writers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::lock::DeviceLocks;
use crate::traits::{Backup, BackupMeta, BackupStore};

/// What a call to [`BackupArchive::record`] did
#[derive(Debug, Clone)]
pub struct RecordedBackup {
    /// The new backup
    pub backup: Backup,
    /// Filenames evicted by rotation, oldest first
    pub evicted: Vec<String>,
}

/// Per-device configuration backup archive
pub struct BackupArchive {
    store: Arc<dyn BackupStore>,
    prefix: String,
    max_backups: usize,
    locks: DeviceLocks,
}

impl BackupArchive {
    /// Create an archive
    ///
    /// # Errors
    ///
    /// `max_backups` must be at least 1 and `prefix` non-empty.
    pub fn new(
        store: Arc<dyn BackupStore>,
        prefix: impl Into<String>,
        max_backups: usize,
    ) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(Error::config("Backup prefix cannot be empty"));
        }
        if max_backups == 0 {
            return Err(Error::config("Max backups must be > 0"));
        }
        Ok(Self {
            store,
            prefix,
            max_backups,
            locks: DeviceLocks::new(),
        })
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Archive `content` as the newest backup for `device_ip`, then rotate
    pub async fn record(&self, device_ip: &str, content: &str) -> Result<RecordedBackup> {
        let _guard = self.locks.lock(device_ip).await;

        let existing = self.store.list(device_ip).await?;
        let backup = self.next_backup(device_ip, content, existing.first(), Utc::now());
        self.store.insert(&backup).await?;
        debug!("Recorded backup {} for {}", backup.filename, device_ip);

        let evicted = self.rotate(device_ip, self.max_backups).await?;
        Ok(RecordedBackup { backup, evicted })
    }

    /// Delete oldest backups until at most `max` remain
    ///
    /// # Returns
    ///
    /// Evicted filenames, oldest first.
    pub async fn enforce_retention(&self, device_ip: &str, max: usize) -> Result<Vec<String>> {
        let _guard = self.locks.lock(device_ip).await;
        self.rotate(device_ip, max).await
    }

    /// Backup metadata, newest first
    pub async fn list(&self, device_ip: &str) -> Result<Vec<BackupMeta>> {
        Ok(self
            .store
            .list(device_ip)
            .await?
            .iter()
            .map(Backup::meta)
            .collect())
    }

    /// One backup including its content
    pub async fn get(&self, device_ip: &str, filename: &str) -> Result<Backup> {
        self.store.get(device_ip, filename).await?.ok_or_else(|| {
            Error::not_found(format!("no backup {} for device {}", filename, device_ip))
        })
    }

    /// Newest backup including its content, if any
    pub async fn latest(&self, device_ip: &str) -> Result<Option<Backup>> {
        Ok(self.store.list(device_ip).await?.into_iter().next())
    }

    /// Caller must hold the device lock
    async fn rotate(&self, device_ip: &str, max: usize) -> Result<Vec<String>> {
        let mut backups = self.store.list(device_ip).await?;
        let mut evicted = Vec::new();

        // newest first, so the oldest is at the end
        while backups.len() > max {
            let Some(oldest) = backups.pop() else {
                break;
            };
            self.store.delete(device_ip, &oldest.filename).await?;
            info!(
                "Evicted backup {} for {} (retaining {})",
                oldest.filename, device_ip, max
            );
            evicted.push(oldest.filename);
        }
        Ok(evicted)
    }

    fn next_backup(
        &self,
        device_ip: &str,
        content: &str,
        newest: Option<&Backup>,
        now: DateTime<Utc>,
    ) -> Backup {
        let (created_at, sequence) = match newest {
            Some(newest) => {
                let created_at = if now <= newest.created_at {
                    newest.created_at + chrono::Duration::milliseconds(1)
                } else {
                    now
                };
                let sequence = if created_at.timestamp() == newest.created_at.timestamp() {
                    newest.sequence + 1
                } else {
                    0
                };
                (created_at, sequence)
            }
            None => (now, 0),
        };

        Backup {
            device_ip: device_ip.to_string(),
            filename: format!(
                "{}{}_{:04}",
                self.prefix,
                created_at.format("%Y%m%dT%H%M%S"),
                sequence
            ),
            content: content.to_string(),
            created_at,
            sequence,
        }
    }
}
