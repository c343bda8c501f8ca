// # Memory Stores
//
// In-memory implementations of CredentialStore and BackupStore.
//
// ## Purpose
//
// Simple, fast stores that don't persist across restarts.
// Useful for testing and for embedding where the caller owns persistence.
//
// ## Crash Behavior
//
// - All credentials and backups are lost on restart/crash
// - Lease polling has nothing to schedule until credentials are re-added

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::traits::backup_store::{Backup, BackupStore};
use crate::traits::credential_store::{Credential, CredentialStore};
use crate::Error;

/// In-memory credential store
///
/// # Example
///
/// ```rust,no_run
/// use dhcpsync_core::state::MemoryCredentialStore;
/// use dhcpsync_core::traits::CredentialStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryCredentialStore::new();
///     assert!(store.get("10.10.229.124").await?.is_none());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<HashMap<String, Credential>>>,
}

impl MemoryCredentialStore {
    /// Create a new empty memory credential store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored credentials
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, device_ip: &str) -> Result<Option<Credential>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(device_ip).cloned())
    }

    async fn put(&self, credential: &Credential) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(credential.device_ip.clone(), credential.clone());
        Ok(())
    }

    async fn delete(&self, device_ip: &str) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        Ok(guard.remove(device_ip).is_some())
    }

    async fn list(&self) -> Result<Vec<Credential>, Error> {
        let guard = self.inner.read().await;
        let mut credentials: Vec<Credential> = guard.values().cloned().collect();
        credentials.sort_by(|a, b| a.device_ip.cmp(&b.device_ip));
        Ok(credentials)
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}

/// In-memory backup store
#[derive(Debug, Clone, Default)]
pub struct MemoryBackupStore {
    inner: Arc<RwLock<HashMap<String, Vec<Backup>>>>,
}

impl MemoryBackupStore {
    /// Create a new empty memory backup store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn insert(&self, backup: &Backup) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let backups = guard.entry(backup.device_ip.clone()).or_default();

        if backups.iter().any(|b| b.filename == backup.filename) {
            return Err(Error::backup_store(format!(
                "Backup {} already exists for {}",
                backup.filename, backup.device_ip
            )));
        }

        backups.push(backup.clone());
        Ok(())
    }

    async fn list(&self, device_ip: &str) -> Result<Vec<Backup>, Error> {
        let guard = self.inner.read().await;
        let mut backups = guard.get(device_ip).cloned().unwrap_or_default();
        backups.sort_by(Backup::newest_first);
        Ok(backups)
    }

    async fn get(&self, device_ip: &str, filename: &str) -> Result<Option<Backup>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(device_ip)
            .and_then(|backups| backups.iter().find(|b| b.filename == filename))
            .cloned())
    }

    async fn delete(&self, device_ip: &str, filename: &str) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        let Some(backups) = guard.get_mut(device_ip) else {
            return Ok(false);
        };

        let before = backups.len();
        backups.retain(|b| b.filename != filename);
        let removed = backups.len() != before;

        if backups.is_empty() {
            guard.remove(device_ip);
        }
        Ok(removed)
    }

    async fn devices(&self) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        let mut devices: Vec<String> = guard.keys().cloned().collect();
        devices.sort();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretString;
    use chrono::{Duration, Utc};

    fn credential(device_ip: &str, username: &str) -> Credential {
        Credential {
            device_ip: device_ip.to_string(),
            username: username.to_string(),
            secret: SecretString::new("pw"),
            ssh_access: true,
            verified_at: Utc::now(),
        }
    }

    fn backup(filename: &str, age_secs: i64) -> Backup {
        Backup {
            device_ip: "10.0.0.1".to_string(),
            filename: filename.to_string(),
            content: format!("content of {}", filename),
            created_at: Utc::now() - Duration::seconds(age_secs),
            sequence: 0,
        }
    }

    #[tokio::test]
    async fn test_memory_credential_store_replace_and_delete() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty().await);

        store.put(&credential("10.0.0.1", "admin")).await.unwrap();
        store.put(&credential("10.0.0.1", "operator")).await.unwrap();
        assert_eq!(store.len().await, 1);

        let stored = store.get("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(stored.username, "operator");

        assert!(store.delete("10.0.0.1").await.unwrap());
        assert!(!store.delete("10.0.0.1").await.unwrap());
        assert!(store.get("10.0.0.1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_credential_store_list_sorted() {
        let store = MemoryCredentialStore::new();
        store.put(&credential("10.0.0.2", "b")).await.unwrap();
        store.put(&credential("10.0.0.1", "a")).await.unwrap();

        let listed: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.device_ip)
            .collect();
        assert_eq!(listed, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_memory_backup_store_refuses_duplicate_filename() {
        let store = MemoryBackupStore::new();
        store.insert(&backup("bak.1", 10)).await.unwrap();

        let err = store.insert(&backup("bak.1", 0)).await.unwrap_err();
        assert!(matches!(err, Error::BackupStore(_)));

        let kept = store.get("10.0.0.1", "bak.1").await.unwrap().unwrap();
        assert_eq!(kept.content, "content of bak.1");
    }

    #[tokio::test]
    async fn test_memory_backup_store_lists_newest_first() {
        let store = MemoryBackupStore::new();
        store.insert(&backup("old", 30)).await.unwrap();
        store.insert(&backup("new", 0)).await.unwrap();
        store.insert(&backup("mid", 15)).await.unwrap();

        let names: Vec<String> = store
            .list("10.0.0.1")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.filename)
            .collect();
        assert_eq!(names, vec!["new", "mid", "old"]);

        assert!(store.delete("10.0.0.1", "old").await.unwrap());
        assert!(!store.delete("10.0.0.1", "old").await.unwrap());
        assert_eq!(store.devices().await.unwrap(), vec!["10.0.0.1"]);
    }
}
