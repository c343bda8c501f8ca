// # File Stores
//
// File-based implementations of CredentialStore and BackupStore.
//
// ## Credentials
//
// One JSON document holding every credential:
//
// ```json
// {
//   "version": "1.0",
//   "credentials": {
//     "10.10.229.124": {
//       "device_ip": "10.10.229.124",
//       "username": "admin",
//       "secret": "...",
//       "ssh_access": true,
//       "verified_at": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```
//
// - Atomic writes: write-then-rename
// - Automatic backup: keeps `.backup` of the last known good document
// - Recovery: falls back to `.backup` if the main document is corrupted
//
// ## Backups
//
// One directory per device under the store root, one JSON document per
// backup (`<root>/<hex device>/<hex filename>.json`). Documents are published with
// a hard link from a temporary file, which fails if the name is taken, so
// an existing backup is never overwritten.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::traits::backup_store::{Backup, BackupStore};
use crate::traits::credential_store::{Credential, CredentialStore};
use crate::Error;

/// Credential file format version
/// Used for future migration if format changes
const CREDENTIAL_FILE_VERSION: &str = "1.0";

/// File-based credential store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use dhcpsync_core::state::FileCredentialStore;
/// use dhcpsync_core::traits::CredentialStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCredentialStore::new("/var/lib/dhcpsync/credentials.json").await?;
///     for credential in store.list().await? {
///         println!("{} ({})", credential.device_ip, credential.username);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    credentials: HashMap<String, Credential>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CredentialFileFormat {
    version: String,
    credentials: HashMap<String, Credential>,
}

impl FileCredentialStore {
    /// Create or load a file credential store
    ///
    /// This will:
    /// 1. Try to load the existing credential file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty state
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create credential directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let credentials = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                credentials,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, Credential>, Error> {
        match Self::load(path).await {
            Ok(credentials) => {
                tracing::debug!("Loaded {} credential(s) from file", credentials.len());
                Ok(credentials)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Credential file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty state.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(credentials) => {
                        tracing::info!(
                            "Recovered {} credential(s) from backup",
                            credentials.len()
                        );
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore credential file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(credentials)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty state.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<HashMap<String, Credential>, Error> {
        if !path.exists() {
            tracing::debug!("Credential file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::credential_store(format!(
                "Failed to read credential file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: CredentialFileFormat = serde_json::from_str(&content)?;

        if file.version != CREDENTIAL_FILE_VERSION {
            tracing::warn!(
                "Credential file version mismatch: expected {}, got {}. Attempting to load anyway.",
                CREDENTIAL_FILE_VERSION,
                file.version
            );
        }

        Ok(file.credentials)
    }

    async fn write(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;

        let file = CredentialFileFormat {
            version: CREDENTIAL_FILE_VERSION.to_string(),
            credentials: guard.credentials.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        write_file_synced(&temp_path, json.as_bytes())
            .await
            .map_err(|e| {
                Error::credential_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create credential file backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::credential_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        guard.dirty = false;
        tracing::trace!("Credentials written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, device_ip: &str) -> Result<Option<Credential>, Error> {
        let guard = self.state.read().await;
        Ok(guard.credentials.get(device_ip).cloned())
    }

    async fn put(&self, credential: &Credential) -> Result<(), Error> {
        {
            let mut guard = self.state.write().await;
            guard
                .credentials
                .insert(credential.device_ip.clone(), credential.clone());
            guard.dirty = true;
        }

        // Immediate write for durability
        self.write().await
    }

    async fn delete(&self, device_ip: &str) -> Result<bool, Error> {
        let removed = {
            let mut guard = self.state.write().await;
            let removed = guard.credentials.remove(device_ip).is_some();
            guard.dirty |= removed;
            removed
        };

        if removed {
            self.write().await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<Credential>, Error> {
        let guard = self.state.read().await;
        let mut credentials: Vec<Credential> = guard.credentials.values().cloned().collect();
        credentials.sort_by(|a, b| a.device_ip.cmp(&b.device_ip));
        Ok(credentials)
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write().await } else { Ok(()) }
    }
}

/// File-based backup store
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    root: PathBuf,
}

impl FileBackupStore {
    /// Open a backup store rooted at `root`, creating it if needed
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::config(format!(
                "Failed to create backup directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    fn device_dir(&self, device_ip: &str) -> PathBuf {
        self.root.join(path_component(device_ip))
    }

    fn document_path(&self, device_ip: &str, filename: &str) -> PathBuf {
        self.device_dir(device_ip)
            .join(format!("{}.json", path_component(filename)))
    }

    async fn read_document(path: &Path) -> Result<Backup, Error> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::backup_store(format!("Failed to read backup {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn insert(&self, backup: &Backup) -> Result<(), Error> {
        let dir = self.device_dir(&backup.device_ip);
        fs::create_dir_all(&dir).await?;

        let final_path = self.document_path(&backup.device_ip, &backup.filename);
        let temp_path = dir.join(format!(".{}.tmp", path_component(&backup.filename)));

        let json = serde_json::to_string_pretty(backup)?;
        write_file_synced(&temp_path, json.as_bytes()).await?;

        let linked = fs::hard_link(&temp_path, &final_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            tracing::warn!("Failed to remove {}: {}", temp_path.display(), e);
        }

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::backup_store(format!(
                    "Backup {} already exists for {}",
                    backup.filename, backup.device_ip
                )))
            }
            Err(e) => Err(Error::backup_store(format!(
                "Failed to publish backup {}: {}",
                final_path.display(),
                e
            ))),
        }
    }

    async fn list(&self, device_ip: &str) -> Result<Vec<Backup>, Error> {
        let dir = self.device_dir(device_ip);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            match Self::read_document(&path).await {
                Ok(backup) if backup.device_ip == device_ip => backups.push(backup),
                Ok(backup) => tracing::warn!(
                    "Ignoring backup {} of {} filed under {}",
                    backup.filename,
                    backup.device_ip,
                    device_ip
                ),
                Err(e) => tracing::warn!("Skipping unreadable backup {}: {}", path.display(), e),
            }
        }

        backups.sort_by(Backup::newest_first);
        Ok(backups)
    }

    async fn get(&self, device_ip: &str, filename: &str) -> Result<Option<Backup>, Error> {
        let path = self.document_path(device_ip, filename);
        if !path.exists() {
            return Ok(None);
        }
        let backup = Self::read_document(&path).await?;
        Ok((backup.device_ip == device_ip && backup.filename == filename).then_some(backup))
    }

    async fn delete(&self, device_ip: &str, filename: &str) -> Result<bool, Error> {
        let path = self.document_path(device_ip, filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::backup_store(format!(
                "Failed to delete backup {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn devices(&self) -> Result<Vec<String>, Error> {
        let mut devices = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(decode_component) {
                Some(device_ip) => devices.push(device_ip),
                None => tracing::warn!("Ignoring unexpected directory {}", entry.path().display()),
            }
        }
        devices.sort();
        Ok(devices)
    }
}

async fn write_file_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

fn is_document(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == "json")
}

/// Map an identifier onto a single path component
///
/// Hex keeps distinct identifiers distinct and never yields `.`, `..` or a
/// separator. The empty identifier maps to `_`, which hex never produces.
fn path_component(name: &str) -> String {
    if name.is_empty() {
        "_".to_string()
    } else {
        hex::encode(name)
    }
}

fn decode_component(component: &str) -> Option<String> {
    if component == "_" {
        return Some(String::new());
    }
    String::from_utf8(hex::decode(component).ok()?).ok()
}
