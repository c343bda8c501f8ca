// # Credential Store Trait
//
// Defines the interface for persisting remote shell credentials.
//
// ## Purpose
//
// Holds at most one active credential per managed device. Replacing a
// credential overwrites the prior record; deleting it removes all access.
//
// ## Implementations
//
// - In-memory: `MemoryCredentialStore`
// - File-based (JSON, atomic writes): `FileCredentialStore`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::secret::SecretString;
use crate::traits::transport::SessionTarget;

/// Stored credential for one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Device address; the store key
    pub device_ip: String,
    /// Remote shell user
    pub username: String,
    /// Password, never returned to callers
    pub secret: SecretString,
    /// Whether a session could be opened the last time this was stored
    pub ssh_access: bool,
    /// When `ssh_access` was computed
    pub verified_at: chrono::DateTime<chrono::Utc>,
}

impl Credential {
    /// Session target for this credential
    pub fn target(&self) -> SessionTarget {
        SessionTarget::new(&self.device_ip, &self.username, self.secret.clone())
    }

    /// Public fields only
    pub fn view(&self) -> CredentialView {
        CredentialView {
            device_ip: self.device_ip.clone(),
            username: self.username.clone(),
            ssh_access: self.ssh_access,
            verified_at: self.verified_at,
        }
    }
}

/// Public view of a stored credential (no secret)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialView {
    pub device_ip: String,
    pub username: String,
    pub ssh_access: bool,
    pub verified_at: chrono::DateTime<chrono::Utc>,
}

/// Trait for credential store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Get the credential for a device
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Credential))`: Stored credential
    /// - `Ok(None)`: No credential for the device
    /// - `Err(Error)`: Storage error
    async fn get(&self, device_ip: &str) -> Result<Option<Credential>, crate::Error>;

    /// Store a credential, replacing any prior one for the same device
    async fn put(&self, credential: &Credential) -> Result<(), crate::Error>;

    /// Delete the credential for a device
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: A credential was removed
    /// - `Ok(false)`: Nothing was stored
    /// - `Err(Error)`: Storage error
    async fn delete(&self, device_ip: &str) -> Result<bool, crate::Error>;

    /// List all stored credentials, ordered by device address
    async fn list(&self) -> Result<Vec<Credential>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
