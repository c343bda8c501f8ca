//! Checksum-gated configuration deployment
//!
//! ## Flow
//!
//! ```text
//!  apply(device, new)
//!        │
//!        ▼
//!  resolve credential ── none ──▶ NotFound
//!        │
//!  ┌─────┴──────── device lock ─────────────────────────────┐
//!  │ open session ── fail ──▶ Connection                    │
//!  │ read deployed file (absent = nothing deployed)         │
//!  │ sha256(current) == sha256(new) ──▶ Unchanged           │
//!  │ archive current (only if a file was deployed)          │
//!  │ overwrite remote file                                  │
//!  └────────────────────────────────────────────────────────┘
//!        │
//!        ▼
//!  Created / Updated
//! ```
//!
//! The deployed file is read fresh on every call; nothing is cached, so
//! out-of-band edits on the device are always seen. The backup is committed
//! before the overwrite starts, so a failed write never loses the prior
//! version.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::archive::{BackupArchive, RecordedBackup};
use crate::credentials::CredentialService;
use crate::error::{Error, Result};
use crate::lock::DeviceLocks;
use crate::remote;
use crate::traits::{RemoteSession, RemoteTransport};

/// Lowercase hex SHA-256 of `content`
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Outcome of [`ConfigSynchronizer::apply`]
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Nothing was deployed before; file created, no backup taken
    Created { checksum: String },

    /// Prior configuration archived, then overwritten
    Updated {
        checksum: String,
        previous_checksum: String,
        backup: RecordedBackup,
    },

    /// Deployed configuration already matches; nothing written
    Unchanged { checksum: String },
}

impl SyncOutcome {
    /// Checksum of the content now deployed
    pub fn checksum(&self) -> &str {
        match self {
            SyncOutcome::Created { checksum }
            | SyncOutcome::Updated { checksum, .. }
            | SyncOutcome::Unchanged { checksum } => checksum,
        }
    }

    /// Whether the remote file was written
    pub fn is_written(&self) -> bool {
        !matches!(self, SyncOutcome::Unchanged { .. })
    }

    /// New checksum on a write; [`Error::NoChangeDetected`] otherwise
    pub fn into_result(self) -> Result<String> {
        match self {
            SyncOutcome::Unchanged { .. } => Err(Error::NoChangeDetected),
            SyncOutcome::Created { checksum } | SyncOutcome::Updated { checksum, .. } => {
                Ok(checksum)
            }
        }
    }
}

/// Deploys configuration files to managed devices
pub struct ConfigSynchronizer {
    credentials: Arc<CredentialService>,
    transport: Arc<dyn RemoteTransport>,
    archive: Arc<BackupArchive>,
    config_path: String,
    connect_timeout: Duration,
    operation_timeout: Duration,
    locks: DeviceLocks,
}

impl ConfigSynchronizer {
    pub fn new(
        credentials: Arc<CredentialService>,
        transport: Arc<dyn RemoteTransport>,
        archive: Arc<BackupArchive>,
        config_path: impl Into<String>,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            transport,
            archive,
            config_path: config_path.into(),
            connect_timeout,
            operation_timeout,
            locks: DeviceLocks::new(),
        }
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    /// Deploy `content` to `device_ip` unless it is already deployed
    pub async fn apply(&self, device_ip: &str, content: &str) -> Result<SyncOutcome> {
        let credential = self.credentials.resolve(device_ip).await?;

        // read → compare → backup → write is one critical region per device
        let _guard = self.locks.lock(device_ip).await;

        let target = credential.target();
        let mut session =
            remote::open_session(self.transport.as_ref(), &target, self.connect_timeout).await?;

        let outcome = self.apply_in_session(session.as_mut(), device_ip, content).await;
        remote::close_quietly(session, device_ip).await;

        match &outcome {
            Ok(SyncOutcome::Created { checksum }) => {
                info!("Deployed new configuration to {} ({})", device_ip, checksum)
            }
            Ok(SyncOutcome::Updated {
                checksum, backup, ..
            }) => info!(
                "Updated configuration on {} ({}), previous saved as {}",
                device_ip, checksum, backup.backup.filename
            ),
            Ok(SyncOutcome::Unchanged { .. }) => {
                debug!("Configuration on {} already up to date", device_ip)
            }
            Err(e) => error!("Configuration sync to {} failed: {}", device_ip, e),
        }
        outcome
    }

    async fn apply_in_session(
        &self,
        session: &mut dyn RemoteSession,
        device_ip: &str,
        content: &str,
    ) -> Result<SyncOutcome> {
        let current = self.read_deployed(session, device_ip).await?;

        let new_checksum = checksum(content.as_bytes());
        let current_checksum = checksum(current.as_deref().unwrap_or_default());

        if current_checksum == new_checksum {
            return Ok(SyncOutcome::Unchanged {
                checksum: new_checksum,
            });
        }

        // Backups hold text; a deployed file that is not UTF-8 is left alone
        let backup = match &current {
            Some(bytes) => {
                let previous = std::str::from_utf8(bytes).map_err(|e| {
                    Error::remote(format!(
                        "{} on {} is not valid UTF-8 and cannot be archived: {}",
                        self.config_path, device_ip, e
                    ))
                })?;
                Some(self.archive.record(device_ip, previous).await?)
            }
            None => None,
        };

        remote::bounded(
            &format!("write {} on {}", self.config_path, device_ip),
            self.operation_timeout,
            session.write_file(&self.config_path, content.as_bytes()),
        )
        .await?;

        Ok(match backup {
            Some(backup) => SyncOutcome::Updated {
                checksum: new_checksum,
                previous_checksum: current_checksum,
                backup,
            },
            None => SyncOutcome::Created {
                checksum: new_checksum,
            },
        })
    }

    /// Currently deployed configuration, verbatim
    pub async fn get(&self, device_ip: &str) -> Result<String> {
        let credential = self.credentials.resolve(device_ip).await?;
        let target = credential.target();

        let mut session =
            remote::open_session(self.transport.as_ref(), &target, self.connect_timeout).await?;
        let current = self.read_deployed(session.as_mut(), device_ip).await;
        remote::close_quietly(session, device_ip).await;

        match current? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => Err(Error::not_found(format!(
                "{} does not exist on device {}",
                self.config_path, device_ip
            ))),
        }
    }

    async fn read_deployed(
        &self,
        session: &mut dyn RemoteSession,
        device_ip: &str,
    ) -> Result<Option<Vec<u8>>> {
        remote::bounded(
            &format!("read {} on {}", self.config_path, device_ip),
            self.operation_timeout,
            session.read_file(&self.config_path),
        )
        .await
    }
}
