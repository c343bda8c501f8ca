//! Request-layer facade
//!
//! [`DhcpService`] wires the credential service, synchronizer, archive and
//! poller together and exposes one method per request-layer operation.
//! Payloads are validated before anything is dispatched.
//!
//! Deleting a credential also stops polling the device and forgets its
//! lease snapshot. Backups are left in place.

pub mod request;

pub use request::{
    DeviceRequest, PutConfig, PutConfigRequest, PutCredential, PutCredentialRequest, Schedule,
    ScheduleRequest, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
};

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::archive::BackupArchive;
use crate::config::DhcpSyncConfig;
use crate::credentials::{AccessVerifier, CredentialService};
use crate::error::Result;
use crate::leases::LeaseRecord;
use crate::poller::{CycleOutcome, LeasePoller, PollJob, PollerEvent};
use crate::state;
use crate::sync::{ConfigSynchronizer, SyncOutcome};
use crate::traits::{Backup, BackupMeta, BackupStore, CredentialStore, CredentialView, RemoteTransport};

/// One handle onto every operation the request layer needs
pub struct DhcpService {
    config: DhcpSyncConfig,
    credentials: Arc<CredentialService>,
    archive: Arc<BackupArchive>,
    synchronizer: ConfigSynchronizer,
    poller: Arc<LeasePoller>,
}

impl DhcpService {
    /// Build a service with stores described by `config`
    ///
    /// # Returns
    ///
    /// A tuple of (service, event_receiver) where event_receiver yields
    /// lease poller events.
    pub async fn from_config(
        config: DhcpSyncConfig,
        transport: Arc<dyn RemoteTransport>,
    ) -> Result<(Self, mpsc::Receiver<PollerEvent>)> {
        config.validate()?;
        let credential_store = state::credential_store_from_config(&config.credential_store).await?;
        let backup_store = state::backup_store_from_config(&config.backup_store).await?;
        Self::new(config, transport, credential_store, backup_store)
    }

    /// Build a service over explicit stores
    pub fn new(
        config: DhcpSyncConfig,
        transport: Arc<dyn RemoteTransport>,
        credential_store: Arc<dyn CredentialStore>,
        backup_store: Arc<dyn BackupStore>,
    ) -> Result<(Self, mpsc::Receiver<PollerEvent>)> {
        config.validate()?;

        let remote = &config.remote;
        let verifier = AccessVerifier::new(
            transport.clone(),
            remote.connect_timeout(),
            remote.operation_timeout(),
            remote.probe_command.clone(),
        );
        let credentials = Arc::new(CredentialService::new(credential_store.clone(), verifier));

        let archive = Arc::new(BackupArchive::new(
            backup_store,
            config.backup.prefix.clone(),
            config.backup.max_backups,
        )?);

        let synchronizer = ConfigSynchronizer::new(
            credentials.clone(),
            transport.clone(),
            archive.clone(),
            config.paths.config_path.clone(),
            remote.connect_timeout(),
            remote.operation_timeout(),
        );

        let (poller, event_rx) = LeasePoller::new(
            credential_store,
            transport,
            config.paths.leases_path.clone(),
            remote.connect_timeout(),
            config.poller.cycle_timeout(),
            config.poller.event_channel_capacity,
        );

        let service = Self {
            config,
            credentials,
            archive,
            synchronizer,
            poller,
        };
        Ok((service, event_rx))
    }

    pub fn config(&self) -> &DhcpSyncConfig {
        &self.config
    }

    pub fn poller(&self) -> &Arc<LeasePoller> {
        &self.poller
    }

    pub fn archive(&self) -> &Arc<BackupArchive> {
        &self.archive
    }

    /// Store or replace a credential; the reachability probe runs inline
    pub async fn put_credential(&self, request: PutCredentialRequest) -> Result<CredentialView> {
        let request = request.validate()?;
        let view = self
            .credentials
            .put(&request.device_ip, &request.username, request.password)
            .await?;

        if self.config.poller.autostart && self.poller.job(&view.device_ip).is_none() {
            self.poller
                .schedule(&view.device_ip, self.config.poller.interval())?;
        }
        Ok(view)
    }

    pub async fn get_credential(&self, request: impl Into<DeviceRequest>) -> Result<CredentialView> {
        let device_ip = request.into().validate()?;
        self.credentials.get(&device_ip).await
    }

    pub async fn list_credentials(&self) -> Result<Vec<CredentialView>> {
        self.credentials.list().await
    }

    /// Remove a credential, stop polling and drop the lease snapshot
    ///
    /// Idempotent. Returns whether a credential existed.
    pub async fn delete_credential(&self, request: impl Into<DeviceRequest>) -> Result<bool> {
        let device_ip = request.into().validate()?;
        let removed = self.credentials.delete(&device_ip).await?;
        self.poller.unschedule(&device_ip);
        self.poller.clear(&device_ip).await;
        Ok(removed)
    }

    /// Deploy configuration and return the new checksum
    ///
    /// Unchanged content fails with `Error::NoChangeDetected`.
    pub async fn put_config(&self, request: PutConfigRequest) -> Result<String> {
        self.apply_config(request).await?.into_result()
    }

    /// Deploy configuration and return the full outcome
    pub async fn apply_config(&self, request: PutConfigRequest) -> Result<SyncOutcome> {
        let request = request.validate()?;
        self.synchronizer
            .apply(&request.device_ip, &request.content)
            .await
    }

    pub async fn get_config(&self, request: impl Into<DeviceRequest>) -> Result<String> {
        let device_ip = request.into().validate()?;
        self.synchronizer.get(&device_ip).await
    }

    /// Backup metadata, newest first
    pub async fn list_backups(&self, request: impl Into<DeviceRequest>) -> Result<Vec<BackupMeta>> {
        let device_ip = request.into().validate()?;
        self.archive.list(&device_ip).await
    }

    pub async fn get_backup(
        &self,
        request: impl Into<DeviceRequest>,
        filename: &str,
    ) -> Result<Backup> {
        let device_ip = request.into().validate()?;
        self.archive.get(&device_ip, filename).await
    }

    /// Latest lease snapshot; empty before the first completed cycle
    pub async fn list_leases(&self, request: impl Into<DeviceRequest>) -> Result<Vec<LeaseRecord>> {
        let device_ip = request.into().validate()?;
        Ok(self.poller.list(&device_ip).await)
    }

    /// Create, re-time or nudge a device's poll job
    pub async fn schedule_polling(&self, request: ScheduleRequest) -> Result<PollJob> {
        let request = request.validate()?;

        let mut job = match (request.interval, self.poller.job(&request.device_ip)) {
            (Some(interval), _) => self.poller.schedule(&request.device_ip, interval)?,
            (None, Some(job)) => job,
            (None, None) => self
                .poller
                .schedule(&request.device_ip, self.config.poller.interval())?,
        };

        if let Some(at) = request.next_run {
            job = self.poller.set_next_run(&request.device_ip, at)?;
        }
        Ok(job)
    }

    /// Run the device's next scheduled cycle immediately
    pub async fn trigger_poll(&self, request: impl Into<DeviceRequest>) -> Result<PollJob> {
        let device_ip = request.into().validate()?;
        self.poller.trigger_now(&device_ip)
    }

    /// Run one cycle inline and wait for its outcome
    pub async fn poll_now(&self, request: impl Into<DeviceRequest>) -> Result<CycleOutcome> {
        let device_ip = request.into().validate()?;
        Ok(self.poller.run_cycle(&device_ip).await)
    }

    /// Schedule polling for every stored credential that has no job yet
    ///
    /// # Returns
    ///
    /// Number of jobs created.
    pub async fn schedule_all(&self) -> Result<usize> {
        let mut scheduled = 0;
        for view in self.credentials.list().await? {
            if self.poller.job(&view.device_ip).is_some() {
                continue;
            }
            self.poller
                .schedule(&view.device_ip, self.config.poller.interval())?;
            scheduled += 1;
        }
        info!("Scheduled lease polling for {} device(s)", scheduled);
        Ok(scheduled)
    }

    /// Stop the poller and flush the credential store
    pub async fn shutdown(&self) -> Result<()> {
        self.poller.shutdown();
        self.credentials.store().flush().await?;
        debug!("Credential store flushed");
        Ok(())
    }
}
