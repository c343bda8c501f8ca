//! Credential store front-end and remote access verifier
//!
//! [`AccessVerifier`] answers one question: can a session be opened with
//! these credentials right now? [`CredentialService`] stores credentials and
//! records that answer as `ssh_access` at write time. Reachability is
//! informational: an unreachable device is still stored. Reads never
//! re-probe, so `ssh_access` reflects the last `put`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::remote;
use crate::secret::SecretString;
use crate::traits::{Credential, CredentialStore, CredentialView, RemoteTransport, SessionTarget};

/// Probes remote shell access without keeping the session
pub struct AccessVerifier {
    transport: Arc<dyn RemoteTransport>,
    connect_timeout: Duration,
    operation_timeout: Duration,
    probe_command: String,
}

impl AccessVerifier {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        connect_timeout: Duration,
        operation_timeout: Duration,
        probe_command: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            connect_timeout,
            operation_timeout,
            probe_command: probe_command.into(),
        }
    }

    /// Connect, run the probe command, disconnect
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Session opened and the probe exited 0
    /// - `Err(Error::Connection)`: Unreachable, refused, bad login or timeout
    /// - `Err(Error::Remote)`: Session opened but the probe failed
    pub async fn probe(&self, target: &SessionTarget) -> Result<()> {
        let mut session =
            remote::open_session(self.transport.as_ref(), target, self.connect_timeout).await?;

        let output = remote::bounded(
            &format!("probe on {}", target.host),
            self.operation_timeout,
            session.exec(&self.probe_command),
        )
        .await;
        remote::close_quietly(session, &target.host).await;

        let output = output?;
        if !output.success() {
            return Err(Error::remote(format!(
                "probe `{}` exited with status {}: {}",
                self.probe_command,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Reachability as a flag; failures are logged, never returned
    pub async fn is_reachable(&self, target: &SessionTarget) -> bool {
        match self.probe(target).await {
            Ok(()) => {
                debug!("Remote access to {} verified", target.host);
                true
            }
            Err(e) => {
                warn!("Remote access to {} failed: {}", target.host, e);
                false
            }
        }
    }
}

/// Credential CRUD with write-time reachability checks
pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
    verifier: AccessVerifier,
}

impl CredentialService {
    pub fn new(store: Arc<dyn CredentialStore>, verifier: AccessVerifier) -> Self {
        Self { store, verifier }
    }

    /// Store or replace the credential for a device
    ///
    /// Performs a live probe and records the result as `ssh_access`. Only
    /// missing fields or a storage failure make this fail.
    pub async fn put(
        &self,
        device_ip: &str,
        username: &str,
        secret: SecretString,
    ) -> Result<CredentialView> {
        let mut missing = Vec::new();
        if device_ip.trim().is_empty() {
            missing.push("device_ip");
        }
        if username.trim().is_empty() {
            missing.push("username");
        }
        if secret.is_empty() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let target = SessionTarget::new(device_ip.trim(), username.trim(), secret);
        let ssh_access = self.verifier.is_reachable(&target).await;

        let credential = Credential {
            device_ip: target.host,
            username: target.username,
            secret: target.secret,
            ssh_access,
            verified_at: chrono::Utc::now(),
        };
        self.store.put(&credential).await?;

        info!(
            "Stored credential for {} (user {}, ssh_access={})",
            credential.device_ip, credential.username, ssh_access
        );
        Ok(credential.view())
    }

    /// Public fields of the stored credential
    pub async fn get(&self, device_ip: &str) -> Result<CredentialView> {
        self.resolve(device_ip).await.map(|c| c.view())
    }

    /// Every stored credential's public fields
    pub async fn list(&self) -> Result<Vec<CredentialView>> {
        Ok(self.store.list().await?.iter().map(Credential::view).collect())
    }

    /// Remove the credential; absence is not an error
    ///
    /// # Returns
    ///
    /// Whether a credential was actually removed.
    pub async fn delete(&self, device_ip: &str) -> Result<bool> {
        let removed = self.store.delete(device_ip).await?;
        if removed {
            info!("Deleted credential for {}", device_ip);
        } else {
            debug!("No credential to delete for {}", device_ip);
        }
        Ok(removed)
    }

    /// Full credential (with secret) for internal remote access
    pub async fn resolve(&self, device_ip: &str) -> Result<Credential> {
        self.store
            .get(device_ip)
            .await?
            .ok_or_else(|| Error::not_found(format!("no credential for device {}", device_ip)))
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryTransport;
    use crate::state::MemoryCredentialStore;

    fn service(transport: &MemoryTransport) -> CredentialService {
        let verifier = AccessVerifier::new(
            Arc::new(transport.clone()),
            Duration::from_millis(200),
            Duration::from_millis(200),
            "echo ok",
        );
        CredentialService::new(Arc::new(MemoryCredentialStore::new()), verifier)
    }

    #[tokio::test]
    async fn test_put_records_reachability() {
        let transport = MemoryTransport::new();
        transport.add_host("10.10.229.124", "admin", "pw");
        let service = service(&transport);

        let view = service
            .put("10.10.229.124", "admin", SecretString::new("pw"))
            .await
            .unwrap();
        assert!(view.ssh_access);
        assert_eq!(view.username, "admin");

        // Wrong password is stored anyway, just unreachable
        let view = service
            .put("10.10.229.124", "admin", SecretString::new("nope"))
            .await
            .unwrap();
        assert!(!view.ssh_access);
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_rejects_missing_fields() {
        let service = service(&MemoryTransport::new());
        let err = service
            .put("", "admin", SecretString::new(""))
            .await
            .unwrap_err();
        match err {
            Error::Validation(msg) => {
                assert!(msg.contains("device_ip"));
                assert!(msg.contains("password"));
                assert!(!msg.contains("username"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_does_not_reprobe() {
        let transport = MemoryTransport::new();
        transport.add_host("10.0.0.1", "admin", "pw");
        let service = service(&transport);

        service
            .put("10.0.0.1", "admin", SecretString::new("pw"))
            .await
            .unwrap();
        let probes = transport.connect_count();

        transport.set_reachable("10.0.0.1", false);
        let view = service.get("10.0.0.1").await.unwrap();
        assert!(view.ssh_access, "stale flag is reported as stored");
        assert_eq!(transport.connect_count(), probes);
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let transport = MemoryTransport::new();
        transport.add_host("10.0.0.1", "admin", "pw");
        transport.set_connect_delay("10.0.0.1", Some(Duration::from_secs(5)));
        let service = service(&transport);

        let view = service
            .put("10.0.0.1", "admin", SecretString::new("pw"))
            .await
            .unwrap();
        assert!(!view.ssh_access);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_get_reports_absence() {
        let transport = MemoryTransport::new();
        let service = service(&transport);
        service
            .put("10.0.0.1", "admin", SecretString::new("pw"))
            .await
            .unwrap();

        assert!(service.delete("10.0.0.1").await.unwrap());
        assert!(!service.delete("10.0.0.1").await.unwrap());
        assert!(matches!(
            service.get("10.0.0.1").await,
            Err(Error::NotFound(_))
        ));
    }
}
