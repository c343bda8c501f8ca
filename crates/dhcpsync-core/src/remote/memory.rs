// # Memory Transport
//
// In-memory implementation of RemoteTransport.
//
// ## Purpose
//
// Simulates a set of managed devices, each with an accepted login, a
// reachability switch and a small filesystem. Lets the synchronizer, the
// verifier and the poller run end to end without a network. Used by the
// contract tests and by embedders that want a dry-run host.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::traits::transport::{CommandOutput, RemoteSession, RemoteTransport, SessionTarget};
use crate::Error;

#[derive(Debug, Clone, Default)]
struct RemoteHost {
    username: String,
    secret: String,
    reachable: bool,
    files: HashMap<String, Vec<u8>>,
    connect_delay: Option<Duration>,
    fail_writes: bool,
}

/// In-memory remote hosts
///
/// Cloning shares the same hosts, so a test can keep a handle while the
/// service owns another.
///
/// # Example
///
/// ```rust
/// use dhcpsync_core::remote::MemoryTransport;
///
/// let transport = MemoryTransport::new();
/// transport.add_host("10.10.229.124", "admin", "pw");
/// transport.set_file("10.10.229.124", "/etc/dhcp/dhcpd.conf", "option domain-name \"lab\";");
/// assert!(transport.file("10.10.229.124", "/etc/dhcp/dhcpd.conf").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    hosts: Arc<Mutex<HashMap<String, RemoteHost>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Create a transport with no hosts
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or reset) a reachable host accepting `username`/`secret`
    pub fn add_host(&self, host: &str, username: &str, secret: &str) {
        self.lock().insert(
            host.to_string(),
            RemoteHost {
                username: username.to_string(),
                secret: secret.to_string(),
                reachable: true,
                ..RemoteHost::default()
            },
        );
    }

    /// Make a host refuse or accept new connections
    pub fn set_reachable(&self, host: &str, reachable: bool) {
        if let Some(h) = self.lock().get_mut(host) {
            h.reachable = reachable;
        }
    }

    /// Delay every connection to `host` (simulates a hung device)
    pub fn set_connect_delay(&self, host: &str, delay: Option<Duration>) {
        if let Some(h) = self.lock().get_mut(host) {
            h.connect_delay = delay;
        }
    }

    /// Make file writes on `host` fail
    pub fn set_fail_writes(&self, host: &str, fail: bool) {
        if let Some(h) = self.lock().get_mut(host) {
            h.fail_writes = fail;
        }
    }

    /// Seed a file on a host
    pub fn set_file(&self, host: &str, path: &str, content: impl Into<Vec<u8>>) {
        if let Some(h) = self.lock().get_mut(host) {
            h.files.insert(path.to_string(), content.into());
        }
    }

    /// Remove a file from a host
    pub fn remove_file(&self, host: &str, path: &str) {
        if let Some(h) = self.lock().get_mut(host) {
            h.files.remove(path);
        }
    }

    /// Current contents of a file on a host
    pub fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(host)
            .and_then(|h| h.files.get(path))
            .cloned()
    }

    /// Number of successful connections so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RemoteHost>> {
        // A panicked test thread must not wedge every later call
        self.hosts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>, Error> {
        let delay = self.lock().get(&target.host).and_then(|h| h.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let hosts = self.lock();
            let host = hosts.get(&target.host).ok_or_else(|| {
                Error::connection(format!("{}: no route to host", target.host))
            })?;

            if !host.reachable {
                return Err(Error::connection(format!(
                    "{}: connection refused",
                    target.host
                )));
            }
            if host.username != target.username || host.secret != target.secret.expose() {
                return Err(Error::connection(format!(
                    "{}: authentication failed for {}",
                    target.host, target.username
                )));
            }
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            host: target.host.clone(),
            transport: self.clone(),
        }))
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySession {
    host: String,
    transport: MemoryTransport,
}

impl MemorySession {
    fn with_host<T>(&self, f: impl FnOnce(&mut RemoteHost) -> Result<T, Error>) -> Result<T, Error> {
        let mut hosts = self.transport.lock();
        match hosts.get_mut(&self.host) {
            Some(host) if host.reachable => f(host),
            _ => Err(Error::connection(format!("{}: connection lost", self.host))),
        }
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, Error> {
        self.with_host(|host| {
            let mut parts = command.splitn(2, ' ');
            let program = parts.next().unwrap_or_default();
            let arg = parts.next().unwrap_or_default().trim();

            Ok(match program {
                "echo" => CommandOutput {
                    stdout: format!("{}\n", arg),
                    ..CommandOutput::default()
                },
                "true" => CommandOutput::default(),
                "cat" => match host.files.get(arg) {
                    Some(bytes) => CommandOutput {
                        stdout: String::from_utf8_lossy(bytes).into_owned(),
                        ..CommandOutput::default()
                    },
                    None => CommandOutput {
                        stderr: format!("cat: {}: No such file or directory\n", arg),
                        exit_code: 1,
                        ..CommandOutput::default()
                    },
                },
                _ => CommandOutput {
                    stderr: format!("{}: command not found\n", program),
                    exit_code: 127,
                    ..CommandOutput::default()
                },
            })
        })
    }

    async fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        self.with_host(|host| Ok(host.files.get(path).cloned()))
    }

    async fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), Error> {
        self.with_host(|host| {
            if host.fail_writes {
                return Err(Error::remote(format!("tee: {}: Permission denied", path)));
            }
            host.files.insert(path.to_string(), content.to_vec());
            Ok(())
        })
    }

    async fn close(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretString;

    fn target(host: &str, secret: &str) -> SessionTarget {
        SessionTarget::new(host, "admin", SecretString::new(secret))
    }

    #[tokio::test]
    async fn test_connect_checks_credentials_and_reachability() {
        let transport = MemoryTransport::new();
        transport.add_host("10.0.0.1", "admin", "pw");

        assert!(transport.connect(&target("10.0.0.1", "pw")).await.is_ok());
        assert!(matches!(
            transport.connect(&target("10.0.0.1", "bad")).await,
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            transport.connect(&target("10.0.0.2", "pw")).await,
            Err(Error::Connection(_))
        ));

        transport.set_reachable("10.0.0.1", false);
        assert!(transport.connect(&target("10.0.0.1", "pw")).await.is_err());
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_session_file_round_trip_and_exec() {
        let transport = MemoryTransport::new();
        transport.add_host("10.0.0.1", "admin", "pw");

        let mut session = transport.connect(&target("10.0.0.1", "pw")).await.unwrap();
        assert_eq!(session.read_file("/etc/dhcp/dhcpd.conf").await.unwrap(), None);

        session
            .write_file("/etc/dhcp/dhcpd.conf", b"authoritative;")
            .await
            .unwrap();
        let out = session.exec("cat /etc/dhcp/dhcpd.conf").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "authoritative;");

        let out = session.exec("echo ok").await.unwrap();
        assert_eq!(out.stdout, "ok\n");
        assert_eq!(session.exec("reboot").await.unwrap().exit_code, 127);
        session.close().await.unwrap();

        assert_eq!(
            transport.file("10.0.0.1", "/etc/dhcp/dhcpd.conf"),
            Some(b"authoritative;".to_vec())
        );
    }
}
