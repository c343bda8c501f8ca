// # Remote Transport Trait
//
// Defines the interface for reaching a managed device over a remote shell.
//
// ## Purpose
//
// Everything the core does to a device (reachability probes, reading and
// overwriting the server configuration, fetching the lease database) goes
// through a short-lived session opened by a `RemoteTransport`. Sessions are
// opened per operation; nothing is pooled.
//
// ## Implementations
//
// - SSH (libssh2): `dhcpsync-ssh` crate
// - In-memory remote host: `crate::remote::MemoryTransport`
//
// ## Usage
//
// ```rust,ignore
// use dhcpsync_core::traits::{RemoteTransport, SessionTarget};
//
// let mut session = transport.connect(&target).await?;
// let output = session.exec("echo ok").await?;
// let config = session.read_file("/etc/dhcp/dhcpd.conf").await?;
// session.close().await?;
// ```

use async_trait::async_trait;

use crate::secret::SecretString;

/// Where and as whom to open a session
#[derive(Debug, Clone)]
pub struct SessionTarget {
    /// Device address (IP or hostname)
    pub host: String,
    /// Remote shell user
    pub username: String,
    /// Password for `username`
    pub secret: SecretString,
}

impl SessionTarget {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            secret,
        }
    }
}

/// Result of running a command on the remote host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for remote transport implementations
///
/// # Errors
///
/// `connect` must report unreachable hosts, refused connections, failed
/// authentication and timeouts as [`crate::Error::Connection`].
///
/// # Timeouts
///
/// Implementations bound every call they make; a single unreachable device
/// must not stall the caller indefinitely.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Open an authenticated session
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>, crate::Error>;

    /// Transport name for logs
    fn transport_name(&self) -> &'static str;
}

/// An open, authenticated remote session
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command and collect its output
    ///
    /// A non-zero exit status is reported in [`CommandOutput::exit_code`],
    /// not as an error.
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, crate::Error>;

    /// Read a whole file
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))`: File contents
    /// - `Ok(None)`: File does not exist
    /// - `Err(Error)`: Session or permission failure
    async fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>, crate::Error>;

    /// Overwrite a whole file with `content`, creating it if needed
    async fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), crate::Error>;

    /// Close the session
    async fn close(self: Box<Self>) -> Result<(), crate::Error>;
}
