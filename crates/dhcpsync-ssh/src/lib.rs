// # SSH Remote Transport
//
// This crate provides the SSH implementation of `RemoteTransport` for the
// DHCP sync system, built on libssh2.
//
// ## Behavior
//
// - Password authentication only, one TCP connection per session
// - libssh2 is blocking; every call runs on tokio's blocking pool with the
//   libssh2 timeout set, so a hung device costs a blocking thread, never a
//   runtime worker
// - Each session operation gets a wall-clock budget of 80% of the operation
//   timeout, re-armed before every libssh2 call. The blocking work ends on
//   its own before the caller's timeout fires, so a write never outlives
//   the caller that is waiting for it
// - Files are read with `cat` and written with `tee` over an exec channel,
//   optionally through `sudo -n` (the DHCP config is usually root-owned)
// - A missing file is detected with `test -e` before reading
//
// ## Security Requirements
//
// - Passwords are never logged; `SessionTarget` redacts them
// - `sudo -n` never prompts; a device that requires a sudo password fails
//   the operation instead of hanging
//
// ## Limitations
//
// - Host keys are not verified
// - Keyboard-interactive and public-key authentication are not supported

use async_trait::async_trait;
use dhcpsync_core::config::RemoteConfig;
use dhcpsync_core::traits::{CommandOutput, RemoteSession, RemoteTransport, SessionTarget};
use dhcpsync_core::Error;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exit status of `test -e` for a missing path
const TEST_MISSING_STATUS: i32 = 1;

/// Errors raised inside the blocking SSH layer
#[derive(thiserror::Error, Debug)]
pub enum SshError {
    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("TCP connect to {addr} failed: {source}")]
    Tcp {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("SSH handshake with {host} failed: {source}")]
    Handshake { host: String, source: ssh2::Error },

    #[error("authentication failed for {user}@{host}")]
    Auth { host: String, user: String },

    #[error("`{command}` exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking SSH task failed: {0}")]
    Join(String),

    #[error("operation exceeded its {0:?} budget")]
    Deadline(Duration),
}

impl SshError {
    fn is_timeout(&self) -> bool {
        match self {
            SshError::Deadline(_) => true,
            SshError::Ssh(e) => matches!(e.code(), ssh2::ErrorCode::Session(-9)),
            SshError::Io(e) | SshError::Tcp { source: e, .. } => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                )
            }
            _ => false,
        }
    }
}

impl From<SshError> for Error {
    fn from(e: SshError) -> Self {
        match e {
            SshError::Resolve(_)
            | SshError::Tcp { .. }
            | SshError::Handshake { .. }
            | SshError::Auth { .. } => Error::connection(e.to_string()),
            ref other if other.is_timeout() => Error::connection(e.to_string()),
            other => Error::remote(other.to_string()),
        }
    }
}

/// SSH transport
#[derive(Debug, Clone)]
pub struct SshTransport {
    port: u16,
    connect_timeout: Duration,
    operation_timeout: Duration,
    use_sudo: bool,
}

impl SshTransport {
    pub fn new(
        port: u16,
        connect_timeout: Duration,
        operation_timeout: Duration,
        use_sudo: bool,
    ) -> Self {
        Self {
            port,
            connect_timeout,
            operation_timeout,
            use_sudo,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(
            config.port,
            config.connect_timeout(),
            config.operation_timeout(),
            config.use_sudo,
        )
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>, Error> {
        let target = target.clone();
        let transport = self.clone();
        let host = target.host.clone();

        let session = tokio::task::spawn_blocking(move || transport.open_blocking(&target))
            .await
            .map_err(|e| SshError::Join(e.to_string()))??;

        debug!("SSH session to {}:{} established", host, self.port);
        Ok(Box::new(SshSession {
            host,
            session: Some(session),
            use_sudo: self.use_sudo,
            operation_timeout: self.operation_timeout,
        }))
    }

    fn transport_name(&self) -> &'static str {
        "ssh"
    }
}

impl SshTransport {
    fn open_blocking(&self, target: &SessionTarget) -> Result<Session, SshError> {
        let addr = (target.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| SshError::Resolve(target.host.clone()))?
            .next()
            .ok_or_else(|| SshError::Resolve(target.host.clone()))?;

        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|source| SshError::Tcp { addr, source })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(self.connect_timeout));
        session.handshake().map_err(|source| SshError::Handshake {
            host: target.host.clone(),
            source,
        })?;

        // Wrong passwords surface either as an error or as "not authenticated"
        let auth = session.userauth_password(&target.username, target.secret.expose());
        if auth.is_err() || !session.authenticated() {
            return Err(SshError::Auth {
                host: target.host.clone(),
                user: target.username.clone(),
            });
        }

        session.set_timeout(millis(self.operation_timeout));
        Ok(session)
    }
}

/// One authenticated SSH connection
pub struct SshSession {
    host: String,
    /// Taken while a blocking call owns it
    session: Option<Session>,
    use_sudo: bool,
    operation_timeout: Duration,
}

impl SshSession {
    /// Run `f` against the session on the blocking pool, within the budget
    async fn blocking<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Session, Deadline) -> Result<T, SshError> + Send + 'static,
    {
        let session = self
            .session
            .take()
            .ok_or_else(|| Error::connection(format!("{}: session lost", self.host)))?;
        let deadline = Deadline::within(self.operation_timeout);

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = f(&session, deadline);
            (session, result)
        })
        .await
        .map_err(|e| SshError::Join(e.to_string()))?;

        self.session = Some(session);
        result.map_err(Error::from)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, Error> {
        let command = command.to_string();
        self.blocking(move |session, deadline| {
            run(session, deadline, &command, None).map(CommandOutput::from)
        })
            .await
    }

    async fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let test = format!("{}test -e {}", sudo_prefix(self.use_sudo), shell_quote(path));
        let cat = cat_command(self.use_sudo, path);

        self.blocking(move |session, deadline| {
            let probe = run(session, deadline, &test, None)?;
            match probe.exit_code {
                0 => {}
                // sudo also exits 1, but says why on stderr
                TEST_MISSING_STATUS if probe.stderr.trim().is_empty() => return Ok(None),
                status => {
                    return Err(SshError::Command {
                        command: test,
                        status,
                        stderr: probe.stderr,
                    });
                }
            }

            let output = run(session, deadline, &cat, None)?;
            if output.exit_code != 0 {
                return Err(SshError::Command {
                    command: cat,
                    status: output.exit_code,
                    stderr: output.stderr,
                });
            }
            Ok(Some(output.stdout))
        })
        .await
    }

    async fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), Error> {
        let tee = tee_command(self.use_sudo, path);
        let content = content.to_vec();

        self.blocking(move |session, deadline| {
            let output = run(session, deadline, &tee, Some(&content))?;
            if output.exit_code != 0 {
                return Err(SshError::Command {
                    command: tee,
                    status: output.exit_code,
                    stderr: output.stderr,
                });
            }
            Ok(())
        })
        .await
    }

    async fn close(mut self: Box<Self>) -> Result<(), Error> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let host = self.host.clone();
        let deadline = Deadline::within(self.operation_timeout);
        tokio::task::spawn_blocking(move || {
            deadline.arm(&session)?;
            session.disconnect(None, "closing", None).map_err(SshError::from)
        })
            .await
            .map_err(|e| SshError::Join(e.to_string()))?
            .map_err(|e| {
                warn!("SSH disconnect from {} failed: {}", host, e);
                Error::from(e)
            })
    }
}

/// Raw output of one exec channel
struct RawOutput {
    stdout: Vec<u8>,
    stderr: String,
    exit_code: i32,
}

impl From<RawOutput> for CommandOutput {
    fn from(raw: RawOutput) -> Self {
        CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: raw.stderr,
            exit_code: raw.exit_code,
        }
    }
}

/// Wall-clock limit for one blocking session operation
#[derive(Debug, Clone, Copy)]
struct Deadline {
    /// `None` when the budget runs past what `Instant` can represent
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    fn within(operation_timeout: Duration) -> Self {
        let budget = budget(operation_timeout);
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    /// Point the libssh2 timeout at the time left, or fail if none is
    fn arm(&self, session: &Session) -> Result<(), SshError> {
        let left = match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => self.budget,
        };
        if left.is_zero() {
            return Err(SshError::Deadline(self.budget));
        }
        // 0 would disable the libssh2 timeout
        session.set_timeout(millis(left).max(1));
        Ok(())
    }
}

/// Share of the operation timeout the blocking layer may use
fn budget(operation_timeout: Duration) -> Duration {
    operation_timeout
        .checked_mul(4)
        .map_or(operation_timeout, |t| t / 5)
}

fn run(
    session: &Session,
    deadline: Deadline,
    command: &str,
    stdin: Option<&[u8]>,
) -> Result<RawOutput, SshError> {
    deadline.arm(session)?;
    let mut channel = session.channel_session()?;
    deadline.arm(session)?;
    channel.exec(command)?;

    if let Some(input) = stdin {
        let mut written = 0;
        while written < input.len() {
            deadline.arm(session)?;
            match channel.write(&input[written..])? {
                0 => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                n => written += n,
            }
        }
        deadline.arm(session)?;
        channel.flush()?;
    }
    deadline.arm(session)?;
    channel.send_eof()?;

    let stdout = read_all(&mut channel, session, deadline)?;
    // stderr is diagnostic only
    let stderr = read_all(&mut channel.stderr(), session, deadline)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();

    deadline.arm(session)?;
    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    Ok(RawOutput {
        stdout,
        stderr,
        exit_code,
    })
}

fn read_all(
    reader: &mut impl Read,
    session: &Session,
    deadline: Deadline,
) -> Result<Vec<u8>, SshError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        deadline.arm(session)?;
        match reader.read(&mut buf)? {
            0 => return Ok(out),
            n => out.extend_from_slice(&buf[..n]),
        }
    }
}

fn sudo_prefix(use_sudo: bool) -> &'static str {
    if use_sudo { "sudo -n " } else { "" }
}

fn cat_command(use_sudo: bool, path: &str) -> String {
    format!("{}cat -- {}", sudo_prefix(use_sudo), shell_quote(path))
}

fn tee_command(use_sudo: bool, path: &str) -> String {
    format!("{}tee -- {} >/dev/null", sudo_prefix(use_sudo), shell_quote(path))
}

/// Single-quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcpsync_core::secret::SecretString;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/dhcp/dhcpd.conf"), "'/etc/dhcp/dhcpd.conf'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }

    #[test]
    fn test_file_commands() {
        assert_eq!(
            cat_command(true, "/etc/dhcp/dhcpd.conf"),
            "sudo -n cat -- '/etc/dhcp/dhcpd.conf'"
        );
        assert_eq!(
            tee_command(false, "/tmp/x y"),
            "tee -- '/tmp/x y' >/dev/null"
        );
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_secs(10)), 10_000);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn test_budget_ends_before_operation_timeout() {
        assert_eq!(budget(Duration::from_secs(30)), Duration::from_secs(24));
        assert!(budget(Duration::from_millis(1)) < Duration::from_millis(1));
        assert_eq!(budget(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_spent_deadline_refuses_to_arm() {
        let session = Session::new().unwrap();
        let spent = Deadline {
            at: Some(Instant::now()),
            budget: Duration::from_secs(1),
        };
        let err = spent.arm(&session).unwrap_err();
        assert!(matches!(err, SshError::Deadline(_)));
        assert!(matches!(Error::from(err), Error::Connection(_)));

        let fresh = Deadline::within(Duration::from_secs(10));
        assert!(fresh.arm(&session).is_ok());
        assert!(session.timeout() >= 1 && session.timeout() <= 8_000);
    }

    #[test]
    fn test_from_config() {
        let config = RemoteConfig::default();
        let transport = SshTransport::from_config(&config);
        assert_eq!(transport.port, 22);
        assert!(transport.use_sudo);
        assert_eq!(transport.transport_name(), "ssh");
    }

    #[test]
    fn test_error_mapping() {
        let auth: Error = SshError::Auth {
            host: "10.0.0.1".to_string(),
            user: "admin".to_string(),
        }
        .into();
        assert!(matches!(auth, Error::Connection(_)));

        let command: Error = SshError::Command {
            command: "cat".to_string(),
            status: 1,
            stderr: "Permission denied".to_string(),
        }
        .into();
        assert!(matches!(command, Error::Remote(_)));

        let timeout: Error =
            SshError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")).into();
        assert!(matches!(timeout, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let transport = SshTransport::new(
            1,
            Duration::from_millis(500),
            Duration::from_millis(500),
            false,
        );
        let target = SessionTarget::new("127.0.0.1", "admin", SecretString::new("pw"));

        match transport.connect(&target).await {
            Err(Error::Connection(message)) => assert!(message.contains("127.0.0.1")),
            Err(other) => panic!("expected connection error, got {}", other),
            Ok(_) => panic!("nothing should listen on port 1"),
        }
    }
}
