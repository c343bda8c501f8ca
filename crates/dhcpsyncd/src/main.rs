// # dhcpsyncd - DHCP Sync Daemon
//
// This is a thin integration layer. All sync, archive and polling logic
// lives in dhcpsync-core; the daemon only wires it up.
//
// The dhcpsyncd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Building the service over the SSH transport
// 4. Scheduling lease polling for every stored credential
// 5. Logging poller events until shutdown
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Stores
// - `DHCPSYNC_CREDENTIAL_STORE`: Credential store type (file, memory)
// - `DHCPSYNC_CREDENTIAL_STORE_PATH`: Path to credential file (for file store)
// - `DHCPSYNC_BACKUP_STORE`: Backup store type (file, memory)
// - `DHCPSYNC_BACKUP_STORE_PATH`: Backup root directory (for file store)
//
// ### Remote Files
// - `DHCPSYNC_CONFIG_PATH`: Server configuration file on devices
// - `DHCPSYNC_LEASES_PATH`: Lease database on devices
//
// ### Archive
// - `DHCPSYNC_BACKUP_PREFIX`: Backup filename prefix
// - `DHCPSYNC_MAX_BACKUPS`: Backups retained per device
//
// ### Poller
// - `DHCPSYNC_POLL_INTERVAL_SECS`: Default poll interval (10-86400)
//
// ### SSH
// - `DHCPSYNC_SSH_PORT`: SSH port on devices
// - `DHCPSYNC_SSH_TIMEOUT_SECS`: Connect and operation timeout
// - `DHCPSYNC_USE_SUDO`: Read and write files through `sudo -n` (true, false)
//
// ### Bootstrap Credential (optional)
// - `DHCPSYNC_DEVICE_IP`, `DHCPSYNC_USERNAME`, `DHCPSYNC_PASSWORD`
//
// ## Example
//
// ```bash
// export DHCPSYNC_CREDENTIAL_STORE=file
// export DHCPSYNC_CREDENTIAL_STORE_PATH=/var/lib/dhcpsync/credentials.json
// export DHCPSYNC_BACKUP_STORE=file
// export DHCPSYNC_BACKUP_STORE_PATH=/var/lib/dhcpsync/backups
// export DHCPSYNC_DEVICE_IP=10.10.229.124
// export DHCPSYNC_USERNAME=admin
// export DHCPSYNC_PASSWORD=...
//
// dhcpsyncd
// ```

use anyhow::{Context, Result};
use dhcpsync_core::config::{DhcpSyncConfig, StoreConfig};
use dhcpsync_core::poller::PollerEvent;
use dhcpsync_core::service::{PutCredentialRequest, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS};
use dhcpsync_core::DhcpService;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DhcpSyncExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DhcpSyncExitCode> for ExitCode {
    fn from(code: DhcpSyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Credential stored at startup so a fresh install has something to poll
struct Bootstrap {
    device_ip: String,
    username: String,
    password: String,
}

/// Application configuration
struct Config {
    credential_store_type: String,
    credential_store_path: Option<String>,
    backup_store_type: String,
    backup_store_path: Option<String>,
    config_path: Option<String>,
    leases_path: Option<String>,
    backup_prefix: Option<String>,
    max_backups: Option<usize>,
    poll_interval_secs: Option<u64>,
    ssh_port: Option<u16>,
    ssh_timeout_secs: Option<u64>,
    use_sudo: Option<bool>,
    bootstrap: Option<Bootstrap>,
    log_level: String,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is not valid: {}", name, raw, e)),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let bootstrap = match (
            var("DHCPSYNC_DEVICE_IP"),
            var("DHCPSYNC_USERNAME"),
            var("DHCPSYNC_PASSWORD"),
        ) {
            (Some(device_ip), Some(username), Some(password)) => Some(Bootstrap {
                device_ip,
                username,
                password,
            }),
            (None, None, None) => None,
            _ => anyhow::bail!(
                "DHCPSYNC_DEVICE_IP, DHCPSYNC_USERNAME and DHCPSYNC_PASSWORD \
                must be set together"
            ),
        };

        Ok(Self {
            credential_store_type: var("DHCPSYNC_CREDENTIAL_STORE")
                .unwrap_or_else(|| "file".to_string()),
            credential_store_path: var("DHCPSYNC_CREDENTIAL_STORE_PATH"),
            backup_store_type: var("DHCPSYNC_BACKUP_STORE").unwrap_or_else(|| "file".to_string()),
            backup_store_path: var("DHCPSYNC_BACKUP_STORE_PATH"),
            config_path: var("DHCPSYNC_CONFIG_PATH"),
            leases_path: var("DHCPSYNC_LEASES_PATH"),
            backup_prefix: var("DHCPSYNC_BACKUP_PREFIX"),
            max_backups: parsed("DHCPSYNC_MAX_BACKUPS")?,
            poll_interval_secs: parsed("DHCPSYNC_POLL_INTERVAL_SECS")?,
            ssh_port: parsed("DHCPSYNC_SSH_PORT")?,
            ssh_timeout_secs: parsed("DHCPSYNC_SSH_TIMEOUT_SECS")?,
            use_sudo: parsed("DHCPSYNC_USE_SUDO")?,
            bootstrap,
            log_level: var("DHCPSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        validate_store(
            "DHCPSYNC_CREDENTIAL_STORE",
            &self.credential_store_type,
            self.credential_store_path.as_deref(),
            "/var/lib/dhcpsync/credentials.json",
        )?;
        validate_store(
            "DHCPSYNC_BACKUP_STORE",
            &self.backup_store_type,
            self.backup_store_path.as_deref(),
            "/var/lib/dhcpsync/backups",
        )?;

        if let Some(interval) = self.poll_interval_secs
            && !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&interval)
        {
            anyhow::bail!(
                "DHCPSYNC_POLL_INTERVAL_SECS must be between {} and {} seconds. Got: {}",
                MIN_POLL_INTERVAL_SECS,
                MAX_POLL_INTERVAL_SECS,
                interval
            );
        }

        if let Some(max) = self.max_backups
            && max == 0
        {
            anyhow::bail!("DHCPSYNC_MAX_BACKUPS must be at least 1");
        }

        if let Some(timeout) = self.ssh_timeout_secs
            && !(1..=300).contains(&timeout)
        {
            anyhow::bail!(
                "DHCPSYNC_SSH_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                timeout
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DHCPSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Translate into the core configuration
    fn to_core(&self) -> Result<DhcpSyncConfig> {
        let mut config = DhcpSyncConfig::new();

        config.credential_store =
            store_config(&self.credential_store_type, self.credential_store_path.clone());
        config.backup_store = store_config(&self.backup_store_type, self.backup_store_path.clone());

        if let Some(path) = &self.config_path {
            config.paths.config_path = path.clone();
        }
        if let Some(path) = &self.leases_path {
            config.paths.leases_path = path.clone();
        }
        if let Some(prefix) = &self.backup_prefix {
            config.backup.prefix = prefix.clone();
        }
        if let Some(max) = self.max_backups {
            config.backup.max_backups = max;
        }
        if let Some(interval) = self.poll_interval_secs {
            config.poller.interval_secs = interval;
        }
        if let Some(port) = self.ssh_port {
            config.remote.port = port;
        }
        if let Some(timeout) = self.ssh_timeout_secs {
            config.remote.connect_timeout_secs = timeout;
            config.remote.operation_timeout_secs = timeout;
        }
        if let Some(use_sudo) = self.use_sudo {
            config.remote.use_sudo = use_sudo;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn validate_store(name: &str, kind: &str, path: Option<&str>, example: &str) -> Result<()> {
    match kind {
        "memory" => Ok(()),
        "file" => {
            let Some(path) = path else {
                anyhow::bail!(
                    "{name}_PATH is required when {name}=file. \
                    Set it via: export {name}_PATH={example}"
                );
            };
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "{}_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    name,
                    parent.display(),
                    parent.display()
                );
            }
            Ok(())
        }
        other => anyhow::bail!(
            "{} '{}' is not supported. Supported types: file, memory",
            name,
            other
        ),
    }
}

fn store_config(kind: &str, path: Option<String>) -> StoreConfig {
    match (kind, path) {
        ("file", Some(path)) => StoreConfig::File { path },
        _ => StoreConfig::Memory,
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DhcpSyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DhcpSyncExitCode::ConfigError.into();
    }

    let core_config = match config.to_core() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return DhcpSyncExitCode::ConfigError.into();
        }
    };

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DhcpSyncExitCode::ConfigError.into();
    }

    info!("Starting dhcpsyncd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DhcpSyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(core_config, config.bootstrap).await {
            Ok(()) => DhcpSyncExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DhcpSyncExitCode::RuntimeError
            }
        }
    })
    .into()
}

#[cfg(feature = "ssh")]
fn transport(config: &DhcpSyncConfig) -> Result<Arc<dyn dhcpsync_core::RemoteTransport>> {
    Ok(Arc::new(dhcpsync_ssh::SshTransport::from_config(
        &config.remote,
    )))
}

#[cfg(not(feature = "ssh"))]
fn transport(_config: &DhcpSyncConfig) -> Result<Arc<dyn dhcpsync_core::RemoteTransport>> {
    anyhow::bail!("dhcpsyncd was built without the `ssh` feature; no remote transport available")
}

/// Run the daemon
async fn run_daemon(config: DhcpSyncConfig, bootstrap: Option<Bootstrap>) -> Result<()> {
    let transport = transport(&config)?;
    info!(
        "Managing {} and {} over {} (port {})",
        config.paths.config_path,
        config.paths.leases_path,
        transport.transport_name(),
        config.remote.port
    );

    let (service, events) = DhcpService::from_config(config, transport)
        .await
        .context("failed to build service")?;

    if let Some(bootstrap) = bootstrap {
        let view = service
            .put_credential(PutCredentialRequest::new(
                bootstrap.device_ip,
                bootstrap.username,
                bootstrap.password,
            ))
            .await
            .context("failed to store bootstrap credential")?;
        if !view.ssh_access {
            warn!(
                "Bootstrap device {} is not reachable; polling will skip it",
                view.device_ip
            );
        }
    }

    let scheduled = service.schedule_all().await?;
    let devices = service.list_credentials().await?.len();
    info!(
        "Daemon initialized: {} device(s), {} newly scheduled",
        devices, scheduled
    );

    let event_log = tokio::spawn(log_events(events));

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    service.shutdown().await.context("failed to flush state")?;
    drop(service);

    // The poller's sender is gone once the service drops; the log drains
    if let Err(e) = event_log.await {
        debug!("Event log task ended abnormally: {}", e);
    }

    Ok(())
}

async fn log_events(events: mpsc::Receiver<PollerEvent>) {
    let mut events = ReceiverStream::new(events);
    while let Some(event) = events.next().await {
        match event {
            PollerEvent::CycleCompleted {
                device_ip,
                records,
                dropped,
            } => info!(
                "Leases refreshed for {}: {} record(s), {} dropped",
                device_ip, records, dropped
            ),
            PollerEvent::CycleSkipped { device_ip, reason } => {
                warn!("Lease poll skipped for {}: {}", device_ip, reason)
            }
            PollerEvent::JobScheduled {
                device_ip,
                interval,
                next_run,
            } => debug!(
                "Polling {} every {:?}, next run {}",
                device_ip, interval, next_run
            ),
            PollerEvent::JobRemoved { device_ip } => debug!("Polling stopped for {}", device_ip),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
