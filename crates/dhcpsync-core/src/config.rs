//! Configuration types for the DHCP sync system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main DHCP sync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DhcpSyncConfig {
    /// Remote shell settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Remote file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Backup archive settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Lease poller settings
    #[serde(default)]
    pub poller: PollerConfig,

    /// Credential store configuration
    #[serde(default)]
    pub credential_store: StoreConfig,

    /// Backup store configuration
    #[serde(default)]
    pub backup_store: StoreConfig,
}

impl DhcpSyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.remote.validate()?;
        self.paths.validate()?;
        self.backup.validate()?;
        self.poller.validate()?;
        self.credential_store.validate("credential")?;
        self.backup_store.validate("backup")?;
        Ok(())
    }
}

/// Remote shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// SSH port on managed devices
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bound on establishing a session (connect + authenticate)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Bound on a single remote operation (command, file read or write)
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Run file reads/writes through `sudo -n`
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,

    /// Trivial command run to prove a session works
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.port == 0 {
            return Err(crate::Error::config("Remote port must be > 0"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(crate::Error::config("Remote connect timeout must be > 0"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(crate::Error::config("Remote operation timeout must be > 0"));
        }
        if self.probe_command.trim().is_empty() {
            return Err(crate::Error::config("Remote probe command cannot be empty"));
        }
        Ok(())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            use_sudo: default_use_sudo(),
            probe_command: default_probe_command(),
        }
    }
}

/// Locations of the DHCP server files on the managed device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Deployed server configuration
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Lease database written by the server
    #[serde(default = "default_leases_path")]
    pub leases_path: String,
}

impl PathsConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.config_path.trim().is_empty() {
            return Err(crate::Error::config("Config path cannot be empty"));
        }
        if self.leases_path.trim().is_empty() {
            return Err(crate::Error::config("Leases path cannot be empty"));
        }
        Ok(())
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            leases_path: default_leases_path(),
        }
    }
}

/// Backup archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Filename prefix; the creation timestamp and sequence follow it
    #[serde(default = "default_backup_prefix")]
    pub prefix: String,

    /// Maximum backups retained per device
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl BackupConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.prefix.is_empty() {
            return Err(crate::Error::config("Backup prefix cannot be empty"));
        }
        if self.prefix.contains('/') {
            return Err(crate::Error::config("Backup prefix cannot contain '/'"));
        }
        if self.max_backups == 0 {
            return Err(crate::Error::config("Max backups must be > 0"));
        }
        Ok(())
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            prefix: default_backup_prefix(),
            max_backups: default_max_backups(),
        }
    }
}

/// Lease poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Default interval between poll cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Bound on a whole poll cycle (connect + read + parse)
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,

    /// Capacity of the poller event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Schedule polling automatically when a credential is stored
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(crate::Error::config("Poll cycle timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            autostart: default_autostart(),
        }
    }
}

/// Persistence configuration for credentials or backups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-backed store
    File {
        /// Path to the state file (credentials) or root directory (backups)
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

impl StoreConfig {
    fn validate(&self, what: &str) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.trim().is_empty() => Err(crate::Error::config(
                format!("File {} store path cannot be empty", what),
            )),
            _ => Ok(()),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_use_sudo() -> bool {
    true
}

fn default_probe_command() -> String {
    "echo ok".to_string()
}

fn default_config_path() -> String {
    "/etc/dhcp/dhcpd.conf".to_string()
}

fn default_leases_path() -> String {
    "/var/lib/dhcp/dhcpd.leases".to_string()
}

fn default_backup_prefix() -> String {
    "dhcpd.conf.bak.".to_string()
}

fn default_max_backups() -> usize {
    10
}

fn default_interval_secs() -> u64 {
    60
}

fn default_cycle_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    100
}

fn default_autostart() -> bool {
    true
}
