//! Test fixtures and common utilities for contract tests
//!
//! Every contract test runs the real service against an in-memory
//! transport and in-memory stores. Nothing here talks to a network.

#![allow(dead_code)]

use dhcpsync_core::config::DhcpSyncConfig;
use dhcpsync_core::poller::PollerEvent;
use dhcpsync_core::remote::MemoryTransport;
use dhcpsync_core::service::PutCredentialRequest;
use dhcpsync_core::state::{MemoryBackupStore, MemoryCredentialStore};
use dhcpsync_core::DhcpService;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEVICE: &str = "10.10.229.124";
pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "pw";

pub const CONFIG_PATH: &str = "/etc/dhcp/dhcpd.conf";
pub const LEASES_PATH: &str = "/var/lib/dhcp/dhcpd.leases";

/// Everything a contract test needs to drive and observe the service
pub struct Harness {
    pub service: DhcpService,
    pub transport: MemoryTransport,
    pub backups: Arc<MemoryBackupStore>,
    pub events: mpsc::Receiver<PollerEvent>,
}

/// Config with short timeouts and no autostart, so tests drive cycles
pub fn test_config() -> DhcpSyncConfig {
    let mut config = DhcpSyncConfig::new();
    config.remote.connect_timeout_secs = 1;
    config.remote.operation_timeout_secs = 1;
    config.poller.cycle_timeout_secs = 2;
    config.poller.autostart = false;
    config
}

/// Service over a transport that knows [`DEVICE`]
pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: DhcpSyncConfig) -> Harness {
    let transport = MemoryTransport::new();
    transport.add_host(DEVICE, USERNAME, PASSWORD);

    let backups = Arc::new(MemoryBackupStore::new());
    let (service, events) = DhcpService::new(
        config,
        Arc::new(transport.clone()),
        Arc::new(MemoryCredentialStore::new()),
        backups.clone(),
    )
    .expect("service construction succeeds");

    Harness {
        service,
        transport,
        backups,
        events,
    }
}

/// Harness with a stored, reachable credential for [`DEVICE`]
pub async fn harness_with_credential() -> Harness {
    let harness = harness();
    let view = harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, PASSWORD))
        .await
        .expect("credential put succeeds");
    assert!(view.ssh_access, "test device should be reachable");
    harness
}

/// One lease block in dhcpd.leases syntax
pub fn lease_block(address: &str, hostname: &str) -> String {
    format!(
        "lease {address} {{\n  starts 4 2024/11/21 10:00:00;\n  ends 4 2024/11/21 16:00:00;\n  cltt 4 2024/11/21 10:00:00;\n  binding state active;\n  next binding state free;\n  hardware ethernet 00:1a:2b:3c:4d:5e;\n  client-hostname \"{hostname}\";\n}}\n"
    )
}

/// A lease file with `n` blocks named `<prefix><i>`
pub fn lease_file(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| lease_block(&format!("192.168.1.{}", 10 + i), &format!("{}{}", prefix, i)))
        .collect()
}
