// # dhcpsync-core
//
// Core library for remote DHCP server configuration sync.
//
// ## Architecture Overview
//
// This library manages DHCP servers running on remote devices:
// - **CredentialService**: Per-device shell credentials with a write-time reachability probe
// - **ConfigSynchronizer**: Checksum-gated deployment of the server configuration file
// - **BackupArchive**: Bounded, oldest-first rotating archive of superseded configurations
// - **LeasePoller**: Per-device timers that harvest and parse the lease database
// - **DhcpService**: Facade exposing the request-layer operations
//
// Remote access goes through the **RemoteTransport** trait; persistence goes
// through **CredentialStore** and **BackupStore**. Concrete transports live
// in their own crates.
//
// ## Design Principles
//
// 1. **Per-device serialization**: read → compare → backup → write never interleaves for one device
// 2. **No global lock**: different devices proceed fully in parallel
// 3. **Bounded remote I/O**: every remote operation runs under a timeout
// 4. **Wholesale snapshots**: lease readers see one poll cycle, never a mix
// 5. **Library-First**: all core functionality can be used as a library

pub mod archive;
pub mod config;
pub mod credentials;
pub mod error;
pub mod leases;
pub mod lock;
pub mod poller;
pub mod remote;
pub mod secret;
pub mod service;
pub mod state;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use archive::{BackupArchive, RecordedBackup};
pub use config::{DhcpSyncConfig, StoreConfig};
pub use credentials::{AccessVerifier, CredentialService};
pub use error::{Error, ErrorKind, Result};
pub use leases::{BindingState, LeaseRecord, LeaseSnapshot};
pub use poller::{CycleOutcome, LeasePoller, PollJob, PollerEvent, SkipReason};
pub use remote::MemoryTransport;
pub use secret::SecretString;
pub use service::DhcpService;
pub use state::{FileBackupStore, FileCredentialStore, MemoryBackupStore, MemoryCredentialStore};
pub use sync::{ConfigSynchronizer, SyncOutcome};
pub use traits::{BackupStore, CredentialStore, RemoteSession, RemoteTransport};
