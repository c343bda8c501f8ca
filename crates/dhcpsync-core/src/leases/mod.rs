//! Lease records harvested from the DHCP server's lease database

pub mod parser;

pub use parser::{parse_leases, ParseReport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Binding state of a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingState {
    Free,
    Active,
    Expired,
    Released,
    Abandoned,
    Reset,
    Backup,
    /// Anything the server writes that this crate does not know
    Unknown,
}

impl FromStr for BindingState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "free" => BindingState::Free,
            "active" => BindingState::Active,
            "expired" => BindingState::Expired,
            "released" => BindingState::Released,
            "abandoned" => BindingState::Abandoned,
            "reset" => BindingState::Reset,
            "backup" => BindingState::Backup,
            _ => BindingState::Unknown,
        })
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BindingState::Free => "free",
            BindingState::Active => "active",
            BindingState::Expired => "expired",
            BindingState::Released => "released",
            BindingState::Abandoned => "abandoned",
            BindingState::Reset => "reset",
            BindingState::Backup => "backup",
            BindingState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One address assignment from the lease database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub device_ip: String,
    pub ip_address: IpAddr,
    pub hostname: String,
    /// MAC address as written by the server (`hardware ethernet ...`)
    pub hardware_address: Option<String>,
    pub starts: Option<chrono::DateTime<chrono::Utc>>,
    /// `None` for leases that never expire
    pub ends: Option<chrono::DateTime<chrono::Utc>>,
    /// Client last transaction time
    pub cltt: Option<chrono::DateTime<chrono::Utc>>,
    pub binding_state: BindingState,
}

/// The latest parsed lease set for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSnapshot {
    pub device_ip: String,
    pub records: Vec<LeaseRecord>,
    /// Blocks dropped as malformed or incomplete
    pub dropped: usize,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}
