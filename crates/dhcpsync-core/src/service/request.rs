// Request shapes accepted by the service facade
//
// Inbound payloads arrive with every field optional. `validate()` turns a
// payload into its strongly typed form or fails with `Error::Validation`
// naming every missing field at once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::secret::SecretString;

/// Bounds on a per-device poll interval, in seconds
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

fn present(value: Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

fn reject_missing(missing: Vec<&'static str>) -> Result<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

/// Store or replace a device credential
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutCredentialRequest {
    pub device_ip: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct PutCredential {
    pub device_ip: String,
    pub username: String,
    pub password: SecretString,
}

impl PutCredentialRequest {
    pub fn new(
        device_ip: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            device_ip: Some(device_ip.into()),
            username: Some(username.into()),
            password: Some(SecretString::new(password)),
        }
    }

    pub fn validate(self) -> Result<PutCredential> {
        let mut missing = Vec::new();
        let device_ip = present(self.device_ip, "device_ip", &mut missing);
        let username = present(self.username, "username", &mut missing);
        let password = match self.password {
            Some(p) if !p.is_empty() => p,
            _ => {
                missing.push("password");
                SecretString::default()
            }
        };
        reject_missing(missing)?;

        Ok(PutCredential {
            device_ip,
            username,
            password,
        })
    }
}

/// Deploy configuration content to a device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutConfigRequest {
    pub device_ip: Option<String>,
    /// Full file content; an empty string is valid content
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PutConfig {
    pub device_ip: String,
    pub content: String,
}

impl PutConfigRequest {
    pub fn new(device_ip: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            device_ip: Some(device_ip.into()),
            content: Some(content.into()),
        }
    }

    pub fn validate(self) -> Result<PutConfig> {
        let mut missing = Vec::new();
        let device_ip = present(self.device_ip, "device_ip", &mut missing);
        if self.content.is_none() {
            missing.push("content");
        }
        reject_missing(missing)?;

        Ok(PutConfig {
            device_ip,
            content: self.content.unwrap_or_default(),
        })
    }
}

/// Any operation addressed to a single device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceRequest {
    pub device_ip: Option<String>,
}

impl DeviceRequest {
    pub fn validate(self) -> Result<String> {
        let mut missing = Vec::new();
        let device_ip = present(self.device_ip, "device_ip", &mut missing);
        reject_missing(missing)?;
        Ok(device_ip)
    }
}

impl From<&str> for DeviceRequest {
    fn from(device_ip: &str) -> Self {
        Self {
            device_ip: Some(device_ip.to_string()),
        }
    }
}

impl From<String> for DeviceRequest {
    fn from(device_ip: String) -> Self {
        Self {
            device_ip: Some(device_ip),
        }
    }
}

/// Configure or nudge a device's poll schedule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    pub device_ip: Option<String>,
    /// New interval; the current (or default) interval is kept when absent
    pub interval_secs: Option<u64>,
    /// Run the next cycle immediately
    #[serde(default)]
    pub run_now: bool,
    /// Explicit next-run time; ignored when `run_now` is set
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub device_ip: String,
    pub interval: Option<Duration>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduleRequest {
    pub fn validate(self) -> Result<Schedule> {
        let mut missing = Vec::new();
        let device_ip = present(self.device_ip, "device_ip", &mut missing);
        reject_missing(missing)?;

        let interval = match self.interval_secs {
            Some(secs) if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&secs) => {
                return Err(Error::validation(format!(
                    "interval_secs must be between {} and {}, got {}",
                    MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS, secs
                )));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let next_run = if self.run_now {
            Some(Utc::now())
        } else {
            self.next_run
        };

        Ok(Schedule {
            device_ip,
            interval,
            next_run,
        })
    }
}
