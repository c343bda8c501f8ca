//! Scheduled lease polling
//!
//! The [`LeasePoller`] owns one timer task per scheduled device. Each tick
//! runs a poll cycle: resolve the credential, read the remote lease database,
//! parse it, and swap the device's snapshot for the new one.
//!
//! ## Guarantees
//!
//! - A device's cycle never overlaps itself. Starting a cycle while one is
//!   in flight returns [`CycleOutcome::AlreadyRunning`] and does nothing.
//! - Snapshots are replaced wholesale behind an `Arc`; readers see either
//!   the old set or the new one, never a mix.
//! - Readers never wait on remote I/O. The snapshot lock is only held to
//!   clone or swap an `Arc`.
//! - Every cycle is bounded by the cycle timeout. Unreachable devices,
//!   timeouts and unreadable files skip the cycle; the previous snapshot
//!   stays visible.
//!
//! ## Lifecycle
//!
//! 1. Create with [`LeasePoller::new()`], keep the event receiver
//! 2. [`LeasePoller::schedule()`] devices
//! 3. Adjust with [`LeasePoller::set_next_run()`] / [`LeasePoller::trigger_now()`]
//! 4. [`LeasePoller::shutdown()`] (or drop) to stop every timer

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::leases::{parse_leases, LeaseRecord, LeaseSnapshot, ParseReport};
use crate::remote;
use crate::traits::{CredentialStore, RemoteTransport};

/// Events emitted by the LeasePoller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerEvent {
    /// A device was scheduled or re-timed
    JobScheduled {
        device_ip: String,
        interval: Duration,
        next_run: DateTime<Utc>,
    },

    /// A device's timer was removed
    JobRemoved { device_ip: String },

    /// A cycle replaced the device's snapshot
    CycleCompleted {
        device_ip: String,
        records: usize,
        dropped: usize,
    },

    /// A cycle did not produce a snapshot
    CycleSkipped { device_ip: String, reason: SkipReason },
}

/// Why a cycle produced no snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No credential stored for the device
    NoCredential,
    /// The stored credential was unreachable when it was last verified
    Unreachable,
    /// The cycle exceeded the cycle timeout
    TimedOut,
    /// A session could not be opened
    Connection(String),
    /// The lease database does not exist on the device
    MissingFile,
    /// The lease database could not be parsed at all
    Parse(String),
    /// Reading the file failed on an open session
    Remote(String),
    /// The credential store failed
    Store(String),
    /// The device was cleared while the cycle was in flight
    Cleared,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCredential => write!(f, "no credential"),
            SkipReason::Unreachable => write!(f, "device marked unreachable"),
            SkipReason::TimedOut => write!(f, "cycle timed out"),
            SkipReason::Connection(e) => write!(f, "connection failed: {}", e),
            SkipReason::MissingFile => write!(f, "lease file missing"),
            SkipReason::Parse(e) => write!(f, "parse failed: {}", e),
            SkipReason::Remote(e) => write!(f, "remote read failed: {}", e),
            SkipReason::Store(e) => write!(f, "credential store failed: {}", e),
            SkipReason::Cleared => write!(f, "device cleared during cycle"),
        }
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshot replaced
    Completed { records: usize, dropped: usize },
    /// Snapshot left as it was
    Skipped { reason: SkipReason },
    /// A cycle for this device was already in flight; nothing was done
    AlreadyRunning,
}

/// Whether a device's cycle is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Schedule of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollJob {
    pub device_ip: String,
    pub interval: Duration,
    pub next_run: DateTime<Utc>,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub runs: u64,
}

struct JobShared {
    job: Mutex<PollJob>,
    wake: Notify,
}

impl JobShared {
    fn lock(&self) -> MutexGuard<'_, PollJob> {
        self.job.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct JobHandle {
    shared: Arc<JobShared>,
    task: JoinHandle<()>,
}

/// Published snapshots plus a per-device clear counter
///
/// A cycle only publishes if the device's counter still matches the value
/// it read when the cycle started.
#[derive(Default)]
struct SnapshotTable {
    entries: HashMap<String, Arc<LeaseSnapshot>>,
    epochs: HashMap<String, u64>,
}

impl SnapshotTable {
    fn epoch(&self, device_ip: &str) -> u64 {
        self.epochs.get(device_ip).copied().unwrap_or(0)
    }
}

/// Periodic lease database poller
pub struct LeasePoller {
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn RemoteTransport>,
    leases_path: String,
    connect_timeout: Duration,
    cycle_timeout: Duration,
    snapshots: RwLock<SnapshotTable>,
    jobs: Mutex<HashMap<String, JobHandle>>,
    running: Mutex<HashSet<String>>,
    event_tx: mpsc::Sender<PollerEvent>,
    weak_self: Weak<LeasePoller>,
}

/// Marks a device's cycle as in flight until dropped
struct RunningGuard<'a> {
    poller: &'a LeasePoller,
    device_ip: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock(&self.poller.running).remove(&self.device_ip);
    }
}

impl LeasePoller {
    /// Create a new poller
    ///
    /// # Returns
    ///
    /// A tuple of (poller, event_receiver) where event_receiver yields poller
    /// events. Events are dropped with a warning when the channel is full.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn RemoteTransport>,
        leases_path: impl Into<String>,
        connect_timeout: Duration,
        cycle_timeout: Duration,
        event_channel_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<PollerEvent>) {
        let (tx, rx) = mpsc::channel(event_channel_capacity.max(1));
        let leases_path = leases_path.into();

        let poller = Arc::new_cyclic(|weak_self| Self {
            credentials,
            transport,
            leases_path,
            connect_timeout,
            cycle_timeout,
            snapshots: RwLock::new(SnapshotTable::default()),
            jobs: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            event_tx: tx,
            weak_self: weak_self.clone(),
        });

        (poller, rx)
    }

    /// Schedule (or re-time) polling for a device
    ///
    /// The first cycle runs one `interval` from now. Must be called from
    /// within a tokio runtime.
    pub fn schedule(&self, device_ip: &str, interval: Duration) -> Result<PollJob> {
        if interval.is_zero() {
            return Err(Error::validation("poll interval must be > 0"));
        }
        let next_run = after(Utc::now(), interval);

        let mut jobs = lock(&self.jobs);
        let view = match jobs.get(device_ip) {
            Some(handle) => {
                let view = {
                    let mut job = handle.shared.lock();
                    job.interval = interval;
                    job.next_run = next_run;
                    job.clone()
                };
                handle.shared.wake.notify_one();
                view
            }
            None => {
                let job = PollJob {
                    device_ip: device_ip.to_string(),
                    interval,
                    next_run,
                    state: JobState::Idle,
                    last_run: None,
                    runs: 0,
                };
                let shared = Arc::new(JobShared {
                    job: Mutex::new(job.clone()),
                    wake: Notify::new(),
                });
                let task = tokio::spawn(job_loop(
                    self.weak_self.clone(),
                    device_ip.to_string(),
                    shared.clone(),
                ));
                jobs.insert(device_ip.to_string(), JobHandle { shared, task });
                job
            }
        };
        drop(jobs);

        info!(
            "Scheduled lease polling for {} every {:?}",
            device_ip, interval
        );
        self.emit_event(PollerEvent::JobScheduled {
            device_ip: device_ip.to_string(),
            interval,
            next_run,
        });
        Ok(self.with_state(view))
    }

    /// Move a device's next cycle to `at`
    pub fn set_next_run(&self, device_ip: &str, at: DateTime<Utc>) -> Result<PollJob> {
        let jobs = lock(&self.jobs);
        let handle = jobs.get(device_ip).ok_or_else(|| {
            Error::not_found(format!("no poll job for device {}", device_ip))
        })?;

        let view = {
            let mut job = handle.shared.lock();
            job.next_run = at;
            job.clone()
        };
        handle.shared.wake.notify_one();
        drop(jobs);

        debug!("Next lease poll for {} moved to {}", device_ip, at);
        Ok(self.with_state(view))
    }

    /// Run a device's next cycle as soon as possible
    pub fn trigger_now(&self, device_ip: &str) -> Result<PollJob> {
        self.set_next_run(device_ip, Utc::now())
    }

    /// Stop polling a device
    ///
    /// # Returns
    ///
    /// Whether a job existed.
    pub fn unschedule(&self, device_ip: &str) -> bool {
        let removed = lock(&self.jobs).remove(device_ip);
        match removed {
            Some(handle) => {
                handle.task.abort();
                info!("Stopped lease polling for {}", device_ip);
                self.emit_event(PollerEvent::JobRemoved {
                    device_ip: device_ip.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Current schedule for a device
    pub fn job(&self, device_ip: &str) -> Option<PollJob> {
        let view = lock(&self.jobs)
            .get(device_ip)
            .map(|handle| handle.shared.lock().clone());
        view.map(|job| self.with_state(job))
    }

    /// Every schedule, ordered by device
    pub fn jobs(&self) -> Vec<PollJob> {
        let views: Vec<PollJob> = lock(&self.jobs)
            .values()
            .map(|handle| handle.shared.lock().clone())
            .collect();
        let mut views: Vec<PollJob> = views.into_iter().map(|j| self.with_state(j)).collect();
        views.sort_by(|a, b| a.device_ip.cmp(&b.device_ip));
        views
    }

    /// Latest snapshot for a device, if any cycle has completed
    pub async fn snapshot(&self, device_ip: &str) -> Option<Arc<LeaseSnapshot>> {
        self.snapshots.read().await.entries.get(device_ip).cloned()
    }

    /// Latest lease records for a device (empty before the first cycle)
    pub async fn list(&self, device_ip: &str) -> Vec<LeaseRecord> {
        self.snapshot(device_ip)
            .await
            .map(|snapshot| snapshot.records.clone())
            .unwrap_or_default()
    }

    /// Forget a device's snapshot
    ///
    /// A cycle already in flight for the device will not publish its result.
    pub async fn clear(&self, device_ip: &str) {
        let mut table = self.snapshots.write().await;
        table.entries.remove(device_ip);
        *table.epochs.entry(device_ip.to_string()).or_insert(0) += 1;
    }

    /// Stop every timer
    pub fn shutdown(&self) {
        let jobs: Vec<(String, JobHandle)> = lock(&self.jobs).drain().collect();
        for (device_ip, handle) in jobs {
            handle.task.abort();
            debug!("Stopped lease polling for {}", device_ip);
        }
        info!("Lease poller stopped");
    }

    /// Run one cycle for a device now and wait for it
    pub async fn run_cycle(&self, device_ip: &str) -> CycleOutcome {
        let Some(_running) = self.begin(device_ip) else {
            debug!("Lease poll for {} already running, skipping", device_ip);
            return CycleOutcome::AlreadyRunning;
        };

        let epoch = self.snapshots.read().await.epoch(device_ip);
        let fetched = tokio::time::timeout(self.cycle_timeout, self.fetch(device_ip)).await;

        let outcome = match fetched {
            Ok(Ok(report)) => {
                let records = report.records.len();
                let dropped = report.dropped;
                let snapshot = LeaseSnapshot {
                    device_ip: device_ip.to_string(),
                    records: report.records,
                    dropped,
                    fetched_at: Utc::now(),
                };
                let mut table = self.snapshots.write().await;
                if table.epoch(device_ip) == epoch {
                    table
                        .entries
                        .insert(device_ip.to_string(), Arc::new(snapshot));
                    CycleOutcome::Completed { records, dropped }
                } else {
                    CycleOutcome::Skipped {
                        reason: SkipReason::Cleared,
                    }
                }
            }
            Ok(Err(reason)) => CycleOutcome::Skipped { reason },
            Err(_) => CycleOutcome::Skipped {
                reason: SkipReason::TimedOut,
            },
        };

        match &outcome {
            CycleOutcome::Completed { records, dropped } => {
                if *dropped > 0 {
                    warn!(
                        "Lease poll for {}: {} record(s), {} malformed block(s) dropped",
                        device_ip, records, dropped
                    );
                } else {
                    debug!("Lease poll for {}: {} record(s)", device_ip, records);
                }
                self.emit_event(PollerEvent::CycleCompleted {
                    device_ip: device_ip.to_string(),
                    records: *records,
                    dropped: *dropped,
                });
            }
            CycleOutcome::Skipped { reason } => {
                warn!("Lease poll for {} skipped: {}", device_ip, reason);
                self.emit_event(PollerEvent::CycleSkipped {
                    device_ip: device_ip.to_string(),
                    reason: reason.clone(),
                });
            }
            CycleOutcome::AlreadyRunning => {}
        }

        outcome
    }

    fn begin(&self, device_ip: &str) -> Option<RunningGuard<'_>> {
        lock(&self.running)
            .insert(device_ip.to_string())
            .then(|| RunningGuard {
                poller: self,
                device_ip: device_ip.to_string(),
            })
    }

    async fn fetch(&self, device_ip: &str) -> std::result::Result<ParseReport, SkipReason> {
        let credential = match self.credentials.get(device_ip).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return Err(SkipReason::NoCredential),
            Err(e) => return Err(SkipReason::Store(e.to_string())),
        };
        if !credential.ssh_access {
            return Err(SkipReason::Unreachable);
        }

        let target = credential.target();
        let mut session =
            remote::open_session(self.transport.as_ref(), &target, self.connect_timeout)
                .await
                .map_err(|e| SkipReason::Connection(e.to_string()))?;

        let content = session.read_file(&self.leases_path).await;
        remote::close_quietly(session, device_ip).await;

        match content {
            Ok(Some(bytes)) => {
                parse_leases(device_ip, &bytes).map_err(|e| SkipReason::Parse(e.to_string()))
            }
            Ok(None) => Err(SkipReason::MissingFile),
            Err(Error::Connection(e)) => Err(SkipReason::Connection(e)),
            Err(e) => Err(SkipReason::Remote(e.to_string())),
        }
    }

    fn with_state(&self, mut job: PollJob) -> PollJob {
        job.state = if lock(&self.running).contains(&job.device_ip) {
            JobState::Running
        } else {
            JobState::Idle
        };
        job
    }

    fn emit_event(&self, event: PollerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Poller event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening; events are optional
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl Drop for LeasePoller {
    fn drop(&mut self) {
        for handle in lock(&self.jobs).values() {
            handle.task.abort();
        }
    }
}

/// Timer task for one device
async fn job_loop(poller: Weak<LeasePoller>, device_ip: String, shared: Arc<JobShared>) {
    loop {
        let next_run = shared.lock().next_run;
        let delay = (next_run - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            // Re-timed; recompute the delay
            _ = shared.wake.notified() => continue,
        }

        if shared.lock().next_run > Utc::now() {
            continue;
        }

        let Some(poller) = poller.upgrade() else {
            break;
        };
        let started = Utc::now();
        poller.run_cycle(&device_ip).await;
        drop(poller);

        let mut job = shared.lock();
        job.last_run = Some(started);
        job.runs += 1;
        // Keep a next_run that was moved while the cycle was running
        if job.next_run <= started {
            job.next_run = after(Utc::now(), job.interval);
        }
    }
}

/// `now + duration`, saturating at the end of representable time
fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
