//! Poll scheduling for synonym sources.
//!
//! The [`Scheduler`] keeps at most one [`ScheduleEntry`] per normalized
//! location. Entries are driven by a single timer thread that hands due
//! entries to a small pool of worker threads over a channel. A worker runs
//! the entry's [`ReloadMonitor`] tick and re-arms the entry afterwards, so
//! ticks of one location are strictly serialized while distinct locations
//! proceed independently.
//!
//! ```text
//!   ensure() ──Arm──▶ timer thread ──due entry──▶ worker pool ──tick()──▶ monitor
//!                          ▲                           │
//!                          └──────────Arm(next)────────┘
//! ```
//!
//! Cancellation is cooperative: a cancelled entry is never dispatched or
//! re-armed again, while a tick already in flight runs to completion.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SynonymError};
use crate::synonym::monitor::ReloadMonitor;

/// How long the timer sleeps when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Configuration for the poll scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads running ticks.
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { worker_threads: 1 }
    }
}

/// The single repeating poll task of one location.
pub struct ScheduleEntry {
    location: String,
    interval: Duration,
    monitor: Arc<ReloadMonitor>,
    cancelled: AtomicBool,
    created_at: Instant,
}

impl ScheduleEntry {
    /// Normalized location this entry polls.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Poll period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The monitor ticked by this entry.
    pub fn monitor(&self) -> &Arc<ReloadMonitor> {
        &self.monitor
    }

    /// When the entry was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Stop scheduling further ticks.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the entry has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("location", &self.location)
            .field("interval", &self.interval)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

enum TimerCommand {
    Arm(Arc<ScheduleEntry>, Instant),
    Shutdown,
}

/// An armed entry waiting in the timer queue.
struct Pending {
    due: Instant,
    seq: u64,
    entry: Arc<ScheduleEntry>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the BinaryHeap pops the earliest due entry first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Holds one repeating poll task per distinct location.
pub struct Scheduler {
    entries: RwLock<HashMap<String, Arc<ScheduleEntry>>>,
    command_sender: Sender<TimerCommand>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    running: AtomicBool,
}

impl Scheduler {
    /// Start the timer thread and the worker pool.
    pub fn start(config: SchedulerConfig) -> Result<Self> {
        if config.worker_threads == 0 {
            return Err(SynonymError::config("worker_threads must be at least 1"));
        }

        let (command_sender, command_receiver) = unbounded();
        let (job_sender, job_receiver) = unbounded();

        let mut threads = Vec::with_capacity(config.worker_threads + 1);
        threads.push(Self::spawn_timer(command_receiver, job_sender)?);
        for worker_id in 0..config.worker_threads {
            threads.push(Self::spawn_worker(
                worker_id,
                job_receiver.clone(),
                command_sender.clone(),
            )?);
        }

        Ok(Scheduler {
            entries: RwLock::new(HashMap::new()),
            command_sender,
            threads: Mutex::new(threads),
            running: AtomicBool::new(true),
        })
    }

    /// Make sure `location` has a poll task, creating it if needed.
    ///
    /// `make_monitor` is only called when the entry is created. Concurrent
    /// calls for the same location converge on one entry; every caller gets
    /// that entry back.
    pub fn ensure<F>(
        &self,
        location: &str,
        interval: Duration,
        make_monitor: F,
    ) -> Result<Arc<ScheduleEntry>>
    where
        F: FnOnce() -> Arc<ReloadMonitor>,
    {
        if let Some(entry) = self.entries.read().get(location) {
            return Ok(Arc::clone(entry));
        }
        let first_due = Instant::now().checked_add(interval).ok_or_else(|| {
            SynonymError::config(format!(
                "interval {interval:?} for {location} is too large to schedule"
            ))
        })?;

        let mut entries = self.entries.write();
        // Checked under the write lock so shutdown cannot interleave.
        if !self.running.load(Ordering::Acquire) {
            return Err(SynonymError::schedule("scheduler is shut down"));
        }
        if let Some(entry) = entries.get(location) {
            return Ok(Arc::clone(entry));
        }

        let entry = Arc::new(ScheduleEntry {
            location: location.to_string(),
            interval,
            monitor: make_monitor(),
            cancelled: AtomicBool::new(false),
            created_at: Instant::now(),
        });
        self.command_sender
            .send(TimerCommand::Arm(Arc::clone(&entry), first_due))
            .map_err(|_| SynonymError::schedule("scheduler timer is not running"))?;
        entries.insert(location.to_string(), Arc::clone(&entry));

        debug!("scheduled synonym polling of {location} every {interval:?}");
        Ok(entry)
    }

    /// Cancel and forget the entry of `location`. Returns whether one existed.
    pub fn remove(&self, location: &str) -> bool {
        self.remove_if(location, |_| true)
    }

    /// Cancel and forget the entry of `location` if `predicate` accepts it.
    ///
    /// The check and the removal happen under the same write lock, so an
    /// entry re-created by a concurrent [`ensure`](Self::ensure) is judged on
    /// its own merits.
    pub fn remove_if<P>(&self, location: &str, predicate: P) -> bool
    where
        P: FnOnce(&ScheduleEntry) -> bool,
    {
        let mut entries = self.entries.write();
        match entries.get(location) {
            Some(entry) if predicate(entry) => {
                entry.cancel();
                entries.remove(location);
                true
            }
            _ => false,
        }
    }

    /// The entry of `location`, if scheduled.
    pub fn get(&self, location: &str) -> Option<Arc<ScheduleEntry>> {
        self.entries.read().get(location).cloned()
    }

    /// Every scheduled location.
    pub fn locations(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of scheduled locations.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether the scheduler still accepts entries.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Cancel every entry and join the timer and worker threads.
    ///
    /// Ticks in flight finish first. Calling it again is a no-op.
    pub fn shutdown(&self) {
        {
            let mut entries = self.entries.write();
            if !self.running.swap(false, Ordering::AcqRel) {
                return;
            }
            for entry in entries.values() {
                entry.cancel();
            }
            entries.clear();
        }

        let _ = self.command_sender.send(TimerCommand::Shutdown);

        let mut threads = self.threads.lock();
        while let Some(handle) = threads.pop() {
            if handle.join().is_err() {
                error!("synonym scheduler thread panicked");
            }
        }
        info!("synonym scheduler stopped");
    }

    fn spawn_timer(
        commands: Receiver<TimerCommand>,
        jobs: Sender<Arc<ScheduleEntry>>,
    ) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("synonym-timer".to_string())
            .spawn(move || {
                let mut queue: BinaryHeap<Pending> = BinaryHeap::new();
                let mut seq = 0u64;

                loop {
                    let wait = queue
                        .peek()
                        .map(|p| p.due.saturating_duration_since(Instant::now()))
                        .unwrap_or(IDLE_WAIT);

                    match commands.recv_timeout(wait) {
                        Ok(TimerCommand::Arm(entry, due)) => {
                            seq += 1;
                            queue.push(Pending { due, seq, entry });
                        }
                        Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    let now = Instant::now();
                    while queue.peek().is_some_and(|p| p.due <= now) {
                        let Some(pending) = queue.pop() else { break };
                        if pending.entry.is_cancelled() {
                            continue;
                        }
                        if jobs.send(pending.entry).is_err() {
                            return;
                        }
                    }
                }
                // Dropping `jobs` here ends the workers' receive loops.
            })?;

        Ok(handle)
    }

    fn spawn_worker(
        worker_id: usize,
        jobs: Receiver<Arc<ScheduleEntry>>,
        commands: Sender<TimerCommand>,
    ) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("synonym-monitor-{worker_id}"))
            .spawn(move || {
                for entry in jobs.iter() {
                    if entry.is_cancelled() {
                        continue;
                    }

                    let monitor = Arc::clone(entry.monitor());
                    if panic::catch_unwind(AssertUnwindSafe(|| monitor.tick())).is_err() {
                        error!("synonym reload of {} panicked", entry.location());
                    }

                    if !entry.is_cancelled() {
                        let next = next_due(entry.interval());
                        // Fails only once the timer is gone, i.e. on shutdown.
                        let _ = commands.send(TimerCommand::Arm(entry, next));
                    }
                }
            })?;

        Ok(handle)
    }
}

/// When an entry re-armed now with `interval` is due, saturating far out.
fn next_due(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval)
        .or_else(|| now.checked_add(IDLE_WAIT))
        .unwrap_or(now)
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("locations", &self.locations())
            .field("running", &self.is_running())
            .finish()
    }
}
