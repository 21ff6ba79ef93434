//! The per-location reload task body.
//!
//! One [`ReloadMonitor`] exists per scheduled location. Every factory that
//! names the location subscribes to it, so the location is probed and
//! compiled once per tick no matter how many analysis chains use it.
//!
//! Ticks of one monitor never overlap: the scheduler re-arms an entry only
//! after its previous tick returned.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};

use crate::synonym::dictionary::{Fingerprint, SynonymDictionary};
use crate::synonym::source::SourceHandle;

/// Receives freshly compiled dictionaries.
pub trait ReloadListener: Send + Sync {
    /// Publish `dictionary` as the new current one.
    fn on_reload(&self, dictionary: Arc<SynonymDictionary>);
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No live listener; the source was not probed.
    Idle,
    /// The source reported no change.
    Unchanged,
    /// A new dictionary was compiled and pushed to this many listeners.
    Reloaded(usize),
    /// Probing or compiling failed; the previous dictionary stays in force.
    Failed(String),
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub ticks: u64,
    pub reloads: u64,
    pub failures: u64,
    pub last_reload: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Change detection, rebuild and publish for one location.
pub struct ReloadMonitor {
    source: Arc<dyn SourceHandle>,
    last_fingerprint: Mutex<Option<Fingerprint>>,
    listeners: RwLock<Vec<Weak<dyn ReloadListener>>>,
    stats: Mutex<MonitorStats>,
}

impl ReloadMonitor {
    /// Create a monitor polling `source`.
    pub fn new(source: Arc<dyn SourceHandle>) -> Self {
        ReloadMonitor {
            source,
            last_fingerprint: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            stats: Mutex::new(MonitorStats::default()),
        }
    }

    /// The shared source of this location.
    pub fn source(&self) -> &Arc<dyn SourceHandle> {
        &self.source
    }

    /// Subscribe a listener. Only a weak handle is kept.
    pub fn subscribe(&self, listener: Weak<dyn ReloadListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of listeners still alive.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Record the fingerprint of a dictionary built outside a tick, unless a
    /// tick already recorded one.
    pub fn seed(&self, fingerprint: &Fingerprint) {
        let mut last = self.last_fingerprint.lock();
        if last.is_none() {
            *last = Some(fingerprint.clone());
        }
    }

    /// Fingerprint of the last content this monitor compiled or was seeded with.
    pub fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.last_fingerprint.lock().clone()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }

    /// Upgrade the live listeners and drop the dead ones.
    fn live_listeners(&self) -> Vec<Arc<dyn ReloadListener>> {
        let mut listeners = self.listeners.write();
        let mut live = Vec::with_capacity(listeners.len());
        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        live
    }

    /// Run one poll cycle.
    ///
    /// On failure the fingerprint is left untouched, so the next tick probes
    /// against the last good content again.
    pub fn tick(&self) -> TickOutcome {
        self.stats.lock().ticks += 1;

        let listeners = self.live_listeners();
        if listeners.is_empty() {
            debug!("no live consumers of {}, skipping", self.source.location());
            return TickOutcome::Idle;
        }

        let last = self.last_fingerprint();
        let outcome = self.source.has_changed(last.as_ref()).and_then(|changed| {
            if changed {
                self.source.fetch_and_compile().map(Some)
            } else {
                Ok(None)
            }
        });

        match outcome {
            Ok(None) => {
                debug!("synonyms at {} unchanged", self.source.location());
                TickOutcome::Unchanged
            }
            Ok(Some(dictionary)) => {
                let dictionary = Arc::new(dictionary);
                *self.last_fingerprint.lock() = Some(dictionary.fingerprint().clone());

                for listener in &listeners {
                    listener.on_reload(Arc::clone(&dictionary));
                }

                {
                    let mut stats = self.stats.lock();
                    stats.reloads += 1;
                    stats.last_reload = Some(Utc::now());
                    stats.last_error = None;
                }
                info!(
                    "reloaded synonyms from {} ({} entries, {}) for {} consumer(s)",
                    self.source.location(),
                    dictionary.len(),
                    dictionary.fingerprint(),
                    listeners.len()
                );
                TickOutcome::Reloaded(listeners.len())
            }
            Err(e) => {
                error!(
                    "failed to reload synonyms from {}, keeping previous dictionary: {e}",
                    self.source.location()
                );
                let message = e.to_string();
                {
                    let mut stats = self.stats.lock();
                    stats.failures += 1;
                    stats.last_error = Some(message.clone());
                }
                TickOutcome::Failed(message)
            }
        }
    }
}

impl fmt::Debug for ReloadMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadMonitor")
            .field("source", &self.source)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
