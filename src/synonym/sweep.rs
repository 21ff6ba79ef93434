//! Reclamation of poll schedules nobody configures anymore.
//!
//! The sweep runs on its own period, independent of any source interval. Each
//! cycle asks a [`ConfigurationSource`] for every synonym location still named
//! by an active configuration and cancels the schedules of all other
//! locations. A factory never cancels its own schedule, since other factories
//! may share it; the sweep is the only path that frees polling resources.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{debug, error, info};
use parking_lot::RwLock;

use crate::error::{Result, SynonymError};
use crate::synonym::config::normalize_location;
use crate::synonym::scheduler::Scheduler;

/// Filter types whose settings carry a dynamic synonym source.
pub const DYNAMIC_SYNONYM_TYPES: [&str; 2] = ["dynamic_synonym", "dynamic_synonym_graph"];

/// Flattened settings per index: index name -> setting key -> value.
pub type IndexSettings = HashMap<String, HashMap<String, String>>;

/// Lists the synonym locations referenced by active configurations.
pub trait ConfigurationSource: Send + Sync {
    /// Every location currently configured anywhere, unnormalized.
    fn active_synonym_locations(&self) -> Result<HashSet<String>>;
}

/// A configuration source kept in memory, keyed by index name.
#[derive(Debug, Default)]
pub struct InMemoryConfigurationSource {
    indices: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryConfigurationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the synonym locations of an index, replacing earlier ones.
    pub fn put_index<I, S>(&self, index: &str, locations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices.write().insert(
            index.to_string(),
            locations.into_iter().map(Into::into).collect(),
        );
    }

    /// Forget an index. Returns whether it was known.
    pub fn remove_index(&self, index: &str) -> bool {
        self.indices.write().remove(index).is_some()
    }
}

impl ConfigurationSource for InMemoryConfigurationSource {
    fn active_synonym_locations(&self) -> Result<HashSet<String>> {
        Ok(self.indices.read().values().flatten().cloned().collect())
    }
}

enum SettingsOrigin {
    Fixed(IndexSettings),
    File(PathBuf),
}

/// A configuration source reading flattened index settings.
///
/// Every value whose key contains `synonyms_path` counts as an active
/// location. A file-backed source re-reads the file on every query, so edits
/// show up on the next sweep cycle.
pub struct SettingsConfigurationSource {
    origin: SettingsOrigin,
}

impl SettingsConfigurationSource {
    /// Use a fixed settings map.
    pub fn from_settings(settings: IndexSettings) -> Self {
        SettingsConfigurationSource {
            origin: SettingsOrigin::Fixed(settings),
        }
    }

    /// Read settings from a JSON document of the form
    /// `{ "<index>": { "<flat.key>": <value>, ... }, ... }`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        SettingsConfigurationSource {
            origin: SettingsOrigin::File(path.as_ref().to_path_buf()),
        }
    }

    /// The current settings.
    pub fn settings(&self) -> Result<IndexSettings> {
        match &self.origin {
            SettingsOrigin::Fixed(settings) => Ok(settings.clone()),
            SettingsOrigin::File(path) => load_settings_file(path),
        }
    }

    /// Settings of every dynamic synonym filter, keyed by `(index, filter)`.
    ///
    /// Filters live under `<prefix>analysis.filter.<name>.<option>` keys; only
    /// those whose `type` is one of [`DYNAMIC_SYNONYM_TYPES`] are returned, with
    /// their options stripped of the prefix.
    pub fn filter_settings(&self) -> Result<BTreeMap<(String, String), HashMap<String, String>>> {
        let mut filters: BTreeMap<(String, String), HashMap<String, String>> = BTreeMap::new();

        for (index, settings) in self.settings()? {
            for (key, value) in settings {
                let Some(start) = key.find("analysis.filter.") else {
                    continue;
                };
                let rest = &key[start + "analysis.filter.".len()..];
                let Some((name, option)) = rest.split_once('.') else {
                    continue;
                };
                filters
                    .entry((index.clone(), name.to_string()))
                    .or_default()
                    .insert(option.to_string(), value);
            }
        }

        filters.retain(|_, options| {
            options
                .get("type")
                .is_some_and(|t| DYNAMIC_SYNONYM_TYPES.contains(&t.as_str()))
        });
        Ok(filters)
    }
}

fn load_settings_file(path: &Path) -> Result<IndexSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SynonymError::config(format!(
            "Failed to read index settings '{}': {}",
            path.display(),
            e
        ))
    })?;
    let raw: HashMap<String, HashMap<String, serde_json::Value>> =
        serde_json::from_str(&content)?;

    Ok(raw
        .into_iter()
        .map(|(index, settings)| {
            let settings = settings
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
            (index, settings)
        })
        .collect())
}

impl ConfigurationSource for SettingsConfigurationSource {
    fn active_synonym_locations(&self) -> Result<HashSet<String>> {
        Ok(self
            .settings()?
            .into_values()
            .flat_map(|settings| {
                settings
                    .into_iter()
                    .filter(|(key, _)| key.contains("synonyms_path"))
                    .map(|(_, value)| value)
            })
            .collect())
    }
}

/// Cancels the schedules of locations no active configuration names.
pub struct ReconciliationSweep {
    scheduler: Arc<Scheduler>,
    source: Arc<dyn ConfigurationSource>,
    config_dir: PathBuf,
}

impl ReconciliationSweep {
    pub fn new(
        scheduler: Arc<Scheduler>,
        source: Arc<dyn ConfigurationSource>,
        config_dir: PathBuf,
    ) -> Self {
        ReconciliationSweep {
            scheduler,
            source,
            config_dir,
        }
    }

    /// Run one cycle and return the retired locations.
    ///
    /// If the configuration query fails nothing is cancelled. Entries created
    /// after the query started are kept even when unconfigured, so a factory
    /// constructed concurrently with the cycle never loses its fresh schedule.
    pub fn run_once(&self) -> Result<Vec<String>> {
        let started = Instant::now();
        let configured: HashSet<String> = self
            .source
            .active_synonym_locations()?
            .iter()
            .map(|location| normalize_location(location, &self.config_dir))
            .collect();

        let mut retired = Vec::new();
        for location in self.scheduler.locations() {
            if configured.contains(&location) {
                continue;
            }
            if self
                .scheduler
                .remove_if(&location, |entry| entry.created_at() <= started)
            {
                info!("stopped polling synonyms at {location}: no longer configured");
                retired.push(location);
            }
        }

        debug!(
            "reconciliation sweep done: {} configured, {} retired",
            configured.len(),
            retired.len()
        );
        Ok(retired)
    }

    /// Run one cycle, logging instead of returning a failure.
    pub fn run_cycle(&self) {
        if let Err(e) = self.run_once() {
            error!("failed to list configured synonym locations, skipping sweep: {e}");
        }
    }

    /// Run a cycle every `period` on a dedicated thread until stopped.
    pub fn spawn(self: Arc<Self>, period: Duration) -> Result<SweepHandle> {
        let (stop_sender, stop_receiver) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("synonym-sweep".to_string())
            .spawn(move || {
                loop {
                    match stop_receiver.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => self.run_cycle(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(SweepHandle {
            stop_sender: Some(stop_sender),
            thread: Some(thread),
        })
    }
}

/// Handle of a running sweep thread.
pub struct SweepHandle {
    stop_sender: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SweepHandle {
    /// Stop the sweep and wait for a running cycle to finish.
    pub fn stop(&mut self) {
        if let Some(sender) = self.stop_sender.take() {
            let _ = sender.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("synonym sweep thread panicked");
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synonym::config::CompileOptions;
    use crate::synonym::monitor::ReloadMonitor;
    use crate::synonym::rules::RuleDictionaryBuilder;
    use crate::synonym::scheduler::SchedulerConfig;
    use crate::synonym::source::LocalSource;

    fn schedule(scheduler: &Scheduler, location: &str) {
        scheduler
            .ensure(location, Duration::from_secs(3600), || {
                let source = LocalSource::new(
                    location.to_string(),
                    CompileOptions::default(),
                    Arc::new(RuleDictionaryBuilder::new()),
                );
                Arc::new(ReloadMonitor::new(Arc::new(source)))
            })
            .unwrap();
    }

    struct Unavailable;

    impl ConfigurationSource for Unavailable {
        fn active_synonym_locations(&self) -> Result<HashSet<String>> {
            Err(SynonymError::other("cluster state unavailable"))
        }
    }

    #[test]
    fn test_retires_only_unconfigured_locations() {
        let scheduler = Arc::new(Scheduler::start(SchedulerConfig::default()).unwrap());
        schedule(&scheduler, "/etc/search/a.txt");
        schedule(&scheduler, "/etc/search/b.txt");
        schedule(&scheduler, "http://host/c.txt");

        let config = Arc::new(InMemoryConfigurationSource::new());
        config.put_index("products", ["a.txt"]);
        config.put_index("articles", ["http://host/c.txt", "./a.txt"]);

        let sweep = ReconciliationSweep::new(
            Arc::clone(&scheduler),
            config.clone(),
            PathBuf::from("/etc/search"),
        );

        assert_eq!(sweep.run_once().unwrap(), vec!["/etc/search/b.txt".to_string()]);
        assert_eq!(scheduler.len(), 2);

        config.remove_index("articles");
        assert_eq!(sweep.run_once().unwrap(), vec!["http://host/c.txt".to_string()]);
        assert!(scheduler.get("/etc/search/a.txt").is_some());
    }

    #[test]
    fn test_failed_query_cancels_nothing() {
        let scheduler = Arc::new(Scheduler::start(SchedulerConfig::default()).unwrap());
        schedule(&scheduler, "/a.txt");

        let sweep = ReconciliationSweep::new(
            Arc::clone(&scheduler),
            Arc::new(Unavailable),
            PathBuf::from("/"),
        );

        assert!(sweep.run_once().is_err());
        sweep.run_cycle();
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_settings_source_collects_synonym_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "products": {
                    "index.analysis.filter.syn.type": "dynamic_synonym",
                    "index.analysis.filter.syn.synonyms_path": "synonyms.txt",
                    "index.analysis.filter.syn.interval": 30,
                    "index.analysis.filter.lower.type": "lowercase",
                    "index.number_of_shards": "1"
                },
                "articles": {
                    "index.analysis.filter.remote.type": "dynamic_synonym_graph",
                    "index.analysis.filter.remote.synonyms_path": "http://host/s.txt"
                }
            }"#,
        )
        .unwrap();

        let source = SettingsConfigurationSource::from_file(&path);
        let locations = source.active_synonym_locations().unwrap();
        assert_eq!(locations.len(), 2);
        assert!(locations.contains("synonyms.txt"));
        assert!(locations.contains("http://host/s.txt"));

        let filters = source.filter_settings().unwrap();
        assert_eq!(filters.len(), 2);
        let syn = &filters[&("products".to_string(), "syn".to_string())];
        assert_eq!(syn["interval"], "30");
        assert_eq!(syn["synonyms_path"], "synonyms.txt");
    }

    #[test]
    fn test_missing_settings_file_is_error() {
        let source = SettingsConfigurationSource::from_file("/nonexistent/settings.json");
        assert!(source.active_synonym_locations().is_err());
    }

    #[test]
    fn test_spawned_sweep_runs_and_stops() {
        let scheduler = Arc::new(Scheduler::start(SchedulerConfig::default()).unwrap());
        schedule(&scheduler, "/orphan.txt");

        let sweep = Arc::new(ReconciliationSweep::new(
            Arc::clone(&scheduler),
            Arc::new(InMemoryConfigurationSource::new()),
            PathBuf::from("/"),
        ));
        let mut handle = sweep.spawn(Duration::from_millis(20)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !scheduler.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop();
        handle.stop();
        assert!(scheduler.is_empty());
    }
}
