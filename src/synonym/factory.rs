//! Per-configuration synonym filter factory.
//!
//! A [`DynamicSynonymFactory`] is created once per configured filter. It makes
//! sure its location is polled, builds the initial dictionary synchronously,
//! and afterwards receives every reload from the shared monitor of its
//! location. Filters it creates are registered as subscribers and get each
//! new dictionary pushed to them.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::error::Result;
use crate::synonym::config::{AnalysisMode, SourceDescriptor, SynonymFilterConfig};
use crate::synonym::dictionary::SynonymDictionary;
use crate::synonym::filter::{DynamicSynonymFilter, FilterCell};
use crate::synonym::monitor::{ReloadListener, ReloadMonitor};
use crate::synonym::rules::DictionaryBuilder;
use crate::synonym::scheduler::Scheduler;
use crate::synonym::source::{Transport, open_source};

/// Everything a factory needs from the service that owns it.
#[derive(Clone)]
pub struct FactoryContext {
    pub scheduler: Arc<Scheduler>,
    pub builder: Arc<dyn DictionaryBuilder>,
    pub transport: Arc<dyn Transport>,
    /// Directory relative local locations resolve against.
    pub config_dir: PathBuf,
}

/// Weak handles to the filters created by one factory.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    handles: RwLock<HashMap<u64, Weak<FilterCell>>>,
}

impl SubscriberRegistry {
    pub(crate) fn register(&self, cell: &Arc<FilterCell>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.write().insert(id, Arc::downgrade(cell));
        id
    }

    /// Forget a subscriber. Returns whether it was registered.
    pub fn unregister(&self, id: u64) -> bool {
        self.handles.write().remove(&id).is_some()
    }

    /// Push `dictionary` to every live subscriber, then drop the dead ones.
    ///
    /// Handles are upgraded under the read lock and notified after it is
    /// released, so registration never waits on notification.
    pub(crate) fn notify(&self, dictionary: &Arc<SynonymDictionary>) -> usize {
        let (live, dead): (Vec<_>, Vec<_>) = {
            let handles = self.handles.read();
            let mut live = Vec::with_capacity(handles.len());
            let mut dead = Vec::new();
            for (id, handle) in handles.iter() {
                match handle.upgrade() {
                    Some(cell) => live.push(cell),
                    None => dead.push(*id),
                }
            }
            (live, dead)
        };

        for cell in &live {
            cell.store(Arc::clone(dictionary));
        }

        if !dead.is_empty() {
            let mut handles = self.handles.write();
            for id in dead {
                handles.remove(&id);
            }
        }
        live.len()
    }

    /// Drop handles whose filter is gone. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut handles = self.handles.write();
        let before = handles.len();
        handles.retain(|_, handle| handle.strong_count() > 0);
        before - handles.len()
    }

    /// Number of registered handles, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

/// Creates dynamic synonym filters for one configured source.
pub struct DynamicSynonymFactory {
    name: String,
    descriptor: SourceDescriptor,
    current: ArcSwap<SynonymDictionary>,
    subscribers: SubscriberRegistry,
    monitor: Arc<ReloadMonitor>,
}

impl DynamicSynonymFactory {
    /// Validate `config` and construct the factory.
    pub fn from_config(
        name: &str,
        config: &SynonymFilterConfig,
        context: &FactoryContext,
    ) -> Result<Arc<Self>> {
        let descriptor = config.to_descriptor(&context.config_dir)?;
        Self::new(name, descriptor, context)
    }

    /// Construct the factory for an already validated descriptor.
    ///
    /// Fails if the initial dictionary cannot be built; no factory exists
    /// with a missing dictionary.
    pub fn new(
        name: &str,
        descriptor: SourceDescriptor,
        context: &FactoryContext,
    ) -> Result<Arc<Self>> {
        let entry = context
            .scheduler
            .ensure(&descriptor.location, descriptor.interval, || {
                let source = open_source(
                    &descriptor,
                    Arc::clone(&context.builder),
                    Arc::clone(&context.transport),
                );
                Arc::new(ReloadMonitor::new(source))
            })?;
        let monitor = Arc::clone(entry.monitor());

        if monitor.source().options() != &descriptor.options
            || entry.interval() != descriptor.interval
        {
            warn!(
                "filter [{name}] shares {} with a filter configured differently; \
                 polling every {:?} with {:?}",
                descriptor.location,
                entry.interval(),
                monitor.source().options()
            );
        }

        let initial = Arc::new(monitor.source().fetch_and_compile()?);
        monitor.seed(initial.fingerprint());

        let factory = Arc::new(DynamicSynonymFactory {
            name: name.to_string(),
            descriptor,
            current: ArcSwap::new(Arc::clone(&initial)),
            subscribers: SubscriberRegistry::default(),
            monitor: Arc::clone(&monitor),
        });
        let listener: Arc<dyn ReloadListener> = factory.clone();
        monitor.subscribe(Arc::downgrade(&listener));

        // A tick between the initial build and the subscription was not
        // delivered here.
        if monitor.last_fingerprint().as_ref() != Some(initial.fingerprint()) {
            debug!("filter [{name}] rebuilding: source changed during construction");
            let fresh = Arc::new(monitor.source().fetch_and_compile()?);
            let _ = factory.current.compare_and_swap(&initial, fresh);
        }

        let dictionary = factory.current_dictionary();
        info!(
            "created synonym filter [{name}] from {} ({} entries, {})",
            factory.descriptor.location,
            dictionary.len(),
            dictionary.fingerprint()
        );
        Ok(factory)
    }

    /// Name of the configured filter.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn analysis_mode(&self) -> AnalysisMode {
        self.descriptor.analysis_mode()
    }

    /// The monitor shared by every factory of this location.
    pub fn monitor(&self) -> &Arc<ReloadMonitor> {
        &self.monitor
    }

    /// The latest published dictionary. Never blocks.
    pub fn current_dictionary(&self) -> Arc<SynonymDictionary> {
        self.current.load_full()
    }

    /// Create a filter bound to this factory and register it as a subscriber.
    pub fn create_filter(self: &Arc<Self>) -> DynamicSynonymFilter {
        let initial = self.current.load_full();
        let cell = Arc::new(FilterCell::new(Arc::clone(&initial)));
        let id = self.subscribers.register(&cell);

        // A reload that stored before the registration did not notify this cell.
        let now = self.current.load_full();
        if !Arc::ptr_eq(&initial, &now) {
            cell.replace_if_unchanged(&initial, now);
        }

        DynamicSynonymFilter::new(id, cell, Arc::downgrade(self))
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        if self.subscribers.unregister(id) {
            debug!("filter [{}] detached subscriber {id}", self.name);
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop subscribers whose filter is gone.
    pub fn prune_subscribers(&self) -> usize {
        self.subscribers.prune()
    }
}

impl ReloadListener for DynamicSynonymFactory {
    fn on_reload(&self, dictionary: Arc<SynonymDictionary>) {
        self.current.store(Arc::clone(&dictionary));
        let notified = self.subscribers.notify(&dictionary);
        debug!(
            "filter [{}] published new synonyms to {notified} subscriber(s)",
            self.name
        );
    }
}

impl fmt::Debug for DynamicSynonymFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicSynonymFactory")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::analysis::token::{IntoTokenStream, Token};
    use crate::analysis::token_filter::Filter;
    use crate::synonym::monitor::TickOutcome;
    use crate::synonym::rules::RuleDictionaryBuilder;
    use crate::synonym::scheduler::SchedulerConfig;
    use crate::synonym::source::remote::tests::MockTransport;

    fn context(dir: &std::path::Path, transport: Arc<MockTransport>) -> FactoryContext {
        FactoryContext {
            scheduler: Arc::new(Scheduler::start(SchedulerConfig::default()).unwrap()),
            builder: Arc::new(RuleDictionaryBuilder::new()),
            transport,
            config_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_construction_validates_and_builds() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("synonyms.txt"), "a,b,c\n").unwrap();
        let ctx = context(dir.path(), Arc::new(MockTransport::default()));

        let err = DynamicSynonymFactory::from_config(
            "syn",
            &SynonymFilterConfig::new("synonyms.txt").with_interval(0),
            &ctx,
        )
        .unwrap_err();
        assert!(err.is_config());
        assert!(ctx.scheduler.is_empty());

        let err = DynamicSynonymFactory::from_config(
            "syn",
            &SynonymFilterConfig::new("synonyms.txt").with_interval(i64::MAX),
            &ctx,
        )
        .unwrap_err();
        assert!(err.is_config());
        assert!(ctx.scheduler.is_empty());

        let factory = DynamicSynonymFactory::from_config(
            "syn",
            &SynonymFilterConfig::new("synonyms.txt"),
            &ctx,
        )
        .unwrap();
        assert_eq!(factory.current_dictionary().expand("a").len(), 3);
        assert_eq!(factory.analysis_mode(), AnalysisMode::All);
        assert_eq!(ctx.scheduler.len(), 1);
    }

    #[test]
    fn test_initial_build_failure_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(MockTransport::default()));

        let result = DynamicSynonymFactory::from_config(
            "syn",
            &SynonymFilterConfig::new("missing.txt"),
            &ctx,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_reload_fans_out_to_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synonyms.txt");
        fs::write(&path, "a,b,c\n").unwrap();
        let ctx = context(dir.path(), Arc::new(MockTransport::default()));

        let factory = DynamicSynonymFactory::from_config(
            "syn",
            &SynonymFilterConfig::new("synonyms.txt").with_interval(3600),
            &ctx,
        )
        .unwrap();
        let filters: Vec<_> = (0..3).map(|_| factory.create_filter()).collect();
        assert_eq!(factory.subscriber_count(), 3);

        let before = factory.current_dictionary();
        assert_eq!(factory.monitor().tick(), TickOutcome::Unchanged);
        assert!(Arc::ptr_eq(&before, &factory.current_dictionary()));

        fs::write(&path, "a,b,c,d\n").unwrap();
        assert_eq!(factory.monitor().tick(), TickOutcome::Reloaded(1));

        let current = factory.current_dictionary();
        assert_eq!(current.expand("a").len(), 4);
        for filter in &filters {
            assert!(Arc::ptr_eq(&filter.dictionary(), &current));
            let tokens: Vec<Token> = filter
                .filter(vec![Token::new("a", 0)].into_token_stream())
                .unwrap()
                .collect();
            assert_eq!(tokens.len(), 4);
        }
    }

    #[test]
    fn test_detach_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("synonyms.txt"), "a,b\n").unwrap();
        let ctx = context(dir.path(), Arc::new(MockTransport::default()));
        let factory = DynamicSynonymFactory::from_config(
            "syn",
            &SynonymFilterConfig::new("synonyms.txt"),
            &ctx,
        )
        .unwrap();

        let kept = factory.create_filter();
        let detached = factory.create_filter();
        detached.detach();
        assert_eq!(factory.subscriber_count(), 1);

        drop(detached);
        {
            let _dropped = factory.create_filter();
        }
        assert_eq!(factory.subscriber_count(), 1);
        assert_eq!(factory.prune_subscribers(), 0);
        assert!(!kept.is_detached());
    }

    #[test]
    fn test_remote_not_found_keeps_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::serving("a,b,c", Some("Mon, 01 Jan 2024")));
        let ctx = context(dir.path(), transport.clone());

        let factory = DynamicSynonymFactory::from_config(
            "remote",
            &SynonymFilterConfig::new("http://synonyms.example/rules.txt"),
            &ctx,
        )
        .unwrap();
        let filter = factory.create_filter();
        let before = factory.current_dictionary();

        transport.set(404, "", None);
        assert!(matches!(factory.monitor().tick(), TickOutcome::Failed(_)));
        assert!(Arc::ptr_eq(&before, &factory.current_dictionary()));
        assert!(Arc::ptr_eq(&before, &filter.dictionary()));
    }

    #[test]
    fn test_factories_share_one_schedule() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("synonyms.txt"), "a,b\n").unwrap();
        let ctx = context(dir.path(), Arc::new(MockTransport::default()));

        let first = DynamicSynonymFactory::from_config(
            "first",
            &SynonymFilterConfig::new("synonyms.txt"),
            &ctx,
        )
        .unwrap();
        let second = DynamicSynonymFactory::from_config(
            "second",
            &SynonymFilterConfig::new("./synonyms.txt").with_lenient(true),
            &ctx,
        )
        .unwrap();

        assert_eq!(ctx.scheduler.len(), 1);
        assert!(Arc::ptr_eq(first.monitor(), second.monitor()));
        assert_eq!(first.monitor().listener_count(), 2);

        drop(first);
        assert_eq!(second.monitor().listener_count(), 1);
        assert_eq!(ctx.scheduler.len(), 1);
    }
}
