//! The explicitly owned runtime of the dynamic synonym engine.
//!
//! A [`SynonymService`] is started once, handed to whoever builds analysis
//! chains, and shut down when the host stops. It owns the poll scheduler, the
//! reconciliation sweep thread, the dictionary builder and the remote
//! transport; factories reach them only through the service.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::error::Result;
use crate::synonym::config::{ServiceConfig, SynonymFilterConfig};
use crate::synonym::factory::{DynamicSynonymFactory, FactoryContext};
use crate::synonym::rules::{DictionaryBuilder, RuleDictionaryBuilder};
use crate::synonym::scheduler::{Scheduler, SchedulerConfig};
use crate::synonym::source::{HttpTransport, Transport};
use crate::synonym::sweep::{ConfigurationSource, ReconciliationSweep, SweepHandle};

/// Scheduler, sweep and collaborators of the synonym engine.
pub struct SynonymService {
    config: ServiceConfig,
    context: FactoryContext,
    sweep: Arc<ReconciliationSweep>,
    sweep_handle: Mutex<Option<SweepHandle>>,
}

impl SynonymService {
    /// Start with the stock rule builder and an HTTP transport.
    pub fn start(config: ServiceConfig, configuration: Arc<dyn ConfigurationSource>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.http_timeout())?);
        Self::start_with(
            config,
            configuration,
            Arc::new(RuleDictionaryBuilder::new()),
            transport,
        )
    }

    /// Start with explicit collaborators.
    pub fn start_with(
        config: ServiceConfig,
        configuration: Arc<dyn ConfigurationSource>,
        builder: Arc<dyn DictionaryBuilder>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let scheduler = Arc::new(Scheduler::start(SchedulerConfig {
            worker_threads: config.worker_threads,
        })?);
        let sweep = Arc::new(ReconciliationSweep::new(
            Arc::clone(&scheduler),
            configuration,
            config.config_dir.clone(),
        ));
        let sweep_handle = Arc::clone(&sweep).spawn(config.sweep_interval())?;

        info!(
            "synonym service started: {} worker(s), sweep every {}s, config dir {}",
            config.worker_threads,
            config.sweep_interval_secs,
            config.config_dir.display()
        );

        Ok(SynonymService {
            context: FactoryContext {
                scheduler,
                builder,
                transport,
                config_dir: config.config_dir.clone(),
            },
            config,
            sweep,
            sweep_handle: Mutex::new(Some(sweep_handle)),
        })
    }

    /// Construct a factory for one configured filter.
    pub fn create_factory(
        &self,
        name: &str,
        config: &SynonymFilterConfig,
    ) -> Result<Arc<DynamicSynonymFactory>> {
        DynamicSynonymFactory::from_config(name, config, &self.context)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.context.scheduler
    }

    /// Run a reconciliation cycle now instead of waiting for the period.
    pub fn sweep_now(&self) -> Result<Vec<String>> {
        self.sweep.run_once()
    }

    /// Stop the sweep, cancel every schedule and join all threads.
    ///
    /// Factories keep serving their last dictionary. Calling it again is a
    /// no-op.
    pub fn shutdown(&self) {
        let handle = self.sweep_handle.lock().take();
        if let Some(mut handle) = handle {
            handle.stop();
            self.context.scheduler.shutdown();
            info!("synonym service stopped");
        }
    }
}

impl Drop for SynonymService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::synonym::source::remote::tests::MockTransport;
    use crate::synonym::sweep::InMemoryConfigurationSource;

    fn service(dir: &std::path::Path, config: Arc<InMemoryConfigurationSource>) -> SynonymService {
        SynonymService::start_with(
            ServiceConfig {
                config_dir: dir.to_path_buf(),
                ..Default::default()
            },
            config,
            Arc::new(RuleDictionaryBuilder::new()),
            Arc::new(MockTransport::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_factory_and_sweep_through_service() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a,b\n").unwrap();
        fs::write(dir.path().join("b.txt"), "c,d\n").unwrap();

        let config = Arc::new(InMemoryConfigurationSource::new());
        config.put_index("products", ["a.txt", "b.txt"]);
        let service = service(dir.path(), config.clone());

        let a = service
            .create_factory("a", &SynonymFilterConfig::new("a.txt"))
            .unwrap();
        let _b = service
            .create_factory("b", &SynonymFilterConfig::new("b.txt"))
            .unwrap();
        assert_eq!(service.scheduler().len(), 2);
        assert!(service.sweep_now().unwrap().is_empty());

        config.put_index("products", ["a.txt"]);
        let retired = service.sweep_now().unwrap();
        assert_eq!(retired.len(), 1);
        assert!(retired[0].ends_with("b.txt"));
        assert_eq!(a.current_dictionary().expand("a").len(), 2);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a,b\n").unwrap();
        let service = service(dir.path(), Arc::new(InMemoryConfigurationSource::new()));
        let factory = service
            .create_factory("a", &SynonymFilterConfig::new("a.txt"))
            .unwrap();

        service.shutdown();
        service.shutdown();

        assert!(!service.scheduler().is_running());
        assert!(service.create_factory("a", &SynonymFilterConfig::new("a.txt")).is_err());
        // The last dictionary keeps serving.
        assert_eq!(factory.current_dictionary().len(), 2);
    }

    #[test]
    fn test_invalid_service_config_rejected() {
        let result = SynonymService::start_with(
            ServiceConfig {
                worker_threads: 0,
                ..Default::default()
            },
            Arc::new(InMemoryConfigurationSource::new()),
            Arc::new(RuleDictionaryBuilder::new()),
            Arc::new(MockTransport::default()),
        );
        assert!(result.is_err());
    }
}
