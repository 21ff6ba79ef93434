//! Hot-reloaded synonym dictionaries.
//!
//! The engine keeps a compiled [`SynonymDictionary`] per configured source and
//! replaces it wholesale whenever the source changes, without interrupting
//! the analysis chains that use it.
//!
//! - [`source`]: local files and HTTP endpoints, with cheap change detection
//! - [`scheduler`]: one poll task per normalized location, on a shared pool
//! - [`monitor`]: the poll task body (probe, rebuild, publish)
//! - [`factory`]: per-configuration factories and their subscriber registry
//! - [`filter`]: the token filter fed by a factory
//! - [`sweep`]: retirement of schedules nobody configures anymore
//! - [`service`]: the owning runtime tying it all together

pub mod config;
pub mod dictionary;
pub mod factory;
pub mod filter;
pub mod monitor;
pub mod rules;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod sweep;

pub use config::{
    AnalysisMode, CompileOptions, ServiceConfig, SourceDescriptor, SourceKind, SynonymFilterConfig,
    SynonymFormat,
};
pub use dictionary::{Fingerprint, SynonymDictionary};
pub use factory::{DynamicSynonymFactory, FactoryContext, SubscriberRegistry};
pub use filter::DynamicSynonymFilter;
pub use monitor::{MonitorStats, ReloadListener, ReloadMonitor, TickOutcome};
pub use rules::{DictionaryBuilder, RuleDictionaryBuilder};
pub use scheduler::{ScheduleEntry, Scheduler, SchedulerConfig};
pub use service::SynonymService;
pub use source::{LocalSource, RemoteSource, SourceHandle, Transport};
pub use sweep::{
    ConfigurationSource, InMemoryConfigurationSource, ReconciliationSweep,
    SettingsConfigurationSource,
};
