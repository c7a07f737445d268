//! Event recorder
//!
//! The per-response entry point for the host. `record(url, status)` looks
//! the event up in the rule registry and bumps the matching counter slot.
//! It never fails observably: unmapped events are ignored, and if setup
//! failed the recorder turns into a no-op instead of disturbing the host.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::rules::RuleRegistry;
use crate::slab::CounterSlab;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Rule registry and counter store for one process
#[derive(Debug)]
pub struct MeterContext {
    registry: RuleRegistry,
    slab: Arc<CounterSlab>,
}

impl MeterContext {
    /// Combine a registry and a store
    ///
    /// # Errors
    ///
    /// Fails if the registry may hand out slots the store does not have.
    pub fn new(registry: RuleRegistry, slab: Arc<CounterSlab>) -> AppResult<Self> {
        if registry.slot_count() > slab.slot_count() {
            return Err(AppError::Config(format!(
                "rule registry allows {} slots but counter store {} has only {}",
                registry.slot_count(),
                slab.path().display(),
                slab.slot_count()
            )));
        }
        Ok(Self { registry, slab })
    }

    /// Load the rule source and open the counter store
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for the metrics subsystem: unreadable
    /// rule source, counter store that cannot be created/opened/mapped, or a
    /// zero slot count.
    pub fn initialize(
        rule_source: impl AsRef<Path>,
        store_path: impl AsRef<Path>,
        slot_count: usize,
    ) -> AppResult<Self> {
        let slab = Arc::new(CounterSlab::open(store_path, slot_count)?);
        let registry = RuleRegistry::load(rule_source, slot_count)?;
        Self::new(registry, slab)
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn slab(&self) -> &Arc<CounterSlab> {
        &self.slab
    }

    /// Count one response; returns whether a rule matched
    pub fn record(&self, url: &str, status: u16) -> bool {
        let Some(slot) = self.registry.resolve(url, status) else {
            tracing::trace!(url, status, "No metric rule for response");
            return false;
        };

        match self.slab.increment(slot) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(url, status, slot, error = %e, "Failed to count response");
                false
            }
        }
    }
}

/// Where the recorder finds its rules and counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSettings {
    pub rule_source: PathBuf,
    pub store_path: PathBuf,
    pub slot_count: usize,
}

impl InitSettings {
    pub fn new(
        rule_source: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
        slot_count: usize,
    ) -> Self {
        Self {
            rule_source: rule_source.into(),
            store_path: store_path.into(),
            slot_count,
        }
    }
}

impl From<&Config> for InitSettings {
    fn from(config: &Config) -> Self {
        Self::new(
            config.rules.path.clone(),
            config.store.path.clone(),
            config.store.slot_count,
        )
    }
}

/// Host-facing recorder with lazy, once-only setup
///
/// Setup runs at most once per recorder, on the first `record` or an
/// explicit `initialize`, even when many threads race to be first. A failed
/// setup is remembered: the recorder stays a no-op.
#[derive(Debug)]
pub struct Recorder {
    settings: InitSettings,
    context: OnceLock<Option<MeterContext>>,
}

impl Recorder {
    pub fn new(settings: InitSettings) -> Self {
        Self {
            settings,
            context: OnceLock::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(InitSettings::from(config))
    }

    /// Wrap an already initialized context
    pub fn with_context(settings: InitSettings, context: MeterContext) -> Self {
        Self {
            settings,
            context: OnceLock::from(Some(context)),
        }
    }

    pub fn settings(&self) -> &InitSettings {
        &self.settings
    }

    /// Run setup if it has not run yet
    ///
    /// # Errors
    ///
    /// Returns the setup error to the caller whose call performed the setup,
    /// and `MetricsDisabled` to every later caller after a failed setup.
    pub fn initialize(&self) -> AppResult<&MeterContext> {
        let mut failure = None;
        let context = self.context.get_or_init(|| {
            let settings = &self.settings;
            match MeterContext::initialize(
                &settings.rule_source,
                &settings.store_path,
                settings.slot_count,
            ) {
                Ok(context) => {
                    tracing::info!(
                        rules = context.registry().len(),
                        store = %settings.store_path.display(),
                        slot_count = settings.slot_count,
                        "Metrics recorder initialized"
                    );
                    Some(context)
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Metrics recorder initialization failed; recording is disabled"
                    );
                    failure = Some(e);
                    None
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        context.as_ref().ok_or(AppError::MetricsDisabled)
    }

    /// The context, if setup has run and succeeded
    pub fn context(&self) -> Option<&MeterContext> {
        self.context.get().and_then(Option::as_ref)
    }

    /// Count one response; returns whether it was recorded
    ///
    /// Never fails: an unmapped event or a disabled recorder just returns
    /// `false`.
    pub fn record(&self, url: &str, status: u16) -> bool {
        match self.initialize() {
            Ok(context) => context.record(url, status),
            Err(_) => false,
        }
    }
}
