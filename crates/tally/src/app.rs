//! Application bootstrap
//!
//! Startup order mirrors a request-serving process:
//! 1. Discover installed plugins and build the catalog
//! 2. Load the activated set (registry is `FullyLoaded`)
//! 3. Open the eager cache, persisted through the configured backend
//! 4. Hand registry, cache and filter to the activation controller

use std::sync::Arc;

use tally_cache::{CacheService, EagerCache, FileCache};
use tally_plugins::{
    ActivationController, PluginCatalog, PluginDescriptor, PluginRegistry, RelevanceFilter,
    TrackerFilter,
};
use tracing::{info, warn};

use crate::config::{CacheBackend, TallyConfig};
use crate::error::Result;
use crate::loader::discover_plugins;

/// Backend key the eager cache snapshot is stored under
pub const EAGER_CACHE_STORAGE_KEY: &str = "eagercache";

/// A bootstrapped application
pub struct Application {
    config: TallyConfig,
    catalog: Arc<PluginCatalog>,
    cache: Arc<EagerCache>,
    filter: Arc<TrackerFilter>,
    controller: ActivationController,
}

impl Application {
    /// Discover plugins and build the application from `config`
    pub fn bootstrap(config: TallyConfig) -> Result<Self> {
        let descriptors = discover_plugins(&config.plugins.dir)?;
        info!(
            "Discovered {} plugins in {}",
            descriptors.len(),
            config.plugins.dir.display()
        );

        Self::with_descriptors(config, descriptors)
    }

    /// Build the application from already-known plugin descriptors
    pub fn with_descriptors(
        config: TallyConfig,
        descriptors: Vec<PluginDescriptor>,
    ) -> Result<Self> {
        let catalog = Arc::new(PluginCatalog::from_descriptors(descriptors));

        let activated: Vec<String> = if config.plugins.activated.is_empty() {
            catalog.names().map(str::to_string).collect()
        } else {
            config.plugins.activated.clone()
        };

        let mut registry = PluginRegistry::new(Arc::clone(&catalog));
        registry.load_activated_plugins(&activated)?;

        let cache = Arc::new(Self::open_cache(&config)?);
        let filter = Arc::new(config.tracker.filter());

        let controller = ActivationController::new(
            registry,
            cache.clone(),
            filter.clone(),
            config.tracker.settings(),
        );

        Ok(Self {
            config,
            catalog,
            cache,
            filter,
            controller,
        })
    }

    fn open_cache(config: &TallyConfig) -> Result<EagerCache> {
        match config.cache.backend {
            CacheBackend::Memory => Ok(EagerCache::new()),
            CacheBackend::File => {
                let backend: Arc<dyn CacheService> = Arc::new(FileCache::new(&config.cache.dir)?);
                Ok(EagerCache::with_backend(backend, EAGER_CACHE_STORAGE_KEY))
            }
        }
    }

    pub fn config(&self) -> &TallyConfig {
        &self.config
    }

    /// Installed plugins
    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &EagerCache {
        &self.cache
    }

    pub fn controller(&self) -> &ActivationController {
        &self.controller
    }

    /// Whether the configured filter treats `descriptor` as a tracker plugin
    pub fn is_tracker_plugin(&self, descriptor: &PluginDescriptor) -> bool {
        self.filter.is_relevant(descriptor)
    }

    /// Write the eager cache to its backend if it changed
    ///
    /// Failures are logged, never fatal: the next run simply recomputes.
    pub fn persist_cache(&self) -> bool {
        match self.cache.persist_if_needed() {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "Failed to persist cache");
                false
            }
        }
    }
}
