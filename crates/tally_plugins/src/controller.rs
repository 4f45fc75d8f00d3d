//! Plugin Activation Controller
//!
//! Narrows the registry down to the plugins a tracking request needs.
//!
//! ```text
//!  load_tracker_plugins()
//!     │
//!     ├─ cache hit ───────────────▶ cached names (an empty list is a hit)
//!     │
//!     └─ cache miss ─▶ filter(activated set) ─▶ save to cache
//!                                   │
//!                                   ▼
//!                 reconcile registry: unload extras, load missing, reorder
//! ```
//!
//! Reconciliation runs under the registry lock, so concurrent callers never
//! see a half-reconciled registry. It is not transactional: a failed load
//! leaves earlier unloads/loads in place.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tally_cache::{CacheService, CacheServiceExt};
use wildmatch::WildMatch;

use crate::descriptor::PluginDescriptor;
use crate::error::PluginResult;
use crate::filter::RelevanceFilter;
use crate::registry::PluginRegistry;

/// Well-known cache key for the tracker plugin list
pub const DEFAULT_TRACKER_CACHE_KEY: &str = "PluginsTracker";

/// Lifecycle of the registry as seen by the controller
///
/// Reports the last transition that completed. A failed
/// [`ActivationController::load_tracker_plugins`] keeps the previous state
/// even though the registry may already be partly narrowed; inspect
/// [`ActivationController::registry`] for what is actually loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Nothing loaded yet
    Uninitialized,
    /// The full activated set is loaded
    FullyLoaded,
    /// Only tracker plugins are loaded
    TrackerScoped,
}

/// Tunables for tracker activation
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Cache key holding the tracker plugin list
    pub cache_key: String,
    /// Name patterns never loaded for tracking, even when listed
    pub plugins_not_to_load: Vec<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            cache_key: DEFAULT_TRACKER_CACHE_KEY.to_string(),
            plugins_not_to_load: Vec::new(),
        }
    }
}

/// Registry plus its lifecycle state, guarded together
struct Scoped {
    registry: PluginRegistry,
    state: ActivationState,
}

/// Computes, caches and applies the tracker plugin set
pub struct ActivationController {
    inner: Mutex<Scoped>,
    cache: Arc<dyn CacheService>,
    filter: Arc<dyn RelevanceFilter>,
    cache_key: String,
    not_to_load: Vec<WildMatch>,
}

impl ActivationController {
    /// Create a controller owning `registry`
    ///
    /// A registry that already holds its activated set starts out
    /// [`ActivationState::FullyLoaded`].
    pub fn new(
        registry: PluginRegistry,
        cache: Arc<dyn CacheService>,
        filter: Arc<dyn RelevanceFilter>,
        settings: TrackerSettings,
    ) -> Self {
        let state = if registry.is_empty() && registry.activated().is_empty() {
            ActivationState::Uninitialized
        } else {
            ActivationState::FullyLoaded
        };

        Self {
            inner: Mutex::new(Scoped { registry, state }),
            cache,
            filter,
            cache_key: settings.cache_key,
            not_to_load: settings
                .plugins_not_to_load
                .iter()
                .map(|p| WildMatch::new(p))
                .collect(),
        }
    }

    /// Cache key this controller reads and writes
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Current lifecycle state
    pub fn state(&self) -> ActivationState {
        self.inner.lock().state
    }

    /// Lock and inspect the registry
    ///
    /// Holding the guard blocks [`load_tracker_plugins`](Self::load_tracker_plugins).
    pub fn registry(&self) -> MappedMutexGuard<'_, PluginRegistry> {
        MutexGuard::map(self.inner.lock(), |scoped| &mut scoped.registry)
    }

    /// Load the application's activated plugin set
    pub fn load_activated_plugins<S: AsRef<str>>(&self, names: &[S]) -> PluginResult<()> {
        let mut scoped = self.inner.lock();
        scoped.registry.load_activated_plugins(names)?;
        scoped.state = ActivationState::FullyLoaded;
        Ok(())
    }

    /// Narrow the registry to the tracker plugins and return their names
    ///
    /// Uses the cached list when present (an empty list included), otherwise
    /// filters the activated set and caches the result. Afterwards the registry
    /// holds exactly the returned plugins, in the returned order.
    pub fn load_tracker_plugins(&self) -> PluginResult<Vec<String>> {
        let mut scoped = self.inner.lock();

        let candidates = match self.cached_plugin_list() {
            Some(names) => {
                tracing::debug!(
                    cache_key = %self.cache_key,
                    count = names.len(),
                    "Using cached tracker plugin list"
                );
                names
            }
            None => {
                let names = self.scan_tracker_plugins(&scoped.registry);
                tracing::info!(
                    cache_key = %self.cache_key,
                    count = names.len(),
                    "Detected tracker plugins"
                );
                if let Err(e) = self.cache.save_as(&self.cache_key, &names) {
                    tracing::warn!(
                        cache_key = %self.cache_key,
                        error = %e,
                        "Failed to cache tracker plugin list"
                    );
                }
                names
            }
        };

        let target = self.target_set(candidates);
        Self::reconcile(&mut scoped.registry, &target)?;
        scoped.state = ActivationState::TrackerScoped;

        Ok(target)
    }

    /// Drop the cached tracker plugin list
    ///
    /// The next [`load_tracker_plugins`](Self::load_tracker_plugins) call
    /// recomputes it. Returns whether an entry was removed.
    pub fn invalidate(&self) -> bool {
        match self.cache.delete(&self.cache_key) {
            Ok(removed) => {
                tracing::info!(cache_key = %self.cache_key, removed, "Invalidated tracker plugin list");
                removed
            }
            Err(e) => {
                tracing::warn!(
                    cache_key = %self.cache_key,
                    error = %e,
                    "Failed to invalidate tracker plugin list"
                );
                false
            }
        }
    }

    /// Read the cached list, treating an unreadable cache as a miss
    fn cached_plugin_list(&self) -> Option<Vec<String>> {
        let lookup = self.cache.contains(&self.cache_key).and_then(|present| {
            if present {
                self.cache.fetch_as::<Vec<String>>(&self.cache_key).map(Some)
            } else {
                Ok(None)
            }
        });

        match lookup {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(
                    cache_key = %self.cache_key,
                    error = %e,
                    "Tracker plugin cache unavailable, recomputing"
                );
                None
            }
        }
    }

    /// Filter the activated set, keeping registry order
    ///
    /// A registry populated without an activated set is scanned as loaded.
    fn scan_tracker_plugins(&self, registry: &PluginRegistry) -> Vec<String> {
        let keep = |d: &PluginDescriptor| self.filter.is_relevant(d).then(|| d.name.clone());

        if registry.activated().is_empty() {
            registry
                .loaded_plugins()
                .values()
                .filter_map(|p| keep(p.descriptor()))
                .collect()
        } else {
            registry.activated_descriptors().filter_map(keep).collect()
        }
    }

    /// Drop excluded and duplicate names
    fn target_set(&self, candidates: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::with_capacity(candidates.len());
        candidates
            .into_iter()
            .filter(|name| {
                let excluded = self.not_to_load.iter().any(|p| p.matches(name));
                if excluded {
                    tracing::debug!(plugin = %name, "Skipping plugin excluded from tracking");
                }
                !excluded
            })
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Make the registry hold exactly `target`, in order
    fn reconcile(registry: &mut PluginRegistry, target: &[String]) -> PluginResult<()> {
        if target.is_empty() {
            registry.unload_all_plugins();
            return Ok(());
        }

        let wanted: HashSet<&str> = target.iter().map(String::as_str).collect();
        let extras: Vec<String> = registry
            .loaded_names()
            .into_iter()
            .filter(|name| !wanted.contains(name.as_str()))
            .collect();
        for name in &extras {
            registry.unload_plugin(name);
        }

        for name in target {
            if let Err(e) = registry.load_plugin(name) {
                tracing::error!(plugin = %name, error = %e, "Failed to load tracker plugin");
                return Err(e);
            }
        }

        registry.reorder(target);
        tracing::debug!(
            unloaded = extras.len(),
            loaded = registry.len(),
            "Reconciled plugin registry"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ActivationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationController")
            .field("cache_key", &self.cache_key)
            .field("not_to_load", &self.not_to_load)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PluginCatalog;
    use crate::descriptor::DimensionScope;
    use crate::error::PluginError;
    use crate::filter::TrackerFilter;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_cache::{CacheError, CacheResult, EagerCache};

    /// A realistic installation: 56 plugins, 16 of them relevant to tracking
    fn installed_plugins() -> Vec<PluginDescriptor> {
        let tracker = [
            PluginDescriptor::new("CoreHome").tracker(),
            PluginDescriptor::new("Actions").dimension("idaction_url", DimensionScope::Action),
            PluginDescriptor::new("CustomVariables").hook("Tracker.getVisitFieldsToPersist"),
            PluginDescriptor::new("DevicesDetection").dimension("config_device_type", DimensionScope::Visit),
            PluginDescriptor::new("Events").dimension("idaction_event_category", DimensionScope::Action),
            PluginDescriptor::new("Goals").dimension("idgoal", DimensionScope::Conversion),
            PluginDescriptor::new("Login").hook("Request.initAuthenticationObject"),
            PluginDescriptor::new("PrivacyManager").hook("Tracker.setTrackerCacheGeneral"),
            PluginDescriptor::new("Provider").hook("Tracker.newVisitorInformation"),
            PluginDescriptor::new("Referrers").dimension("referer_type", DimensionScope::Visit),
            PluginDescriptor::new("Resolution").dimension("config_resolution", DimensionScope::Visit),
            PluginDescriptor::new("SitesManager").hook("Tracker.setTrackerCacheGeneral"),
            PluginDescriptor::new("UserCountry").dimension("location_country", DimensionScope::Visit),
            PluginDescriptor::new("UserLanguage").dimension("location_browser_lang", DimensionScope::Visit),
            PluginDescriptor::new("VisitTime").dimension("visitor_localtime", DimensionScope::Visit),
            PluginDescriptor::new("VisitorInterest").dimension("visitor_count_visits", DimensionScope::Visit),
        ];
        let reporting = [
            "API", "Annotations", "BulkTracking", "Contents", "CoreAdminHome", "CoreConsole",
            "CorePluginsAdmin", "CoreUpdater", "CoreVisualizations", "Dashboard", "DBStats",
            "Diagnostics", "ExampleAPI", "ExamplePlugin", "ExampleRssWidget", "ExampleTheme",
            "ExampleUI", "ExampleVisualization", "Feedback", "ImageGraph", "Insights",
            "Installation", "LanguagesManager", "LeftMenu", "Live", "Monolog", "Morpheus",
            "MultiSites", "Overlay", "ScheduledReports", "SegmentEditor", "SEO", "Transitions",
            "UserSettings", "UsersManager", "VisitFrequency", "VisitsSummary", "Widgetize",
            "ZenMode", "MobileMessaging",
        ];

        let mut plugins: Vec<PluginDescriptor> = tracker.into_iter().collect();
        plugins.extend(reporting.iter().map(|name| {
            PluginDescriptor::new(*name).hook("AssetManager.getJavaScriptFiles")
        }));
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    struct Fixture {
        controller: ActivationController,
        cache: Arc<EagerCache>,
    }

    fn fixture_with(settings: TrackerSettings) -> Fixture {
        let descriptors = installed_plugins();
        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        let catalog = Arc::new(PluginCatalog::from_descriptors(descriptors));

        let mut registry = PluginRegistry::new(catalog);
        registry.load_activated_plugins(&names).unwrap();

        let cache = Arc::new(EagerCache::new());
        let controller = ActivationController::new(
            registry,
            cache.clone(),
            Arc::new(TrackerFilter::new()),
            settings,
        );
        Fixture { controller, cache }
    }

    fn fixture() -> Fixture {
        fixture_with(TrackerSettings::default())
    }

    fn loaded_names(controller: &ActivationController) -> Vec<String> {
        controller.registry().loaded_names()
    }

    #[test]
    fn test_detects_tracker_plugins() {
        let f = fixture();
        assert!(f.controller.registry().len() > 50);
        assert_eq!(f.controller.state(), ActivationState::FullyLoaded);

        let plugins = f.controller.load_tracker_plugins().unwrap();

        let loaded = loaded_names(&f.controller);
        assert!(loaded.len() > 10);
        assert!(loaded.len() < 25);
        assert_eq!(plugins, loaded);
        assert!(plugins.contains(&"CoreHome".to_string()));
        assert!(!plugins.contains(&"Dashboard".to_string()));
        assert_eq!(f.controller.state(), ActivationState::TrackerScoped);
    }

    #[test]
    fn test_detected_plugins_keep_registry_order() {
        let f = fixture();
        let plugins = f.controller.load_tracker_plugins().unwrap();

        let mut sorted = plugins.clone();
        sorted.sort();
        assert_eq!(plugins, sorted);
    }

    #[test]
    fn test_caches_list_of_plugins() {
        let f = fixture();
        assert!(!f.cache.contains(DEFAULT_TRACKER_CACHE_KEY).unwrap());

        let plugins = f.controller.load_tracker_plugins().unwrap();

        assert!(f.cache.contains(DEFAULT_TRACKER_CACHE_KEY).unwrap());
        let cached: Vec<String> = f.cache.fetch_as(DEFAULT_TRACKER_CACHE_KEY).unwrap();
        assert_eq!(cached, plugins);
    }

    #[test]
    fn test_loads_cached_plugins_in_cached_order() {
        let f = fixture();
        let seeded = ["CoreHome", "UserLanguage", "CoreAdminHome", "Login"];
        f.cache.save_as(DEFAULT_TRACKER_CACHE_KEY, &seeded).unwrap();

        let plugins = f.controller.load_tracker_plugins().unwrap();

        assert_eq!(plugins, seeded);
        assert_eq!(f.controller.registry().len(), 4);
        assert_eq!(loaded_names(&f.controller), seeded);
    }

    #[test]
    fn test_unloads_all_plugins_if_none_to_load() {
        let f = fixture();
        f.cache.save(DEFAULT_TRACKER_CACHE_KEY, json!([])).unwrap();

        let plugins = f.controller.load_tracker_plugins().unwrap();

        assert!(plugins.is_empty());
        assert!(f.controller.registry().is_empty());
        assert_eq!(f.controller.state(), ActivationState::TrackerScoped);
    }

    #[test]
    fn test_idempotent_with_stable_cache() {
        let f = fixture();

        let first = f.controller.load_tracker_plugins().unwrap();
        let first_loaded = loaded_names(&f.controller);
        let second = f.controller.load_tracker_plugins().unwrap();

        assert_eq!(first, second);
        assert_eq!(first_loaded, loaded_names(&f.controller));
    }

    #[test]
    fn test_cache_hit_skips_filter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let filter = move |d: &PluginDescriptor| {
            counter.fetch_add(1, Ordering::SeqCst);
            d.tracker
        };

        let descriptors = installed_plugins();
        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        let mut registry = PluginRegistry::new(Arc::new(PluginCatalog::from_descriptors(descriptors)));
        registry.load_activated_plugins(&names).unwrap();

        let cache = Arc::new(EagerCache::new());
        cache.save_as(DEFAULT_TRACKER_CACHE_KEY, &["Login"]).unwrap();
        let controller = ActivationController::new(
            registry,
            cache,
            Arc::new(filter),
            TrackerSettings::default(),
        );

        assert_eq!(controller.load_tracker_plugins().unwrap(), vec!["Login"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_replaces_active_set_after_invalidation() {
        let f = fixture();
        f.cache.save_as(DEFAULT_TRACKER_CACHE_KEY, &["Login"]).unwrap();
        assert_eq!(f.controller.load_tracker_plugins().unwrap(), vec!["Login"]);

        assert!(f.controller.invalidate());
        assert!(!f.controller.invalidate());

        // Recomputed from the activated set, not from the narrowed registry
        let plugins = f.controller.load_tracker_plugins().unwrap();
        assert_eq!(plugins.len(), 16);
        assert_eq!(loaded_names(&f.controller), plugins);
    }

    #[test]
    fn test_switch_between_cached_lists() {
        let f = fixture();
        f.cache.save_as(DEFAULT_TRACKER_CACHE_KEY, &["Login", "CoreHome"]).unwrap();
        f.controller.load_tracker_plugins().unwrap();

        f.cache
            .save_as(DEFAULT_TRACKER_CACHE_KEY, &["Goals", "CoreHome", "Actions"])
            .unwrap();
        let plugins = f.controller.load_tracker_plugins().unwrap();

        assert_eq!(plugins, vec!["Goals", "CoreHome", "Actions"]);
        assert_eq!(loaded_names(&f.controller), plugins);
        assert!(!f.controller.registry().is_loaded("Login"));
    }

    #[test]
    fn test_stale_cache_entry_is_an_error() {
        let f = fixture();
        f.cache
            .save_as(DEFAULT_TRACKER_CACHE_KEY, &["CoreHome", "Uninstalled", "Login"])
            .unwrap();

        let result = f.controller.load_tracker_plugins();

        assert!(matches!(result, Err(PluginError::NotFound(name)) if name == "Uninstalled"));
        // Unloads and loads done before the failure are kept
        assert_eq!(loaded_names(&f.controller), vec!["CoreHome", "Login"]);
        // State reports the last completed transition
        assert_eq!(f.controller.state(), ActivationState::FullyLoaded);

        f.cache
            .save_as(DEFAULT_TRACKER_CACHE_KEY, &["Login", "CoreHome"])
            .unwrap();
        assert_eq!(
            f.controller.load_tracker_plugins().unwrap(),
            vec!["Login", "CoreHome"]
        );
        assert_eq!(f.controller.state(), ActivationState::TrackerScoped);
    }

    #[test]
    fn test_duplicate_cached_names_load_once() {
        let f = fixture();
        f.cache
            .save_as(DEFAULT_TRACKER_CACHE_KEY, &["Login", "CoreHome", "Login"])
            .unwrap();

        let plugins = f.controller.load_tracker_plugins().unwrap();
        assert_eq!(plugins, vec!["Login", "CoreHome"]);
        assert_eq!(loaded_names(&f.controller), plugins);
    }

    #[test]
    fn test_plugins_not_to_load() {
        let f = fixture_with(TrackerSettings {
            plugins_not_to_load: vec!["User*".to_string(), "Provider".to_string()],
            ..TrackerSettings::default()
        });

        let plugins = f.controller.load_tracker_plugins().unwrap();

        assert!(!plugins.iter().any(|p| p.starts_with("User") || p == "Provider"));
        assert_eq!(plugins.len(), 13);
        // The cache keeps the unfiltered list
        let cached: Vec<String> = f.cache.fetch_as(DEFAULT_TRACKER_CACHE_KEY).unwrap();
        assert_eq!(cached.len(), 16);
    }

    #[test]
    fn test_custom_cache_key() {
        let f = fixture_with(TrackerSettings {
            cache_key: "TrackerPlugins_v2".to_string(),
            ..TrackerSettings::default()
        });
        f.controller.load_tracker_plugins().unwrap();

        assert_eq!(f.controller.cache_key(), "TrackerPlugins_v2");
        assert!(f.cache.contains("TrackerPlugins_v2").unwrap());
        assert!(!f.cache.contains(DEFAULT_TRACKER_CACHE_KEY).unwrap());
    }

    #[test]
    fn test_round_trip_through_cache() {
        let f = fixture();
        let plugins = f.controller.load_tracker_plugins().unwrap();

        f.cache.save_as("copy", &plugins).unwrap();
        let fetched: Vec<String> = f.cache.fetch_as("copy").unwrap();
        assert_eq!(fetched, plugins);
    }

    /// Cache whose backend is unreachable
    struct DownCache {
        saves: AtomicUsize,
    }

    impl CacheService for DownCache {
        fn contains(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn fetch(&self, _key: &str) -> CacheResult<Value> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn save(&self, _key: &str, _value: Value) -> CacheResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn flush_all(&self) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_unavailable_cache_falls_back_to_filter() {
        let descriptors = installed_plugins();
        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        let mut registry = PluginRegistry::new(Arc::new(PluginCatalog::from_descriptors(descriptors)));
        registry.load_activated_plugins(&names).unwrap();

        let cache = Arc::new(DownCache {
            saves: AtomicUsize::new(0),
        });
        let controller = ActivationController::new(
            registry,
            cache.clone(),
            Arc::new(TrackerFilter::new()),
            TrackerSettings::default(),
        );

        let plugins = controller.load_tracker_plugins().unwrap();
        assert_eq!(plugins.len(), 16);
        assert_eq!(cache.saves.load(Ordering::SeqCst), 1);
        assert!(!controller.invalidate());
    }

    #[test]
    fn test_malformed_cache_entry_is_recomputed() {
        let f = fixture();
        f.cache
            .save(DEFAULT_TRACKER_CACHE_KEY, json!({"CoreHome": true}))
            .unwrap();

        let plugins = f.controller.load_tracker_plugins().unwrap();

        assert_eq!(plugins.len(), 16);
        let cached: Vec<String> = f.cache.fetch_as(DEFAULT_TRACKER_CACHE_KEY).unwrap();
        assert_eq!(cached, plugins);
    }

    #[test]
    fn test_uninitialized_registry() {
        let catalog = Arc::new(PluginCatalog::from_descriptors(installed_plugins()));
        let controller = ActivationController::new(
            PluginRegistry::new(catalog),
            Arc::new(EagerCache::new()),
            Arc::new(TrackerFilter::new()),
            TrackerSettings::default(),
        );
        assert_eq!(controller.state(), ActivationState::Uninitialized);

        // Nothing activated, nothing to track
        assert!(controller.load_tracker_plugins().unwrap().is_empty());

        controller.load_activated_plugins(&["CoreHome", "Dashboard"]).unwrap();
        assert_eq!(controller.state(), ActivationState::FullyLoaded);
        controller.invalidate();
        assert_eq!(controller.load_tracker_plugins().unwrap(), vec!["CoreHome"]);
    }

    #[test]
    fn test_concurrent_calls_observe_reconciled_registry() {
        let f = fixture();
        let controller = Arc::new(f.controller);
        let expected = controller.load_tracker_plugins().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let plugins = controller.load_tracker_plugins().unwrap();
                        assert_eq!(controller.registry().loaded_names(), plugins);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(controller.registry().loaded_names(), expected);
    }
}
