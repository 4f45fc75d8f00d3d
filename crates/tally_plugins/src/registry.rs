//! Plugin Registry - Loaded plugin instances, keyed by name
//!
//! Load order is preserved and observable: callers read the loaded set as an
//! ordered sequence of names.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::catalog::{Plugin, PluginCatalog};
use crate::descriptor::PluginDescriptor;
use crate::error::PluginResult;

/// Ordered set of loaded plugins
pub struct PluginRegistry {
    catalog: Arc<PluginCatalog>,
    loaded: IndexMap<String, Box<dyn Plugin>>,
    /// Names loaded at application start
    activated: Vec<String>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .field("activated", &self.activated)
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry over the installed plugins in `catalog`
    pub fn new(catalog: Arc<PluginCatalog>) -> Self {
        Self {
            catalog,
            loaded: IndexMap::new(),
            activated: Vec::new(),
        }
    }

    /// Installed plugins this registry loads from
    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Loaded plugins, in load order
    pub fn loaded_plugins(&self) -> &IndexMap<String, Box<dyn Plugin>> {
        &self.loaded
    }

    /// Loaded plugin names, in load order
    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.keys().cloned().collect()
    }

    /// Get a loaded plugin by name
    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.loaded.get(name).map(|p| p.as_ref())
    }

    /// Check if a plugin is loaded
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    /// Number of loaded plugins
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// Check if nothing is loaded
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Load a plugin by name
    ///
    /// Loading an already-loaded plugin is a no-op. Fails with
    /// [`PluginError::NotFound`](crate::PluginError::NotFound) when the name is
    /// not installed.
    pub fn load_plugin(&mut self, name: &str) -> PluginResult<()> {
        if self.loaded.contains_key(name) {
            return Ok(());
        }

        let mut plugin = self.catalog.instantiate(name)?;
        plugin.on_load();
        self.loaded.insert(name.to_string(), plugin);
        tracing::debug!(plugin = %name, "Loaded plugin");

        Ok(())
    }

    /// Load several plugins in order, stopping at the first failure
    pub fn load_plugins<S: AsRef<str>>(&mut self, names: &[S]) -> PluginResult<()> {
        for name in names {
            self.load_plugin(name.as_ref())?;
        }
        Ok(())
    }

    /// Unload a plugin, returning whether it was loaded
    pub fn unload_plugin(&mut self, name: &str) -> bool {
        match self.loaded.shift_remove(name) {
            Some(mut plugin) => {
                plugin.on_unload();
                tracing::debug!(plugin = %name, "Unloaded plugin");
                true
            }
            None => false,
        }
    }

    /// Unload every plugin
    pub fn unload_all_plugins(&mut self) {
        let count = self.loaded.len();
        for (_, mut plugin) in self.loaded.drain(..) {
            plugin.on_unload();
        }
        if count > 0 {
            tracing::debug!(count, "Unloaded all plugins");
        }
    }

    /// Load the application's activated plugin set
    ///
    /// Replaces whatever is loaded with `names`, in order, and remembers them as
    /// the activated set.
    pub fn load_activated_plugins<S: AsRef<str>>(&mut self, names: &[S]) -> PluginResult<()> {
        self.unload_all_plugins();
        self.activated = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.load_plugins(names)?;
        tracing::info!(count = self.loaded.len(), "Loaded activated plugins");
        Ok(())
    }

    /// Names loaded at application start
    pub fn activated(&self) -> &[String] {
        &self.activated
    }

    /// Descriptors of the activated set, in activation order
    ///
    /// Names that are no longer installed are skipped.
    pub fn activated_descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.activated.iter().filter_map(|name| self.catalog.get(name))
    }

    /// Rearrange loaded plugins so their order follows `names`
    ///
    /// Loaded plugins not named keep their relative order after the named ones.
    /// Instances are moved, not recreated.
    pub(crate) fn reorder<S: AsRef<str>>(&mut self, names: &[S]) {
        let mut remaining = std::mem::take(&mut self.loaded);
        let mut ordered = IndexMap::with_capacity(remaining.len());

        for name in names {
            if let Some((key, plugin)) = remaining.shift_remove_entry(name.as_ref()) {
                ordered.insert(key, plugin);
            }
        }
        ordered.extend(remaining);

        self.loaded = ordered;
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.unload_all_plugins();
    }
}
