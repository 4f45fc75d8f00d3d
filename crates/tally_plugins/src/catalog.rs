//! Plugin Catalog - Installed plugins and the factories that instantiate them
//!
//! The catalog is resolved once at startup. Loading a plugin by name is a
//! lookup here followed by a factory call; an unknown name is a
//! [`PluginError::NotFound`] rather than a failed dynamic lookup.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::descriptor::PluginDescriptor;
use crate::error::{PluginError, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded plugin instance
pub trait Plugin: Send + Sync {
    /// Static metadata for this plugin
    fn descriptor(&self) -> &PluginDescriptor;

    /// Plugin name
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Called right after the instance is added to a registry
    fn on_load(&mut self) {}

    /// Called when the instance is removed from a registry
    ///
    /// Release anything the plugin holds here; the instance is dropped
    /// afterwards.
    fn on_unload(&mut self) {}
}

/// Plugin backed only by its manifest
///
/// Used for plugins discovered on disk that carry no native code.
#[derive(Debug, Clone)]
pub struct ManifestPlugin {
    descriptor: PluginDescriptor,
}

impl ManifestPlugin {
    pub fn new(descriptor: PluginDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Plugin for ManifestPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn on_load(&mut self) {
        tracing::trace!(plugin = %self.descriptor.name, "Manifest plugin loaded");
    }

    fn on_unload(&mut self) {
        tracing::trace!(plugin = %self.descriptor.name, "Manifest plugin unloaded");
    }
}

/// Creates a plugin instance from its descriptor
pub type PluginFactory = Arc<dyn Fn(&PluginDescriptor) -> Box<dyn Plugin> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Entry in the catalog
struct CatalogEntry {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
}

/// Every installed plugin, in registration order
#[derive(Default)]
pub struct PluginCatalog {
    plugins: IndexMap<String, CatalogEntry>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog of manifest-backed plugins
    ///
    /// Later duplicates of a name are skipped with a warning.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = PluginDescriptor>) -> Self {
        let mut catalog = Self::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if let Err(e) = catalog.register_manifest(descriptor) {
                tracing::warn!(plugin = %name, "Skipping plugin: {}", e);
            }
        }
        catalog
    }

    /// Register a plugin with its factory
    pub fn register(
        &mut self,
        descriptor: PluginDescriptor,
        factory: PluginFactory,
    ) -> PluginResult<()> {
        if self.plugins.contains_key(&descriptor.name) {
            return Err(PluginError::AlreadyRegistered(descriptor.name));
        }

        self.plugins.insert(
            descriptor.name.clone(),
            CatalogEntry {
                descriptor,
                factory,
            },
        );
        Ok(())
    }

    /// Register a plugin with a function factory
    pub fn register_fn<F>(&mut self, descriptor: PluginDescriptor, factory: F) -> PluginResult<()>
    where
        F: Fn(&PluginDescriptor) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(descriptor, Arc::new(factory))
    }

    /// Register a manifest-backed plugin
    pub fn register_manifest(&mut self, descriptor: PluginDescriptor) -> PluginResult<()> {
        self.register_fn(descriptor, |d| Box::new(ManifestPlugin::new(d.clone())))
    }

    /// Create a fresh instance of the named plugin
    pub fn instantiate(&self, name: &str) -> PluginResult<Box<dyn Plugin>> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Ok((entry.factory)(&entry.descriptor))
    }

    /// Get a plugin descriptor by name
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name).map(|e| &e.descriptor)
    }

    /// Check if a plugin is installed
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Installed plugin names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(|s| s.as_str())
    }

    /// Installed plugin descriptors, in registration order
    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values().map(|e| &e.descriptor)
    }

    /// Number of installed plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if nothing is installed
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
