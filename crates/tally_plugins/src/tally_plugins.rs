//! Tally Plugins - Plugin registry and tracker-scoped activation
//!
//! A tracking request only needs a small slice of the installed plugins. This
//! crate decides which slice, remembers the decision in a cache, and reshapes
//! the loaded set to match it.
//!
//! ```text
//!   PluginCatalog ──(factories)──▶ PluginRegistry ◀── ActivationController
//!   (installed)                    (loaded, ordered)      │        │
//!                                                         ▼        ▼
//!                                              RelevanceFilter  CacheService
//! ```

mod catalog;
mod controller;
mod descriptor;
mod error;
mod filter;
mod registry;

pub use catalog::{ManifestPlugin, Plugin, PluginCatalog, PluginFactory};
pub use controller::{
    ActivationController, ActivationState, DEFAULT_TRACKER_CACHE_KEY, TrackerSettings,
};
pub use descriptor::{DimensionEntry, DimensionScope, PluginDescriptor};
pub use error::{PluginError, PluginResult};
pub use filter::{DEFAULT_TRACKER_HOOK_PATTERNS, RelevanceFilter, TrackerFilter};
pub use registry::PluginRegistry;
