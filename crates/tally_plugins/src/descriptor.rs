//! Plugin Descriptor
//!
//! Static metadata about an installed plugin, as declared in its
//! `plugin.json` manifest.

use serde::{Deserialize, Serialize};

/// Where a tracked dimension is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionScope {
    /// Recorded once per visit
    Visit,
    /// Recorded for every tracked action
    Action,
    /// Recorded when a goal converts
    Conversion,
}

impl std::fmt::Display for DimensionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DimensionScope::Visit => write!(f, "visit"),
            DimensionScope::Action => write!(f, "action"),
            DimensionScope::Conversion => write!(f, "conversion"),
        }
    }
}

/// A dimension a plugin contributes to tracked data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionEntry {
    /// Column name
    pub name: String,
    /// Where the dimension is recorded
    pub scope: DimensionScope,
}

/// Plugin manifest (plugins/*/plugin.json)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Explicitly marks the plugin as taking part in tracking requests
    #[serde(default)]
    pub tracker: bool,
    /// Events the plugin listens to (e.g. "Tracker.newVisitorInformation")
    #[serde(default)]
    pub hooks: Vec<String>,
    /// Dimensions contributed to tracked data
    #[serde(default)]
    pub dimensions: Vec<DimensionEntry>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PluginDescriptor {
    /// Create a descriptor with no tracking metadata
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            tracker: false,
            hooks: Vec::new(),
            dimensions: Vec::new(),
        }
    }

    /// Mark the plugin as a tracker plugin
    pub fn tracker(mut self) -> Self {
        self.tracker = true;
        self
    }

    /// Add an event hook
    pub fn hook(mut self, event: impl Into<String>) -> Self {
        self.hooks.push(event.into());
        self
    }

    /// Add a dimension
    pub fn dimension(mut self, name: impl Into<String>, scope: DimensionScope) -> Self {
        self.dimensions.push(DimensionEntry {
            name: name.into(),
            scope,
        });
        self
    }

    /// Dimensions recorded in the given scope
    pub fn dimensions_in(&self, scope: DimensionScope) -> impl Iterator<Item = &DimensionEntry> {
        self.dimensions.iter().filter(move |d| d.scope == scope)
    }
}
