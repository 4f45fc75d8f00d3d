//! Tracker-Relevance Filter
//!
//! Decides from static metadata alone whether a plugin takes part in tracking
//! requests. Filters are pure: results are cached by the controller, never
//! here.

use wildmatch::WildMatch;

use crate::descriptor::PluginDescriptor;

/// Hook patterns that mark a plugin as tracker-relevant by default
pub const DEFAULT_TRACKER_HOOK_PATTERNS: &[&str] = &["Tracker.*", "Request.initAuthenticationObject"];

/// Predicate over plugin descriptors
pub trait RelevanceFilter: Send + Sync {
    fn is_relevant(&self, descriptor: &PluginDescriptor) -> bool;
}

impl<F> RelevanceFilter for F
where
    F: Fn(&PluginDescriptor) -> bool + Send + Sync,
{
    fn is_relevant(&self, descriptor: &PluginDescriptor) -> bool {
        self(descriptor)
    }
}

/// Default tracker filter
///
/// A plugin is a tracker plugin when it declares `tracker`, contributes any
/// dimension, or listens to an event matching one of the hook patterns.
#[derive(Debug)]
pub struct TrackerFilter {
    hook_patterns: Vec<WildMatch>,
}

impl Default for TrackerFilter {
    fn default() -> Self {
        Self::with_hook_patterns(DEFAULT_TRACKER_HOOK_PATTERNS.iter().copied())
    }
}

impl TrackerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter matching hooks against custom patterns
    ///
    /// Patterns use `*` and `?` wildcards.
    pub fn with_hook_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hook_patterns: patterns
                .into_iter()
                .map(|p| WildMatch::new(p.as_ref()))
                .collect(),
        }
    }

    fn listens_to_tracker_hook(&self, descriptor: &PluginDescriptor) -> bool {
        descriptor
            .hooks
            .iter()
            .any(|hook| self.hook_patterns.iter().any(|p| p.matches(hook)))
    }
}

impl RelevanceFilter for TrackerFilter {
    fn is_relevant(&self, descriptor: &PluginDescriptor) -> bool {
        descriptor.tracker
            || !descriptor.dimensions.is_empty()
            || self.listens_to_tracker_hook(descriptor)
    }
}
