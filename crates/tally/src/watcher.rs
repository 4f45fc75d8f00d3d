//! Plugin Manifest Watcher
//!
//! Watches the plugins directory and drops the cached tracker plugin list
//! whenever a `plugin.json` changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::app::Application;
use crate::loader::MANIFEST_FILE;

/// Manifest change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestChange {
    /// A manifest was created or modified (plugin directory name)
    Changed(String),
    /// A manifest was removed
    Removed(String),
}

impl ManifestChange {
    /// Plugin directory the change belongs to
    pub fn plugin_dir(&self) -> &str {
        match self {
            ManifestChange::Changed(dir) | ManifestChange::Removed(dir) => dir,
        }
    }
}

/// Plugins directory watcher
pub struct PluginWatcher {
    plugins_dir: PathBuf,
    app: Arc<Application>,
    rx: mpsc::Receiver<ManifestChange>,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl PluginWatcher {
    /// Start watching `plugins_dir`
    pub fn new(plugins_dir: impl AsRef<Path>, app: Arc<Application>) -> Result<Self, notify::Error> {
        // Event paths are absolute
        let plugins_dir = plugins_dir
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| plugins_dir.as_ref().to_path_buf());
        let (tx, rx) = mpsc::channel(100);

        let watched_dir = plugins_dir.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if let Some(change) = event_to_change(&watched_dir, &event) {
                        let _ = tx.blocking_send(change);
                    }
                }
                Err(e) => {
                    error!("Plugin watcher error: {}", e);
                }
            }
        })?;

        watcher.watch(&plugins_dir, RecursiveMode::Recursive)?;
        info!("Watching plugins directory: {}", plugins_dir.display());

        Ok(Self {
            plugins_dir,
            app,
            rx,
            _watcher: watcher,
        })
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Run the watcher loop until the event channel closes
    pub async fn run(mut self) {
        info!("Starting plugin watcher loop");

        while let Some(change) = self.rx.recv().await {
            self.handle_change(&change);
        }

        info!("Plugin watcher loop ended");
    }

    fn handle_change(&self, change: &ManifestChange) {
        match change {
            ManifestChange::Changed(dir) => info!(plugin_dir = %dir, "Plugin manifest changed"),
            ManifestChange::Removed(dir) => info!(plugin_dir = %dir, "Plugin manifest removed"),
        }

        if self.app.controller().invalidate() {
            self.app.persist_cache();
        }
    }
}

/// Map a notify event to a manifest change
///
/// Only `<plugins_dir>/<plugin>/plugin.json` paths are of interest.
pub fn event_to_change(plugins_dir: &Path, event: &Event) -> Option<ManifestChange> {
    let removed = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => false,
        EventKind::Remove(_) => true,
        _ => {
            debug!("Ignoring event kind: {:?}", event.kind);
            return None;
        }
    };

    let path = event.paths.first()?;
    let rel_path = path.strip_prefix(plugins_dir).ok()?;

    let mut components = rel_path.components();
    let plugin_dir = components.next()?.as_os_str().to_string_lossy().into_owned();
    let file = components.next()?.as_os_str();
    if file != MANIFEST_FILE || components.next().is_some() {
        return None;
    }

    if removed {
        Some(ManifestChange::Removed(plugin_dir))
    } else {
        Some(ManifestChange::Changed(plugin_dir))
    }
}
