//! Plugin Loader - Discovers installed plugins from a directory
//!
//! ```text
//! plugins/
//! ├── CoreHome/
//! │   └── plugin.json  <- Found
//! ├── Login/
//! │   └── plugin.json  <- Found
//! └── README.md        <- Ignored
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tally_plugins::PluginDescriptor;
use tracing::{debug, warn};

/// Manifest file name inside each plugin directory
pub const MANIFEST_FILE: &str = "plugin.json";

/// Error type for plugin discovery
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid plugin manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Scan `plugins_dir` for plugin manifests
///
/// Looks for `plugin.json` in immediate subdirectories. Invalid manifests are
/// logged and skipped. Results are sorted by plugin name so registry order is
/// stable across filesystems. A missing directory yields no plugins.
pub fn discover_plugins(plugins_dir: &Path) -> Result<Vec<PluginDescriptor>, LoadError> {
    let mut discovered = Vec::new();

    if !plugins_dir.exists() {
        debug!("Plugins directory does not exist: {}", plugins_dir.display());
        return Ok(discovered);
    }

    let entries = fs::read_dir(plugins_dir).map_err(|source| LoadError::Read {
        path: plugins_dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let path = entry
            .map_err(|source| LoadError::Read {
                path: plugins_dir.to_path_buf(),
                source,
            })?
            .path();

        if !path.is_dir() {
            continue;
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            continue;
        }

        match load_manifest(&manifest_path) {
            Ok(descriptor) => {
                debug!("Discovered plugin: {} at {}", descriptor.name, path.display());
                discovered.push(descriptor);
            }
            Err(e) => {
                warn!("Skipping plugin at {}: {}", path.display(), e);
            }
        }
    }

    discovered.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(discovered)
}

/// Load a single plugin manifest
pub fn load_manifest(path: &Path) -> Result<PluginDescriptor, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| LoadError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}
