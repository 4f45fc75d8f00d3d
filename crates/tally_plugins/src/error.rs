//! Error types for plugin loading and activation.

/// Result type alias
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Errors that can occur while loading or activating plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),
}
