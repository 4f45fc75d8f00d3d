use tally_cache::CacheError;
use tally_plugins::PluginError;

use crate::loader::LoadError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}
