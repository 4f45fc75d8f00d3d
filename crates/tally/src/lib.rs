//! Tally - Tracker plugin activation
//!
//! This crate wires the activation core into a runnable application:
//! - Configuration via figment (TOML file + `TALLY_` environment)
//! - Plugin manifest discovery from a plugins directory
//! - Application bootstrap (catalog, registry, cache, controller)
//! - A manifest watcher that invalidates the cached tracker plugin list

// Re-export core crates
pub use tally_cache;
pub use tally_plugins;

pub mod app;
pub mod config;
pub mod error;
pub mod loader;
pub mod watcher;

pub use app::Application;
pub use config::TallyConfig;
pub use error::{Error, Result};
