//! Subprocess Plugins
//!
//! Price sources shipped as standalone executables. Every executable in the
//! plugin directory runs as a child process and talks to the oracle over a
//! line-delimited JSON protocol on stdin/stdout.
//!
//! - [`protocol`]: request and response types
//! - [`PluginProcess`]: one running plugin, usable as an `Adapter`
//! - [`PluginManager`]: keeps the running set in line with the directory

use std::path::PathBuf;

use crate::application::engine::EngineError;
use crate::application::ports::AdapterError;

pub mod manager;
pub mod process;
pub mod protocol;

pub use manager::{Fingerprint, PluginManager, ScanReport};
pub use process::{DEFAULT_CALL_TIMEOUT, PluginProcess, SHUTDOWN_GRACE};

/// Plugin lifecycle error.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The executable could not be started.
    #[error("failed to launch plugin {}: {message}", .path.display())]
    Spawn {
        /// Executable path.
        path: PathBuf,
        /// OS error.
        message: String,
    },

    /// The plugin did not complete the handshake.
    #[error("plugin {} failed handshake: {source}", .path.display())]
    Handshake {
        /// Executable path.
        path: PathBuf,
        /// Underlying call failure.
        source: AdapterError,
    },

    /// The executable's file name cannot be used as an adapter name.
    #[error("plugin {} has unusable name {name:?}", .path.display())]
    InvalidName {
        /// Executable path.
        path: PathBuf,
        /// File name.
        name: String,
    },

    /// An in-process adapter already uses the plugin's name.
    #[error("plugin {} name {name:?} already used by an in-process adapter", .path.display())]
    NameCollision {
        /// Executable path.
        path: PathBuf,
        /// File name.
        name: String,
    },

    /// The plugin directory could not be listed.
    #[error("failed to scan plugin directory {}: {message}", .dir.display())]
    Discovery {
        /// Plugin directory.
        dir: PathBuf,
        /// OS error.
        message: String,
    },

    /// The engine refused the plugin.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
