//! Configuration Module
//!
//! Configuration loading for the oracle service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_PLUGIN_DIR, DEFAULT_SYMBOLS, OracleConfig, PluginSettings, ServerSettings,
};
