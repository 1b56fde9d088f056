//! Oracle Configuration Settings
//!
//! Configuration types for the oracle service, loaded from environment
//! variables. A variable that is present but malformed is an error rather
//! than silently falling back to its default.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::engine::{DEFAULT_TICK_INTERVAL, EngineSettings};
use crate::domain::aggregation::DEFAULT_FRESHNESS_WINDOW;
use crate::domain::price::{SymbolError, parse_symbol_list, validate_symbols};

/// Symbols tracked when `ORACLE_SYMBOLS` is unset.
pub const DEFAULT_SYMBOLS: &str = "NTNUSD,NTNAUD,NTNCAD,NTNEUR,NTNGBP,NTNJPY,NTNSEK";

/// Plugin directory used when `ORACLE_PLUGIN_DIR` is unset.
pub const DEFAULT_PLUGIN_DIR: &str = "./plugins";

/// Plugin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSettings {
    /// Directory scanned for plugin executables.
    pub dir: PathBuf,
    /// Timeout applied to every plugin call.
    pub call_timeout: Duration,
    /// Period between directory scans.
    pub scan_interval: Duration,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            call_timeout: Duration::from_millis(5_000),
            scan_interval: Duration::from_secs(2),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP port for JSON-RPC, health and metrics.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 30311 }
    }
}

/// Complete oracle configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleConfig {
    /// Initially tracked symbols.
    pub symbols: Vec<String>,
    /// Engine timing.
    pub engine: EngineSettings,
    /// Plugin discovery and calls.
    pub plugins: PluginSettings,
    /// Server ports.
    pub server: ServerSettings,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            symbols: parse_symbol_list(DEFAULT_SYMBOLS),
            engine: EngineSettings::default(),
            plugins: PluginSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl OracleConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the resulting
    /// configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the resulting
    /// configuration is inconsistent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let symbols = parse_symbol_list(
            &env.get("ORACLE_SYMBOLS")
                .unwrap_or_else(|| DEFAULT_SYMBOLS.to_string()),
        );
        validate_symbols(&symbols)?;

        let engine = EngineSettings {
            tick_interval: env.duration_secs("ORACLE_TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL)?,
            freshness_window: env
                .duration_secs("ORACLE_FRESHNESS_WINDOW_SECS", DEFAULT_FRESHNESS_WINDOW)?,
        };

        let defaults = PluginSettings::default();
        let plugins = PluginSettings {
            dir: env
                .get("ORACLE_PLUGIN_DIR")
                .map_or(defaults.dir, PathBuf::from),
            call_timeout: env.duration_millis("ORACLE_PLUGIN_TIMEOUT_MS", defaults.call_timeout)?,
            scan_interval: env
                .duration_secs("ORACLE_PLUGIN_SCAN_INTERVAL_SECS", defaults.scan_interval)?,
        };

        let server = ServerSettings {
            http_port: env.parse("ORACLE_HTTP_PORT", ServerSettings::default().http_port)?,
        };

        let config = Self {
            symbols,
            engine,
            plugins,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::TimeoutNotBelowTick` if a plugin call could
    /// outlast a tick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.call_timeout >= self.engine.tick_interval {
            return Err(ConfigError::TimeoutNotBelowTick {
                timeout: self.plugins.call_timeout,
                tick: self.engine.tick_interval,
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is present but cannot be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Duration variable is zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroDuration(String),

    /// Symbol list is malformed.
    #[error("invalid ORACLE_SYMBOLS: {0}")]
    Symbols(#[from] SymbolError),

    /// Plugin call timeout is not smaller than the tick interval.
    #[error("plugin timeout {timeout:?} must be smaller than tick interval {tick:?}")]
    TimeoutNotBelowTick {
        /// Configured plugin timeout.
        timeout: Duration,
        /// Configured tick interval.
        tick: Duration,
    },
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            }),
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(key, default.as_secs())?;
        non_zero(key, Duration::from_secs(secs))
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = self.parse(key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
        non_zero(key, Duration::from_millis(millis))
    }
}

fn non_zero(key: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration(key.to_string()));
    }
    Ok(duration)
}
