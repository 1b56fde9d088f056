//! Plugin Descriptors
//!
//! Public view of a running plugin. Consumers detect a hot replace by
//! comparing `started_at` between two listings for the same name.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Plugins keyed by executable file name.
pub type PluginsByName = BTreeMap<String, PluginInfo>;

/// Name and launch time of a live plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Executable file name.
    pub name: String,
    /// When the current process for this name was launched.
    pub started_at: DateTime<Utc>,
}

impl PluginInfo {
    /// Create a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            started_at,
        }
    }
}

/// Launch time for a plugin that replaces one started at `previous`.
///
/// Guarantees a strictly later instant even when the clock has not moved
/// (or moved backwards) since the previous launch.
#[must_use]
pub fn next_start_time(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::milliseconds(1),
        _ => now,
    }
}
