//! Plugin Manager
//!
//! Keeps the set of running plugins in line with the plugin directory:
//!
//! - a new executable is launched and registered (hot add)
//! - a changed executable is relaunched and swapped in under its file name
//!   once the new process has completed its handshake (hot replace)
//! - a deleted executable is deregistered and stopped
//! - a plugin whose process died is deregistered
//!
//! Plugins are named after their executable's file name. A file that failed
//! to launch, or whose process died, is left alone until its fingerprint
//! changes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{PluginError, PluginProcess};
use crate::application::engine::OracleEngine;
use crate::application::ports::Adapter;
use crate::domain::plugin::PluginsByName;
use crate::infrastructure::config::PluginSettings;
use crate::infrastructure::metrics::{self, PluginEvent};

/// Identity of an executable's content, as far as the filesystem tells.
///
/// The inode catches a file renamed into place with the same size and
/// modification time as the one it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Size in bytes.
    pub len: u64,
    /// Inode number, where the platform has one.
    pub inode: Option<u64>,
}

impl Fingerprint {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            inode: inode(metadata),
        }
    }
}

#[cfg(unix)]
fn inode(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
const fn inode(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// What one scan changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Names of newly launched plugins.
    pub launched: Vec<String>,
    /// Names of plugins swapped for a new process.
    pub replaced: Vec<String>,
    /// Names of plugins removed (file gone or process dead).
    pub removed: Vec<String>,
    /// Files that failed to launch.
    pub failed: Vec<PathBuf>,
}

impl ScanReport {
    /// Whether the scan changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.launched.is_empty()
            && self.replaced.is_empty()
            && self.removed.is_empty()
            && self.failed.is_empty()
    }
}

struct ManagedPlugin {
    fingerprint: Fingerprint,
    process: Arc<PluginProcess>,
}

impl ManagedPlugin {
    fn adapter(&self) -> Arc<dyn Adapter> {
        Arc::clone(&self.process) as Arc<dyn Adapter>
    }
}

#[derive(Default)]
struct ManagerState {
    running: HashMap<PathBuf, ManagedPlugin>,
    failed: HashMap<PathBuf, Fingerprint>,
}

/// Plugin directory manager.
pub struct PluginManager {
    settings: PluginSettings,
    engine: Arc<OracleEngine>,
    state: Mutex<ManagerState>,
}

impl PluginManager {
    /// Create a manager feeding `engine` from `settings.dir`.
    #[must_use]
    pub fn new(settings: PluginSettings, engine: Arc<OracleEngine>) -> Self {
        Self {
            settings,
            engine,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Plugin directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.settings.dir
    }

    /// Live plugins keyed by file name.
    #[must_use]
    pub fn list(&self) -> PluginsByName {
        self.engine.list_plugins()
    }

    /// Scan the directory periodically until cancelled, then stop every
    /// plugin.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            dir = %self.settings.dir.display(),
            scan_interval_ms = self.settings.scan_interval.as_millis(),
            "Plugin manager started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.scan().await {
                        tracing::warn!(error = %e, "Plugin scan failed");
                    }
                }
            }
        }

        self.shutdown_all().await;
        tracing::info!("Plugin manager stopped");
    }

    /// Reconcile the running set with the directory once.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Discovery` if the directory cannot be listed.
    /// Failures of individual plugins are logged and reported in the
    /// returned [`ScanReport`].
    pub async fn scan(&self) -> Result<ScanReport, PluginError> {
        let found = discover(&self.settings.dir).await?;
        let mut state = self.state.lock().await;
        let mut report = ScanReport::default();

        self.reap_exited(&mut state, &mut report).await;
        self.remove_missing(&found, &mut state, &mut report).await;

        for (path, fingerprint) in found {
            if state.failed.get(&path) == Some(&fingerprint) {
                continue;
            }
            if state
                .running
                .get(&path)
                .is_some_and(|p| p.fingerprint == fingerprint)
            {
                continue;
            }

            match self.launch(&path, fingerprint, &mut state).await {
                Ok(Launch::New(name)) => report.launched.push(name),
                Ok(Launch::Replaced(name)) => report.replaced.push(name),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Plugin launch failed");
                    metrics::record_plugin_event(PluginEvent::Failed);
                    state.failed.insert(path.clone(), fingerprint);
                    report.failed.push(path);
                }
            }
        }

        Ok(report)
    }

    /// Stop every plugin and drop it from the engine.
    pub async fn shutdown_all(&self) {
        let mut state = self.state.lock().await;
        let plugins: Vec<_> = state.running.drain().collect();
        state.failed.clear();
        drop(state);

        for (_, plugin) in plugins {
            self.engine.uninstall_plugin(&plugin.adapter());
            plugin.process.shutdown().await;
        }
    }

    async fn reap_exited(&self, state: &mut ManagerState, report: &mut ScanReport) {
        let exited: Vec<PathBuf> = state
            .running
            .iter()
            .filter(|(_, plugin)| plugin.process.has_exited())
            .map(|(path, _)| path.clone())
            .collect();

        for path in exited {
            let Some(plugin) = state.running.remove(&path) else {
                continue;
            };
            let name = plugin.process.name().to_string();
            tracing::warn!(plugin = %name, path = %path.display(), "Plugin process exited, removing");

            self.engine.uninstall_plugin(&plugin.adapter());
            plugin.process.shutdown().await;
            metrics::record_plugin_event(PluginEvent::Removed);

            state.failed.insert(path, plugin.fingerprint);
            report.removed.push(name);
        }
    }

    async fn remove_missing(
        &self,
        found: &BTreeMap<PathBuf, Fingerprint>,
        state: &mut ManagerState,
        report: &mut ScanReport,
    ) {
        state.failed.retain(|path, _| found.contains_key(path));

        let missing: Vec<PathBuf> = state
            .running
            .keys()
            .filter(|path| !found.contains_key(*path))
            .cloned()
            .collect();

        for path in missing {
            let Some(plugin) = state.running.remove(&path) else {
                continue;
            };
            let name = plugin.process.name().to_string();
            tracing::info!(plugin = %name, path = %path.display(), "Plugin file removed");

            self.engine.uninstall_plugin(&plugin.adapter());
            plugin.process.shutdown().await;
            metrics::record_plugin_event(PluginEvent::Removed);
            report.removed.push(name);
        }
    }

    async fn launch(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        state: &mut ManagerState,
    ) -> Result<Launch, PluginError> {
        let process = Arc::new(PluginProcess::spawn(path, self.settings.call_timeout).await?);
        let name = process.name().to_string();

        if let Err(e) = self.check_name_free(path, &name, state) {
            process.shutdown().await;
            return Err(e);
        }

        let adapter: Arc<dyn Adapter> = Arc::clone(&process) as Arc<dyn Adapter>;
        let (replaced, info) = match self.engine.install_plugin(adapter, Utc::now()) {
            Ok(installed) => installed,
            Err(e) => {
                process.shutdown().await;
                return Err(e.into());
            }
        };

        let previous = state.running.insert(
            path.to_path_buf(),
            ManagedPlugin {
                fingerprint,
                process: Arc::clone(&process),
            },
        );
        state.failed.remove(path);

        // Both name the old process for this path when it was still installed.
        let was_running = previous.is_some();
        match (replaced, previous) {
            (Some(replaced), _) => replaced.shutdown().await,
            (None, Some(previous)) => previous.process.shutdown().await,
            (None, None) => {}
        }

        tracing::info!(
            plugin = %name,
            declared_name = %process.declared_name(),
            version = process.version().unwrap_or("-"),
            path = %path.display(),
            pid = ?process.pid(),
            started_at = %info.started_at,
            "Plugin running"
        );

        if was_running {
            metrics::record_plugin_event(PluginEvent::Replaced);
            Ok(Launch::Replaced(name))
        } else {
            metrics::record_plugin_event(PluginEvent::Launched);
            Ok(Launch::New(name))
        }
    }

    /// File names are unique within the directory, so a provider under
    /// `name` that this path does not own belongs to an in-process adapter.
    fn check_name_free(
        &self,
        path: &Path,
        name: &str,
        state: &ManagerState,
    ) -> Result<(), PluginError> {
        if !state.running.contains_key(path) && self.engine.provider(name).is_some() {
            return Err(PluginError::NameCollision {
                path: path.to_path_buf(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

enum Launch {
    New(String),
    Replaced(String),
}

/// List executable regular files in `dir`, skipping hidden entries.
///
/// A missing directory yields an empty set.
async fn discover(dir: &Path) -> Result<BTreeMap<PathBuf, Fingerprint>, PluginError> {
    let discovery_error = |e: std::io::Error| PluginError::Discovery {
        dir: dir.to_path_buf(),
        message: e.to_string(),
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "Plugin directory does not exist");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(discovery_error(e)),
    };

    let mut found = BTreeMap::new();
    while let Some(entry) = entries.next_entry().await.map_err(discovery_error)? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        // Follows symlinks; an entry removed mid-scan is simply skipped.
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if metadata.is_file() && is_executable(&metadata) {
            found.insert(path, Fingerprint::of(&metadata));
        }
    }
    Ok(found)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}
