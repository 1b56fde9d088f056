//! Plugin Process
//!
//! A running plugin executable, driven over its stdin/stdout. Implements
//! [`Adapter`] so the engine treats it like any in-process source.
//!
//! The adapter name is the executable's file name, so copies of one binary
//! under different names run as separate plugins. The name the plugin
//! declares in its handshake is kept for logs only.
//!
//! Calls are serialized: one request is in flight per process at a time,
//! and each call is bounded by the configured timeout. A response that
//! arrives after its request timed out carries a stale id and is skipped by
//! the next call.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::PluginError;
use super::protocol::{
    Call, FetchResult, HandshakeResult, Request, decode_response, decode_result, encode_request,
};
use crate::application::ports::{Adapter, AdapterError, ProviderBinding, validate_adapter_name};
use crate::domain::price::now_millis;
use crate::domain::provider::PriceProvider;

/// Timeout applied to plugin calls unless configured otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Time a plugin gets to exit after the shutdown request before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

struct Channel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    closed: bool,
}

/// Handle to a running plugin process.
pub struct PluginProcess {
    name: String,
    declared_name: String,
    version: Option<String>,
    path: PathBuf,
    pid: Option<u32>,
    timeout: Duration,
    binding: ProviderBinding,
    channel: Mutex<Channel>,
    child: Mutex<Child>,
    exited: AtomicBool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for PluginProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProcess")
            .field("name", &self.name)
            .field("declared_name", &self.declared_name)
            .field("version", &self.version)
            .field("path", &self.path)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl PluginProcess {
    /// Launch the executable at `path` and perform the handshake.
    ///
    /// The process is killed if the handshake fails.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::InvalidName` if the file name cannot be used as
    /// an adapter name, `PluginError::Spawn` if the process cannot be
    /// started and `PluginError::Handshake` if it does not answer the
    /// handshake in time or answers it wrongly.
    pub async fn spawn(path: &Path, timeout: Duration) -> Result<Self, PluginError> {
        let name = plugin_name(path);
        if validate_adapter_name(&name).is_err() {
            return Err(PluginError::InvalidName {
                path: path.to_path_buf(),
                name,
            });
        }

        let spawn_error = |message: String| PluginError::Spawn {
            path: path.to_path_buf(),
            message,
        };

        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, path.display().to_string()));
        }

        let pid = child.id();
        let mut process = Self {
            name,
            declared_name: String::new(),
            version: None,
            path: path.to_path_buf(),
            pid,
            timeout,
            binding: ProviderBinding::new(),
            channel: Mutex::new(Channel {
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 0,
                closed: false,
            }),
            child: Mutex::new(child),
            exited: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        };

        let handshake = process
            .call(Call::Handshake)
            .await
            .and_then(decode_result::<HandshakeResult>);
        let HandshakeResult {
            name: declared_name,
            version,
        } = match handshake {
            Ok(handshake) => handshake,
            Err(source) => {
                process.kill().await;
                return Err(PluginError::Handshake {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        tracing::debug!(
            plugin = %process.name,
            declared_name = %declared_name,
            path = %path.display(),
            pid = ?pid,
            "Plugin handshake complete"
        );
        process.declared_name = declared_name;
        process.version = version;
        Ok(process)
    }

    /// Name the plugin declared in its handshake.
    #[must_use]
    pub fn declared_name(&self) -> &str {
        &self.declared_name
    }

    /// Declared version, if any.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// OS process id, if known.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is known to be gone.
    ///
    /// Does not wait: if another task holds the process handle the answer
    /// is based on what the last call observed.
    pub fn has_exited(&self) -> bool {
        if self.exited.load(Ordering::Acquire) {
            return true;
        }
        self.child
            .try_lock()
            .is_ok_and(|mut child| matches!(child.try_wait(), Ok(Some(_))))
    }

    async fn call(&self, call: Call<'_>) -> Result<Value, AdapterError> {
        let mut guard = self.channel.lock().await;
        if guard.closed {
            return Err(AdapterError::Exited);
        }

        guard.next_id += 1;
        let id = guard.next_id;
        let method = call.method();
        let line = encode_request(&Request { id, call })?;

        let channel = &mut *guard;
        let mut sent = false;
        let exchange = async {
            channel
                .stdin
                .write_all(&line)
                .await
                .map_err(|e| AdapterError::Io(e.to_string()))?;
            channel
                .stdin
                .flush()
                .await
                .map_err(|e| AdapterError::Io(e.to_string()))?;
            sent = true;

            loop {
                let Some(line) = channel
                    .stdout
                    .next_line()
                    .await
                    .map_err(|e| AdapterError::Io(e.to_string()))?
                else {
                    return Err(AdapterError::Exited);
                };
                if line.trim().is_empty() {
                    continue;
                }

                let response = decode_response(&line)?;
                if response.answers(id) {
                    return response.into_result();
                }
                tracing::debug!(
                    plugin = %self.name,
                    expected = id,
                    received = ?response.id,
                    "Discarding stale plugin response"
                );
            }
        };

        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(self.timeout)),
        };

        // A request cut off mid-line would corrupt every later request.
        let torn = !sent && matches!(result, Err(AdapterError::Timeout(_)));
        if torn || matches!(result, Err(AdapterError::Exited | AdapterError::Io(_))) {
            guard.closed = true;
            self.exited.store(true, Ordering::Release);
        }
        if let Err(e) = &result {
            tracing::debug!(plugin = %self.name, method, error = %e, "Plugin call failed");
        }
        result
    }

    async fn kill(&self) {
        self.channel.lock().await.closed = true;
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!(plugin = %self.name, error = %e, "Failed to kill plugin");
        }
        self.exited.store(true, Ordering::Release);
    }
}

/// Adapter name for the executable at `path`: its file name.
fn plugin_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Adapter for PluginProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, provider: Arc<PriceProvider>) {
        self.binding.bind(provider);
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<(), AdapterError> {
        let provider = self.binding.current(&self.name)?;

        let value = self.call(Call::FetchPrices { symbols }).await?;
        let result: FetchResult = decode_result(value)?;

        let received_at = now_millis();
        provider.add_prices(result.prices.into_iter().map(|p| p.into_price(received_at)));
        Ok(())
    }

    /// Ask the plugin to exit, then kill it if it has not exited within
    /// [`SHUTDOWN_GRACE`]. Waits for an in-flight call to finish first.
    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut channel = self.channel.lock().await;
            if !channel.closed {
                channel.next_id += 1;
                let request = Request {
                    id: channel.next_id,
                    call: Call::Shutdown,
                };
                if let Ok(line) = encode_request(&request) {
                    let send = async {
                        channel.stdin.write_all(&line).await?;
                        channel.stdin.flush().await
                    };
                    if let Ok(Err(e)) = tokio::time::timeout(SHUTDOWN_GRACE, send).await {
                        tracing::debug!(plugin = %self.name, error = %e, "Failed to send shutdown");
                    }
                }
                channel.closed = true;
            }
        }

        let mut child = self.child.lock().await;
        if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
            tracing::warn!(plugin = %self.name, "Plugin ignored shutdown request, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(plugin = %self.name, error = %e, "Failed to kill plugin");
            }
        }
        self.exited.store(true, Ordering::Release);
        tracing::info!(plugin = %self.name, "Plugin stopped");
    }
}

async fn forward_stderr(stderr: ChildStderr, plugin: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(plugin = %plugin, "{line}");
    }
}
