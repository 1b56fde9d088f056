//! Prometheus Metrics Module
//!
//! Exposes oracle metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: tick count, duration, skipped ticks, published and stale symbols
//! - **Adapters**: active adapters, fetch outcomes and latency
//! - **Plugins**: lifecycle events (launch, replace, removal, failure)
//! - **RPC**: requests by method and outcome
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ticks
    describe_counter!("oracle_ticks_total", "Total completed ticks");
    describe_counter!(
        "oracle_ticks_skipped_total",
        "Ticks skipped because the previous tick was still running"
    );
    describe_histogram!("oracle_tick_duration_seconds", "Duration of one tick");
    describe_gauge!(
        "oracle_published_symbols",
        "Symbols published by the last tick"
    );
    describe_gauge!(
        "oracle_stale_symbols",
        "Tracked symbols without fresh observations in the last tick"
    );

    // Adapters
    describe_gauge!("oracle_active_adapters", "Number of registered adapters");
    describe_counter!(
        "oracle_adapter_fetch_total",
        "Adapter fetches by adapter and outcome"
    );
    describe_histogram!(
        "oracle_adapter_fetch_seconds",
        "Adapter fetch latency by adapter"
    );

    // Plugins
    describe_counter!("oracle_plugin_events_total", "Plugin lifecycle events");

    // RPC
    describe_counter!(
        "oracle_rpc_requests_total",
        "JSON-RPC requests by method and outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Plugin lifecycle event label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginEvent {
    /// New plugin launched and registered.
    Launched,
    /// Running plugin replaced by a new binary.
    Replaced,
    /// Plugin removed (file deleted or process gone).
    Removed,
    /// Plugin failed to launch or handshake.
    Failed,
}

impl PluginEvent {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Launched => "launched",
            Self::Replaced => "replaced",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }
}

/// Record a completed tick.
#[allow(clippy::cast_precision_loss)]
pub fn record_tick(duration: Duration, published: usize, stale: usize) {
    counter!("oracle_ticks_total").increment(1);
    histogram!("oracle_tick_duration_seconds").record(duration.as_secs_f64());
    gauge!("oracle_published_symbols").set(published as f64);
    gauge!("oracle_stale_symbols").set(stale as f64);
}

/// Record a tick skipped by the single-flight guard.
pub fn record_tick_skipped() {
    counter!("oracle_ticks_skipped_total").increment(1);
}

/// Update the active adapter count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_adapters(count: usize) {
    gauge!("oracle_active_adapters").set(count as f64);
}

/// Record one adapter fetch.
pub fn record_adapter_fetch(adapter: &str, duration: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "oracle_adapter_fetch_total",
        "adapter" => adapter.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "oracle_adapter_fetch_seconds",
        "adapter" => adapter.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a plugin lifecycle event.
pub fn record_plugin_event(event: PluginEvent) {
    counter!(
        "oracle_plugin_events_total",
        "event" => event.as_str()
    )
    .increment(1);
}

/// Record a JSON-RPC request.
pub fn record_rpc_request(method: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "oracle_rpc_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_event_as_str() {
        assert_eq!(PluginEvent::Launched.as_str(), "launched");
        assert_eq!(PluginEvent::Replaced.as_str(), "replaced");
        assert_eq!(PluginEvent::Removed.as_str(), "removed");
        assert_eq!(PluginEvent::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick(Duration::from_millis(5), 3, 1);
        record_tick_skipped();
        set_active_adapters(2);
        record_adapter_fetch("mock", Duration::from_millis(1), true);
        record_plugin_event(PluginEvent::Launched);
        record_rpc_request("get_prices", false);
    }
}
