//! Oracle Engine
//!
//! Owns the tracked symbol set, the aggregated price table, the provider
//! registry and the active adapters, and runs the periodic tick that ties
//! them together.
//!
//! # Tick
//!
//! 1. Snapshot the symbol set and the adapter slots.
//! 2. Fetch from every adapter concurrently, one task per adapter.
//! 3. Capture `now` once.
//! 4. Per symbol, keep the observations that are fresh at `now`.
//! 5. None: keep the previously published entry. One: publish it as-is.
//!    Several: publish the aggregate.
//!
//! Ticks are single-flight. Adapter swaps made while a tick runs are seen
//! by the next tick, because the tick works on its own snapshot.
//!
//! # Lifecycle
//!
//! `Stopped -> Running -> Stopped`. [`OracleEngine::start`] spawns the tick
//! loop, [`OracleEngine::stop`] cancels it (waiting for at most one
//! in-flight tick) and shuts every adapter down.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Adapter, validate_adapter_name};
use crate::domain::aggregation::{
    Aggregator, DEFAULT_FRESHNESS_WINDOW, FreshnessPolicy, MeanAggregator,
};
use crate::domain::plugin::{PluginInfo, PluginsByName, next_start_time};
use crate::domain::price::{Price, PriceBySymbol, SymbolError, now_millis, validate_symbols};
use crate::domain::provider::{PriceProvider, ProviderRegistry};
use crate::infrastructure::metrics;

/// Engine version reported to consumers.
pub const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Default tick period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// Settings, State, Errors
// =============================================================================

/// Engine timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Tick period.
    pub tick_interval: Duration,
    /// Maximum observation age accepted during aggregation.
    pub freshness_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Tick loop not running.
    Stopped,
    /// Tick loop running.
    Running,
}

impl EngineState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

/// Engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `start` called on a running engine.
    #[error("oracle engine is already running")]
    AlreadyRunning,

    /// `stop` called on a stopped engine.
    #[error("oracle engine is not running")]
    NotRunning,

    /// Rejected symbol set.
    #[error("invalid symbols: {0}")]
    InvalidSymbols(#[from] SymbolError),

    /// Rejected adapter name.
    #[error("invalid adapter name {0:?}")]
    InvalidAdapterName(String),
}

/// Outcome of one tick, kept for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Wall-clock start of the tick.
    pub started_at: DateTime<Utc>,
    /// Instant used for the freshness test, in milliseconds.
    pub evaluated_at: i64,
    /// Tick duration in milliseconds.
    pub duration_ms: u64,
    /// Adapters asked to fetch.
    pub adapters: usize,
    /// Adapters whose fetch failed.
    pub failed_adapters: Vec<String>,
    /// Symbols published by this tick.
    pub published: usize,
    /// Symbols without any fresh observation.
    pub stale_symbols: Vec<String>,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Clone)]
struct AdapterSlot {
    adapter: Arc<dyn Adapter>,
    provider: Arc<PriceProvider>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// The oracle engine.
///
/// Construct once, share behind an `Arc` with the plugin manager and the
/// transport.
pub struct OracleEngine {
    settings: EngineSettings,
    freshness: FreshnessPolicy,
    aggregator: Arc<dyn Aggregator>,
    symbols: RwLock<Vec<String>>,
    prices: RwLock<PriceBySymbol>,
    registry: ProviderRegistry,
    adapters: RwLock<BTreeMap<String, AdapterSlot>>,
    plugins: RwLock<PluginsByName>,
    ticking: AtomicBool,
    last_tick: RwLock<Option<TickReport>>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for OracleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleEngine")
            .field("settings", &self.settings)
            .field("aggregator", &self.aggregator.name())
            .field("symbols", &*self.symbols.read())
            .field("adapters", &self.adapter_names())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl OracleEngine {
    /// Create a stopped engine tracking `symbols`, aggregating with the mean.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidSymbols` if the symbol set is malformed.
    pub fn new(symbols: Vec<String>, settings: EngineSettings) -> Result<Self, EngineError> {
        validate_symbols(&symbols)?;
        Ok(Self {
            settings,
            freshness: FreshnessPolicy::new(settings.freshness_window),
            aggregator: Arc::new(MeanAggregator),
            symbols: RwLock::new(symbols),
            prices: RwLock::new(HashMap::new()),
            registry: ProviderRegistry::new(),
            adapters: RwLock::new(BTreeMap::new()),
            plugins: RwLock::new(BTreeMap::new()),
            ticking: AtomicBool::new(false),
            last_tick: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Replace the aggregation policy.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Engine version.
    #[must_use]
    pub const fn version(&self) -> &'static str {
        VERSION
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Tracked symbols, in order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().clone()
    }

    /// Replace the tracked symbol set; effective from the next tick.
    ///
    /// Published entries for symbols no longer tracked are kept.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidSymbols` and leaves the current set in
    /// place if `symbols` is malformed.
    pub fn update_symbols(&self, symbols: Vec<String>) -> Result<Vec<String>, EngineError> {
        validate_symbols(&symbols)?;
        *self.symbols.write() = symbols.clone();
        tracing::info!(count = symbols.len(), symbols = ?symbols, "Symbol set updated");
        Ok(symbols)
    }

    /// Latest published price for `symbol`.
    #[must_use]
    pub fn get_price(&self, symbol: &str) -> Option<Price> {
        self.prices.read().get(symbol).cloned()
    }

    /// Snapshot of the published price table.
    #[must_use]
    pub fn get_prices(&self) -> PriceBySymbol {
        self.prices.read().clone()
    }

    /// Live plugins keyed by executable file name.
    #[must_use]
    pub fn list_plugins(&self) -> PluginsByName {
        self.plugins.read().clone()
    }

    /// Names of the active adapters, sorted.
    #[must_use]
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.read().keys().cloned().collect()
    }

    /// Names of the registered providers, sorted.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Provider registered for `name`.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<PriceProvider>> {
        self.registry.get_provider(name)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.lifecycle.lock().cancel.is_some() {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    /// Report of the last completed tick.
    #[must_use]
    pub fn last_tick(&self) -> Option<TickReport> {
        self.last_tick.read().clone()
    }

    /// Tracked symbols whose published price is missing or older than the
    /// freshness window at `now`.
    #[must_use]
    pub fn stale_symbols(&self, now: i64) -> Vec<String> {
        let symbols = self.symbols();
        let prices = self.prices.read();
        symbols
            .into_iter()
            .filter(|s| {
                prices
                    .get(s)
                    .is_none_or(|p| !self.freshness.is_fresh(p.timestamp, now))
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Adapter Set
    // -------------------------------------------------------------------------

    /// Register `adapter` under its name, bound to a fresh provider.
    ///
    /// An adapter already registered under that name is swapped out in the
    /// same critical section and returned; the caller shuts it down.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidAdapterName` if the name cannot be used
    /// as a registry key.
    pub fn register_adapter(
        &self,
        adapter: Arc<dyn Adapter>,
    ) -> Result<Option<Arc<dyn Adapter>>, EngineError> {
        let mut adapters = self.adapters.write();
        let replaced = self.swap_in(&mut adapters, adapter)?;
        metrics::set_active_adapters(adapters.len());
        Ok(replaced.map(|slot| slot.adapter))
    }

    /// Register a plugin adapter and publish its descriptor.
    ///
    /// Adapter, provider and descriptor change together, so a listing never
    /// shows the name missing during a replacement. The recorded start time
    /// is strictly later than that of a replaced plugin of the same name.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidAdapterName` if the plugin name cannot
    /// be used as a registry key.
    pub fn install_plugin(
        &self,
        adapter: Arc<dyn Adapter>,
        started_at: DateTime<Utc>,
    ) -> Result<(Option<Arc<dyn Adapter>>, PluginInfo), EngineError> {
        let name = adapter.name().to_string();
        let mut adapters = self.adapters.write();
        let replaced = self.swap_in(&mut adapters, adapter)?;

        let mut plugins = self.plugins.write();
        let previous = plugins.get(&name).map(|p| p.started_at);
        let info = PluginInfo::new(name.clone(), next_start_time(started_at, previous));
        plugins.insert(name, info.clone());

        metrics::set_active_adapters(adapters.len());
        Ok((replaced.map(|slot| slot.adapter), info))
    }

    /// Remove the adapter, its provider and any plugin descriptor for `name`.
    pub fn remove_adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        let mut adapters = self.adapters.write();
        let removed = adapters.remove(name);
        self.registry.remove_provider(name);
        self.plugins.write().remove(name);
        metrics::set_active_adapters(adapters.len());

        if removed.is_some() {
            tracing::info!(adapter = %name, "Adapter removed");
        }
        removed.map(|slot| slot.adapter)
    }

    /// Remove a plugin only if `adapter` is still the one registered under
    /// its name.
    ///
    /// A plugin that exits after being replaced must not take its
    /// successor down with it.
    pub fn uninstall_plugin(&self, adapter: &Arc<dyn Adapter>) -> bool {
        let name = adapter.name();
        let mut adapters = self.adapters.write();
        let current = adapters
            .get(name)
            .is_some_and(|slot| Arc::ptr_eq(&slot.adapter, adapter));
        if !current {
            return false;
        }

        adapters.remove(name);
        self.registry.remove_provider(name);
        self.plugins.write().remove(name);
        metrics::set_active_adapters(adapters.len());
        tracing::info!(plugin = %name, "Plugin uninstalled");
        true
    }

    fn swap_in(
        &self,
        adapters: &mut BTreeMap<String, AdapterSlot>,
        adapter: Arc<dyn Adapter>,
    ) -> Result<Option<AdapterSlot>, EngineError> {
        let name = adapter.name().to_string();
        validate_adapter_name(&name).map_err(EngineError::InvalidAdapterName)?;

        let provider = self.registry.add_provider(&name);
        adapter.initialize(Arc::clone(&provider));
        let replaced = adapters.insert(name.clone(), AdapterSlot { adapter, provider });

        if replaced.is_some() {
            tracing::info!(adapter = %name, "Adapter replaced");
        } else {
            tracing::info!(adapter = %name, "Adapter registered");
        }
        Ok(replaced)
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one tick.
    ///
    /// Returns `None` without doing anything if another tick is in flight.
    pub async fn update_prices(&self) -> Option<TickReport> {
        if self.ticking.swap(true, Ordering::AcqRel) {
            tracing::warn!("Previous tick still running, skipping");
            metrics::record_tick_skipped();
            return None;
        }
        let _guard = TickGuard(&self.ticking);

        let started_at = Utc::now();
        let clock = Instant::now();
        let symbols: Arc<[String]> = Arc::from(self.symbols.read().as_slice());
        let slots: Vec<AdapterSlot> = self.adapters.read().values().cloned().collect();

        let failed_adapters = fetch_all(&slots, &symbols).await;

        let now = now_millis();
        let mut published = PriceBySymbol::with_capacity(symbols.len());
        let mut stale_symbols = Vec::new();

        for symbol in symbols.iter() {
            let fresh: Vec<Decimal> = slots
                .iter()
                .map(|slot| slot.provider.get_price(symbol))
                .filter(|p| self.freshness.is_fresh(p.timestamp, now))
                .map(|p| p.price)
                .collect();

            let price = match fresh.as_slice() {
                [] => {
                    stale_symbols.push(symbol.clone());
                    continue;
                }
                [single] => *single,
                many => self.aggregator.aggregate(many),
            };
            published.insert(symbol.clone(), Price::new(symbol.clone(), price, now));
        }

        let published_count = published.len();
        if !published.is_empty() {
            self.prices.write().extend(published);
        }

        let elapsed = clock.elapsed();
        metrics::record_tick(elapsed, published_count, stale_symbols.len());

        if stale_symbols.is_empty() {
            tracing::debug!(
                published = published_count,
                adapters = slots.len(),
                duration_ms = elapsed.as_millis(),
                "Tick complete"
            );
        } else {
            tracing::debug!(
                published = published_count,
                stale = ?stale_symbols,
                adapters = slots.len(),
                duration_ms = elapsed.as_millis(),
                "Tick complete with stale symbols"
            );
        }

        let report = TickReport {
            started_at,
            evaluated_at: now,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            adapters: slots.len(),
            failed_adapters,
            published: published_count,
            stale_symbols,
        };
        *self.last_tick.write() = Some(report.clone());
        Some(report)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the tick loop. The first tick runs immediately.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyRunning` if the loop is already running.
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.cancel.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let engine = Arc::clone(self);
        let token = cancel.clone();
        lifecycle.task = Some(tokio::spawn(async move { engine.run(token).await }));
        lifecycle.cancel = Some(cancel);

        tracing::info!(
            tick_interval_ms = self.settings.tick_interval.as_millis(),
            freshness_window_ms = self.freshness.window_ms(),
            aggregator = self.aggregator.name(),
            "Oracle engine started"
        );
        Ok(())
    }

    /// Stop the tick loop and shut every adapter down.
    ///
    /// Waits for the in-flight tick, if any, to finish.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotRunning` if the engine is stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (cancel, task) = {
            let mut lifecycle = self.lifecycle.lock();
            let cancel = lifecycle.cancel.take().ok_or(EngineError::NotRunning)?;
            (cancel, lifecycle.task.take())
        };

        cancel.cancel();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "Tick loop terminated abnormally");
        }

        let adapters: Vec<Arc<dyn Adapter>> = self
            .adapters
            .read()
            .values()
            .map(|slot| Arc::clone(&slot.adapter))
            .collect();
        futures::future::join_all(adapters.iter().map(|a| a.shutdown())).await;

        tracing::info!("Oracle engine stopped");
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.update_prices().await;
                }
            }
        }
    }
}

/// Clears the single-flight flag when the tick ends, even on panic.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fetch from every adapter concurrently; returns the names that failed.
async fn fetch_all(slots: &[AdapterSlot], symbols: &Arc<[String]>) -> Vec<String> {
    let mut tasks = JoinSet::new();
    let mut names = HashMap::with_capacity(slots.len());

    for slot in slots {
        let adapter = Arc::clone(&slot.adapter);
        let symbols = Arc::clone(symbols);
        let name = adapter.name().to_string();
        let handle = tasks.spawn(async move {
            let started = Instant::now();
            let result = adapter.fetch_prices(&symbols).await;
            (started.elapsed(), result)
        });
        names.insert(handle.id(), name);
    }

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, (elapsed, result))) => {
                let name = names.remove(&id).unwrap_or_default();
                metrics::record_adapter_fetch(&name, elapsed, result.is_ok());
                if let Err(e) = result {
                    tracing::warn!(adapter = %name, error = %e, "Adapter fetch failed");
                    failed.push(name);
                }
            }
            Err(e) => {
                let name = names.remove(&e.id()).unwrap_or_default();
                tracing::error!(adapter = %name, error = %e, "Adapter fetch task aborted");
                metrics::record_adapter_fetch(&name, Duration::ZERO, false);
                failed.push(name);
            }
        }
    }
    failed.sort();
    failed
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::{InProcessAdapter, MockPriceSource};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;

    use crate::application::ports::AdapterError;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn engine(list: &[&str]) -> OracleEngine {
        OracleEngine::new(symbols(list), EngineSettings::default()).unwrap()
    }

    fn source_adapter(source: &Arc<MockPriceSource>) -> Arc<dyn Adapter> {
        Arc::new(InProcessAdapter::new(Arc::clone(source)))
    }

    #[test]
    fn version_is_prefixed() {
        assert!(engine(&["A"]).version().starts_with('v'));
    }

    #[test]
    fn update_symbols_round_trip() {
        let engine = engine(&["NTNUSD"]);
        let accepted = engine.update_symbols(symbols(&["A", "B"])).unwrap();
        assert_eq!(accepted, symbols(&["A", "B"]));
        assert_eq!(engine.symbols(), symbols(&["A", "B"]));
    }

    #[test]
    fn update_symbols_rejects_malformed_set() {
        let engine = engine(&["NTNUSD"]);
        let result = engine.update_symbols(symbols(&["A", "bad symbol"]));
        assert!(matches!(result, Err(EngineError::InvalidSymbols(_))));
        assert_eq!(engine.symbols(), symbols(&["NTNUSD"]));
    }

    #[test]
    fn new_rejects_empty_symbol_set() {
        let result = OracleEngine::new(vec![], EngineSettings::default());
        assert!(matches!(
            result,
            Err(EngineError::InvalidSymbols(SymbolError::EmptySet))
        ));
    }

    #[tokio::test]
    async fn single_observation_published_unchanged() {
        let engine = engine(&["X"]);
        let source = Arc::new(MockPriceSource::new("only"));
        source.set_price("X", dec!(1.2345));
        engine.register_adapter(source_adapter(&source)).unwrap();

        let report = engine.update_prices().await.unwrap();
        let published = engine.get_price("X").unwrap();

        assert_eq!(published.price, dec!(1.2345));
        assert_eq!(published.symbol, "X");
        assert_eq!(published.timestamp, report.evaluated_at);
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn multiple_observations_are_averaged() {
        let engine = engine(&["X"]);
        for (name, value) in [("a", dec!(1.00)), ("b", dec!(1.02))] {
            let source = Arc::new(MockPriceSource::new(name));
            source.set_price("X", value);
            engine.register_adapter(source_adapter(&source)).unwrap();
        }

        engine.update_prices().await.unwrap();
        assert_eq!(engine.get_price("X").unwrap().price, dec!(1.01));
    }

    #[tokio::test]
    async fn stale_observations_are_ignored() {
        let engine = engine(&["X"]);
        let fresh = Arc::new(MockPriceSource::new("fresh"));
        fresh.set_price("X", dec!(2));
        let stale = Arc::new(MockPriceSource::new("stale"));
        stale.set_observation(Price::new("X", dec!(100), now_millis() - 10 * 60 * 1000));
        engine.register_adapter(source_adapter(&fresh)).unwrap();
        engine.register_adapter(source_adapter(&stale)).unwrap();

        engine.update_prices().await.unwrap();
        assert_eq!(engine.get_price("X").unwrap().price, dec!(2));
    }

    #[tokio::test]
    async fn symbol_without_fresh_data_keeps_previous_entry() {
        let engine = engine(&["X"]);
        let source = Arc::new(MockPriceSource::new("only"));
        source.set_price("X", dec!(5));
        engine.register_adapter(source_adapter(&source)).unwrap();
        engine.update_prices().await.unwrap();
        let first = engine.get_price("X").unwrap();

        source.set_observation(Price::new("X", dec!(7), now_millis() - 10 * 60 * 1000));
        let report = engine.update_prices().await.unwrap();

        assert_eq!(report.stale_symbols, symbols(&["X"]));
        assert_eq!(engine.get_price("X").unwrap(), first);
    }

    #[tokio::test]
    async fn failing_adapter_does_not_affect_others() {
        let engine = engine(&["Y"]);
        let broken = Arc::new(MockPriceSource::new("broken"));
        broken.fail_with("upstream down");
        let healthy = Arc::new(MockPriceSource::new("healthy"));
        healthy.set_price("Y", dec!(3.5));
        engine.register_adapter(source_adapter(&broken)).unwrap();
        engine.register_adapter(source_adapter(&healthy)).unwrap();

        let report = engine.update_prices().await.unwrap();
        assert_eq!(report.failed_adapters, symbols(&["broken"]));
        assert_eq!(engine.get_price("Y").unwrap().price, dec!(3.5));
    }

    #[tokio::test]
    async fn removed_symbols_stay_published() {
        let engine = engine(&["A", "B"]);
        let source = Arc::new(MockPriceSource::new("s"));
        source.set_price("A", dec!(1));
        source.set_price("B", dec!(2));
        engine.register_adapter(source_adapter(&source)).unwrap();
        engine.update_prices().await.unwrap();

        engine.update_symbols(symbols(&["A"])).unwrap();
        engine.update_prices().await.unwrap();

        let prices = engine.get_prices();
        assert!(prices.contains_key("B"));
        assert_eq!(engine.stale_symbols(now_millis()), Vec::<String>::new());
    }

    #[tokio::test]
    async fn register_and_remove_adapter() {
        let engine = engine(&["A"]);
        let source = Arc::new(MockPriceSource::new("s"));
        assert!(engine.register_adapter(source_adapter(&source)).unwrap().is_none());
        assert!(engine.register_adapter(source_adapter(&source)).unwrap().is_some());
        assert_eq!(engine.adapter_names(), symbols(&["s"]));
        assert_eq!(engine.provider_names(), symbols(&["s"]));

        assert!(engine.remove_adapter("s").is_some());
        assert!(engine.adapter_names().is_empty());
        assert!(engine.provider("s").is_none());
        assert!(engine.remove_adapter("s").is_none());
    }

    #[test]
    fn install_plugin_start_time_increases() {
        let engine = engine(&["A"]);
        let source = Arc::new(MockPriceSource::new("plug"));
        let at = Utc::now();

        let (replaced, first) = engine.install_plugin(source_adapter(&source), at).unwrap();
        assert!(replaced.is_none());
        let (replaced, second) = engine.install_plugin(source_adapter(&source), at).unwrap();
        assert!(replaced.is_some());
        assert!(second.started_at > first.started_at);
        assert_eq!(engine.list_plugins()["plug"], second);

        engine.remove_adapter("plug");
        assert!(engine.list_plugins().is_empty());
    }

    #[test]
    fn uninstall_ignores_replaced_plugin() {
        let engine = engine(&["A"]);
        let source = Arc::new(MockPriceSource::new("plug"));
        let old = source_adapter(&source);
        let new = source_adapter(&source);
        engine.install_plugin(Arc::clone(&old), Utc::now()).unwrap();
        engine.install_plugin(Arc::clone(&new), Utc::now()).unwrap();

        assert!(!engine.uninstall_plugin(&old));
        assert!(engine.list_plugins().contains_key("plug"));

        assert!(engine.uninstall_plugin(&new));
        assert!(engine.list_plugins().is_empty());
        assert!(engine.provider("plug").is_none());
    }

    struct NamedAdapter(&'static str);

    #[async_trait]
    impl Adapter for NamedAdapter {
        fn name(&self) -> &str {
            self.0
        }
        fn initialize(&self, _provider: Arc<PriceProvider>) {}
        async fn fetch_prices(&self, _symbols: &[String]) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[test]
    fn rejects_unusable_adapter_names() {
        let engine = engine(&["A"]);
        assert!(matches!(
            engine.register_adapter(Arc::new(NamedAdapter(""))),
            Err(EngineError::InvalidAdapterName(_))
        ));
        assert!(matches!(
            engine.install_plugin(Arc::new(NamedAdapter("a b")), Utc::now()),
            Err(EngineError::InvalidAdapterName(_))
        ));
        assert!(engine.adapter_names().is_empty());
    }

    struct BlockingAdapter {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Adapter for BlockingAdapter {
        fn name(&self) -> &str {
            "blocking"
        }
        fn initialize(&self, _provider: Arc<PriceProvider>) {}
        async fn fetch_prices(&self, _symbols: &[String]) -> Result<(), AdapterError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let engine = Arc::new(engine(&["A"]));
        let adapter = Arc::new(BlockingAdapter {
            entered: Notify::new(),
            release: Notify::new(),
        });
        engine.register_adapter(adapter.clone()).unwrap();

        let running = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.update_prices().await })
        };
        adapter.entered.notified().await;

        assert!(engine.update_prices().await.is_none());

        adapter.release.notify_one();
        assert!(running.await.unwrap().is_some());
        assert!(engine.last_tick().is_some());
    }

    #[tokio::test]
    async fn start_and_stop_lifecycle() {
        let engine = Arc::new(
            OracleEngine::new(
                symbols(&["X"]),
                EngineSettings {
                    tick_interval: Duration::from_millis(20),
                    ..EngineSettings::default()
                },
            )
            .unwrap(),
        );
        let source = Arc::new(MockPriceSource::new("s"));
        source.set_price("X", dec!(9));
        engine.register_adapter(source_adapter(&source)).unwrap();

        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.get_price("X").unwrap().price, dec!(9));

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
    }
}
