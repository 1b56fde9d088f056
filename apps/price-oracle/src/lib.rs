#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Oracle - Aggregation Engine
//!
//! Collects price observations for a tracked set of symbols from
//! hot-swappable adapters, drops stale observations, aggregates the rest
//! per symbol and serves the result.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `price`: observations and symbol rules
//!   - `provider`: per-source price stores and their registry
//!   - `aggregation`: aggregation policies and the freshness window
//!   - `plugin`: plugin descriptors
//!
//! - **Application**: Ports and the engine
//!   - `ports`: `Adapter` and `PriceSource` contracts
//!   - `engine`: tick loop, published price table, adapter set
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `adapters`: in-process adapter and mock source
//!   - `plugin`: subprocess plugins and the directory manager
//!   - `rpc`, `health`, `http`: JSON-RPC and health endpoints
//!   - `config`, `metrics`, `telemetry`: ambient plumbing
//!
//! # Data Flow
//!
//! ```text
//! plugin dir ──► PluginManager ──► PluginProcess ─┐
//!                                                 ├─► PriceProvider(s) ──► tick ──► price table ──► JSON-RPC
//! PriceSource ─────────────────► InProcessAdapter ┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core oracle types with no external dependencies.
pub mod domain;

/// Application layer - Ports and the oracle engine.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{Aggregator, FreshnessPolicy, MeanAggregator, MedianAggregator};
pub use domain::plugin::{PluginInfo, PluginsByName};
pub use domain::price::{Price, PriceBySymbol, SymbolError};
pub use domain::provider::{PriceProvider, ProviderRegistry};

// Ports and engine
pub use application::engine::{
    EngineError, EngineSettings, EngineState, OracleEngine, TickReport, VERSION,
};
pub use application::ports::{Adapter, AdapterError, PriceSource};

// Adapters
pub use infrastructure::adapters::{InProcessAdapter, MockPriceSource};
pub use infrastructure::plugin::{PluginError, PluginManager, PluginProcess, ScanReport};

// Infrastructure config
pub use infrastructure::config::{ConfigError, OracleConfig, PluginSettings, ServerSettings};

// HTTP
pub use infrastructure::http::{HttpServer, HttpServerError, app as http_app};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
