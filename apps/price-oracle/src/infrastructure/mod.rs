//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the transport,
//! configuration and observability plumbing around the engine.

/// In-process adapters wrapping a `PriceSource`.
pub mod adapters;

/// Subprocess plugins: wire protocol, process handle, directory manager.
pub mod plugin;

/// Configuration from the environment.
pub mod config;

/// JSON-RPC request routing.
pub mod rpc;

/// Health check HTTP endpoints.
pub mod health;

/// HTTP server hosting the RPC and health routers.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
