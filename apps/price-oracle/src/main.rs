//! Price Oracle Binary
//!
//! Starts the oracle engine, the plugin manager and the HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-oracle
//! ```
//!
//! # Environment Variables
//!
//! - `ORACLE_SYMBOLS`: Comma separated symbols (default: NTN pairs)
//! - `ORACLE_PLUGIN_DIR`: Plugin directory (default: ./plugins)
//! - `ORACLE_HTTP_PORT`: JSON-RPC, health and metrics port (default: 30311)
//! - `ORACLE_TICK_INTERVAL_SECS`: Tick period (default: 10)
//! - `ORACLE_FRESHNESS_WINDOW_SECS`: Maximum observation age (default: 180)
//! - `ORACLE_PLUGIN_TIMEOUT_MS`: Plugin call timeout (default: 5000)
//! - `ORACLE_PLUGIN_SCAN_INTERVAL_SECS`: Plugin directory scan period (default: 2)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-oracle)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_oracle::infrastructure::telemetry;
use price_oracle::{
    HttpServer, OracleConfig, OracleEngine, PluginManager, http_app, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time granted to background tasks after the shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = price_oracle::VERSION, "Starting price oracle");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = OracleConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let engine = Arc::new(OracleEngine::new(config.symbols.clone(), config.engine)?);

    let plugin_manager = Arc::new(PluginManager::new(
        config.plugins.clone(),
        Arc::clone(&engine),
    ));
    if let Err(e) = plugin_manager.scan().await {
        tracing::warn!(error = %e, "Initial plugin scan failed");
    }

    engine.start()?;

    let manager_task = tokio::spawn(Arc::clone(&plugin_manager).run(shutdown_token.clone()));

    let http_server = HttpServer::new(
        config.server.http_port,
        http_app(Arc::clone(&engine)),
        shutdown_token.clone(),
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Price oracle ready");

    await_shutdown(shutdown_token).await;

    if let Err(e) = engine.stop().await {
        tracing::warn!(error = %e, "Engine stop failed");
    }

    let drain = async {
        let _ = manager_task.await;
        let _ = http_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    tracing::info!("Price oracle stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &OracleConfig) {
    tracing::info!(
        symbols = ?config.symbols,
        http_port = config.server.http_port,
        plugin_dir = %config.plugins.dir.display(),
        "Configuration loaded"
    );
    tracing::debug!(
        tick_interval_secs = config.engine.tick_interval.as_secs(),
        freshness_window_secs = config.engine.freshness_window.as_secs(),
        plugin_timeout_ms = config.plugins.call_timeout.as_millis(),
        plugin_scan_interval_secs = config.plugins.scan_interval.as_secs(),
        "Timing"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
