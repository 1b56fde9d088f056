//! JSON-RPC Endpoint
//!
//! Exposes the engine's query and control operations as JSON-RPC style
//! calls on `POST /`.
//!
//! # Methods
//!
//! | Method           | Params       | Result                          |
//! |------------------|--------------|---------------------------------|
//! | `get_version`    | -            | `{"version": "v0.0.1"}`         |
//! | `get_symbols`    | -            | `["NTNUSD", ...]`               |
//! | `update_symbols` | `["A", ...]` | accepted symbols                |
//! | `get_prices`     | -            | `{"prices": {..}, "symbols": []}` |
//! | `list_plugins`   | -            | `{name: {name, started_at}}`    |

use std::sync::Arc;

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::engine::OracleEngine;
use crate::domain::plugin::PluginsByName;
use crate::domain::price::PriceBySymbol;
use crate::infrastructure::metrics;

/// Malformed request body.
pub const PARSE_ERROR: i64 = -32700;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Params missing or of the wrong shape.
pub const INVALID_PARAMS: i64 = -32602;
/// Result could not be encoded.
pub const INTERNAL_ERROR: i64 = -32603;

// =============================================================================
// Wire Types
// =============================================================================

/// Incoming call.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen id, echoed back.
    #[serde(default)]
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Outgoing reply.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    /// Echoed request id.
    pub id: Value,
    /// Echoed method name.
    pub method: String,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// `get_version` result.
#[derive(Debug, Serialize)]
struct VersionResult<'a> {
    version: &'a str,
}

/// `get_prices` result.
#[derive(Debug, Serialize)]
struct PricesResult {
    prices: PriceBySymbol,
    symbols: Vec<String>,
}

// =============================================================================
// Router
// =============================================================================

/// Build the JSON-RPC router.
pub fn router(engine: Arc<OracleEngine>) -> Router {
    Router::new().route("/", post(rpc_handler)).with_state(engine)
}

async fn rpc_handler(State(engine): State<Arc<OracleEngine>>, body: Bytes) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected malformed RPC request");
            return Json(RpcResponse {
                id: Value::Null,
                method: String::new(),
                result: None,
                error: Some(RpcError::new(PARSE_ERROR, e.to_string())),
            });
        }
    };

    Json(dispatch(&engine, request))
}

/// Execute one call against the engine.
pub fn dispatch(engine: &OracleEngine, request: RpcRequest) -> RpcResponse {
    let RpcRequest { id, method, params } = request;
    let outcome = call(engine, &method, params);
    metrics::record_rpc_request(&method, outcome.is_ok());

    match outcome {
        Ok(result) => RpcResponse {
            id,
            method,
            result: Some(result),
            error: None,
        },
        Err(error) => {
            tracing::debug!(method = %method, code = error.code, message = %error.message, "RPC call failed");
            RpcResponse {
                id,
                method,
                result: None,
                error: Some(error),
            }
        }
    }
}

fn call(engine: &OracleEngine, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "get_version" => to_value(&VersionResult {
            version: engine.version(),
        }),
        "get_symbols" => to_value(&engine.symbols()),
        "update_symbols" => {
            let symbols: Vec<String> = serde_json::from_value(params)
                .map_err(|e| RpcError::new(INVALID_PARAMS, format!("expected symbol list: {e}")))?;
            let accepted = engine
                .update_symbols(symbols)
                .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
            to_value(&accepted)
        }
        "get_prices" => to_value(&PricesResult {
            prices: engine.get_prices(),
            symbols: engine.symbols(),
        }),
        "list_plugins" => to_value::<PluginsByName>(&engine.list_plugins()),
        other => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("method {other:?} not found"),
        )),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
