//! Plugin Wire Protocol
//!
//! Newline-delimited JSON over the plugin's stdin/stdout. The host writes
//! one request per line and reads one response per line.
//!
//! ```text
//! host -> plugin  {"id":1,"method":"handshake"}
//! plugin -> host  {"id":1,"result":{"name":"forex","version":"1.2.0"}}
//! host -> plugin  {"id":2,"method":"fetch_prices","params":{"symbols":["NTNUSD"]}}
//! plugin -> host  {"id":2,"result":{"prices":[{"symbol":"NTNUSD","price":"1.01","timestamp":1700000000000}]}}
//! host -> plugin  {"id":3,"method":"shutdown"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::AdapterError;
use crate::domain::price::Price;

// =============================================================================
// Requests
// =============================================================================

/// Host to plugin request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request<'a> {
    /// Correlation id, unique per process.
    pub id: u64,
    /// Method and parameters.
    #[serde(flatten)]
    pub call: Call<'a>,
}

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call<'a> {
    /// Ask the plugin for its declared name.
    Handshake,
    /// Ask for current prices.
    FetchPrices {
        /// Symbols to price.
        symbols: &'a [String],
    },
    /// Ask the plugin to exit.
    Shutdown,
}

impl Call<'_> {
    /// Method name, for logs.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::FetchPrices { .. } => "fetch_prices",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Encode a request as one line, trailing newline included.
///
/// # Errors
///
/// Returns `AdapterError::Protocol` if serialization fails.
pub fn encode_request(request: &Request<'_>) -> Result<Vec<u8>, AdapterError> {
    let mut line =
        serde_json::to_vec(request).map_err(|e| AdapterError::Protocol(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

// =============================================================================
// Responses
// =============================================================================

/// Plugin to host response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Id of the request answered; may be omitted by simple plugins.
    #[serde(default)]
    pub id: Option<u64>,
    /// Result on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    /// Whether this response answers request `id`.
    ///
    /// Responses without an id are taken to answer the pending request.
    #[must_use]
    pub fn answers(&self, id: u64) -> bool {
        self.id.is_none_or(|own| own == id)
    }

    /// Unwrap the result, turning a reported error into `AdapterError::Remote`.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Remote` for an error response and
    /// `AdapterError::Protocol` for a response with neither field.
    pub fn into_result(self) -> Result<Value, AdapterError> {
        if let Some(error) = self.error {
            let message = match error {
                Value::String(s) => s,
                Value::Object(ref map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| error.to_string(), str::to_string),
                other => other.to_string(),
            };
            return Err(AdapterError::Remote(message));
        }
        self.result
            .ok_or_else(|| AdapterError::Protocol("response has neither result nor error".into()))
    }
}

/// Decode one response line.
///
/// # Errors
///
/// Returns `AdapterError::Protocol` if the line is not a response object.
pub fn decode_response(line: &str) -> Result<Response, AdapterError> {
    serde_json::from_str(line.trim()).map_err(|e| AdapterError::Protocol(e.to_string()))
}

/// Handshake result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandshakeResult {
    /// Declared plugin name.
    pub name: String,
    /// Optional plugin version.
    #[serde(default)]
    pub version: Option<String>,
}

/// `fetch_prices` result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FetchResult {
    /// Observations returned.
    #[serde(default)]
    pub prices: Vec<WirePrice>,
}

/// One observation as sent by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WirePrice {
    /// Symbol.
    pub symbol: String,
    /// Price, as a decimal string or a JSON number.
    pub price: Decimal,
    /// Observation time in milliseconds; missing or zero means "now".
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl WirePrice {
    /// Convert to a [`Price`], stamping missing timestamps with `received_at`.
    #[must_use]
    pub fn into_price(self, received_at: i64) -> Price {
        let timestamp = match self.timestamp {
            Some(ts) if ts != 0 => ts,
            _ => received_at,
        };
        Price::new(self.symbol, self.price, timestamp)
    }
}

/// Decode a typed result.
///
/// # Errors
///
/// Returns `AdapterError::Protocol` if the value has the wrong shape.
pub fn decode_result<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, AdapterError> {
    serde_json::from_value(value).map_err(|e| AdapterError::Protocol(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
