//! Price Observations
//!
//! The value type exchanged between adapters, providers and the engine,
//! plus the rules a tracked symbol has to satisfy.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted symbol length.
pub const MAX_SYMBOL_LEN: usize = 32;

/// Prices keyed by symbol.
pub type PriceBySymbol = HashMap<String, Price>;

// =============================================================================
// Price
// =============================================================================

/// A single price observation.
///
/// The zero value (`Price::default()`) stands for "no observation": empty
/// symbol, zero price, zero timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Symbol the price belongs to.
    pub symbol: String,
    /// Observed price.
    pub price: Decimal,
    /// Observation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Price {
    /// Create a new observation.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }

    /// Create an observation stamped with the current wall-clock time.
    #[must_use]
    pub fn now(symbol: impl Into<String>, price: Decimal) -> Self {
        Self::new(symbol, price, now_millis())
    }

    /// Whether this is the zero value.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.symbol.is_empty() && self.price.is_zero() && self.timestamp == 0
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Symbol Rules
// =============================================================================

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The symbol set is empty.
    #[error("symbol set cannot be empty")]
    EmptySet,

    /// A symbol is empty or blank.
    #[error("symbol at position {0} is empty")]
    Empty(usize),

    /// A symbol is longer than [`MAX_SYMBOL_LEN`].
    #[error("symbol {0:?} exceeds {max} characters", max = MAX_SYMBOL_LEN)]
    TooLong(String),

    /// A symbol contains a character outside the accepted set.
    #[error("symbol {symbol:?} contains invalid character {invalid:?}")]
    InvalidCharacter {
        /// Offending symbol.
        symbol: String,
        /// First invalid character.
        invalid: char,
    },

    /// The same symbol appears twice.
    #[error("symbol {0:?} is listed more than once")]
    Duplicate(String),
}

/// Validate a single symbol.
///
/// # Errors
///
/// Returns `SymbolError` if the symbol is empty, too long or contains a
/// character other than ASCII alphanumerics, `-`, `_`, `/` and `.`.
pub fn validate_symbol(position: usize, symbol: &str) -> Result<(), SymbolError> {
    if symbol.is_empty() {
        return Err(SymbolError::Empty(position));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(SymbolError::TooLong(symbol.to_string()));
    }
    if let Some(invalid) = symbol
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.')))
    {
        return Err(SymbolError::InvalidCharacter {
            symbol: symbol.to_string(),
            invalid,
        });
    }
    Ok(())
}

/// Validate an ordered symbol set.
///
/// # Errors
///
/// Returns `SymbolError` if the set is empty, contains a duplicate or any
/// member fails [`validate_symbol`].
pub fn validate_symbols(symbols: &[String]) -> Result<(), SymbolError> {
    if symbols.is_empty() {
        return Err(SymbolError::EmptySet);
    }

    let mut seen = HashSet::with_capacity(symbols.len());
    for (position, symbol) in symbols.iter().enumerate() {
        validate_symbol(position, symbol)?;
        if !seen.insert(symbol.as_str()) {
            return Err(SymbolError::Duplicate(symbol.clone()));
        }
    }
    Ok(())
}

/// Split a comma separated list into trimmed symbols.
///
/// Empty entries are kept so that validation can report them.
#[must_use]
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

// =============================================================================
// Tests
// =============================================================================
