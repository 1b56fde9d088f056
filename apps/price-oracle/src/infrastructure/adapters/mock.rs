//! Mock price source for tests and local wiring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{AdapterError, PriceSource};
use crate::domain::price::{Price, now_millis};

/// Mock price source.
///
/// Prices set with [`MockPriceSource::set_price`] are stamped with the time
/// of each fetch; [`MockPriceSource::set_observation`] keeps the given
/// timestamp.
#[derive(Debug)]
pub struct MockPriceSource {
    name: String,
    prices: RwLock<HashMap<String, (Decimal, Option<i64>)>>,
    failure: RwLock<Option<String>>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl MockPriceSource {
    /// Create an empty source named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prices: RwLock::new(HashMap::new()),
            failure: RwLock::new(None),
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Delay every fetch by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the price for a symbol, stamped at fetch time.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().insert(symbol.to_string(), (price, None));
    }

    /// Set an observation with a fixed timestamp.
    pub fn set_observation(&self, price: Price) {
        self.prices
            .write()
            .insert(price.symbol, (price.price, Some(price.timestamp)));
    }

    /// Fail every fetch with `message` until [`MockPriceSource::recover`].
    pub fn fail_with(&self, message: &str) {
        *self.failure.write() = Some(message.to_string());
    }

    /// Stop failing.
    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    /// Number of fetches served or failed so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, symbols: &[String]) -> Result<Vec<Price>, AdapterError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failure.read().clone() {
            return Err(AdapterError::Source(message));
        }

        let now = now_millis();
        let prices = self.prices.read();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                prices
                    .get(symbol)
                    .map(|(price, ts)| Price::new(symbol.clone(), *price, ts.unwrap_or(now)))
            })
            .collect())
    }
}
