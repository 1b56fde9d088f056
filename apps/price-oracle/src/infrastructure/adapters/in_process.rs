//! In-process adapter over a [`PriceSource`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{Adapter, AdapterError, PriceSource, ProviderBinding};
use crate::domain::provider::PriceProvider;

/// Fetch timeout used unless overridden.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapter that calls a [`PriceSource`] directly, bounded by a timeout.
pub struct InProcessAdapter<S: PriceSource> {
    source: Arc<S>,
    binding: ProviderBinding,
    timeout: Duration,
}

impl<S: PriceSource> InProcessAdapter<S> {
    /// Wrap `source` with the default timeout.
    #[must_use]
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            binding: ProviderBinding::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Override the fetch timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<S: PriceSource + 'static> Adapter for InProcessAdapter<S> {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn initialize(&self, provider: Arc<PriceProvider>) {
        self.binding.bind(provider);
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<(), AdapterError> {
        let provider = self.binding.current(self.name())?;

        let prices = tokio::time::timeout(self.timeout, self.source.fetch(symbols))
            .await
            .map_err(|_| AdapterError::Timeout(self.timeout))??;

        tracing::trace!(adapter = %self.name(), count = prices.len(), "Fetched prices");
        provider.add_prices(prices);
        Ok(())
    }
}
