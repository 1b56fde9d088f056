//! Adapter Port (Driven Port)
//!
//! An adapter fetches prices for a set of symbols and writes them into the
//! provider it was bound to at registration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::provider::PriceProvider;

/// Adapter error.
///
/// Every variant is a transient failure of one adapter; none of them stops
/// the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// `fetch_prices` called before `initialize`.
    #[error("adapter {0} is not bound to a provider")]
    NotInitialized(String),

    /// Upstream source failed.
    #[error("source error: {0}")]
    Source(String),

    /// Call did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Reading from or writing to the plugin process failed.
    #[error("plugin i/o error: {0}")]
    Io(String),

    /// Plugin sent something that is not a valid response.
    #[error("plugin protocol error: {0}")]
    Protocol(String),

    /// Plugin answered with an error.
    #[error("plugin reported error: {0}")]
    Remote(String),

    /// Plugin process is gone.
    #[error("plugin process has exited")]
    Exited,
}

/// Port for a price adapter.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identity, used as the provider registry key.
    fn name(&self) -> &str;

    /// Bind the adapter to the provider it populates.
    fn initialize(&self, provider: Arc<PriceProvider>);

    /// Refresh prices for `symbols` into the bound provider.
    ///
    /// On error, prices already held by the provider stay untouched.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<(), AdapterError>;

    /// Release external resources. Must be safe to call more than once.
    async fn shutdown(&self) {}
}

/// Provider slot shared by adapter implementations.
#[derive(Debug, Default)]
pub struct ProviderBinding {
    provider: RwLock<Option<Arc<PriceProvider>>>,
}

impl ProviderBinding {
    /// Create an unbound slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) the provider.
    pub fn bind(&self, provider: Arc<PriceProvider>) {
        *self.provider.write() = Some(provider);
    }

    /// Bound provider, cloned out of the lock.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::NotInitialized` if nothing is bound yet.
    pub fn current(&self, adapter: &str) -> Result<Arc<PriceProvider>, AdapterError> {
        self.provider
            .read()
            .clone()
            .ok_or_else(|| AdapterError::NotInitialized(adapter.to_string()))
    }
}

/// Check that an adapter name can be used as a registry key.
///
/// # Errors
///
/// Returns the offending name if it is empty or contains whitespace or
/// control characters.
pub fn validate_adapter_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(name.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_starts_unbound() {
        let binding = ProviderBinding::new();
        assert_eq!(
            binding.current("forex").unwrap_err(),
            AdapterError::NotInitialized("forex".to_string())
        );
    }

    #[test]
    fn rebinding_replaces_provider() {
        let binding = ProviderBinding::new();
        binding.bind(Arc::new(PriceProvider::new("a")));
        binding.bind(Arc::new(PriceProvider::new("b")));
        assert_eq!(binding.current("x").unwrap().name(), "b");
    }

    #[test]
    fn adapter_names() {
        assert!(validate_adapter_name("forex-ExchangeRate").is_ok());
        assert!(validate_adapter_name("").is_err());
        assert!(validate_adapter_name("two words").is_err());
        assert!(validate_adapter_name("tab\tname").is_err());
    }
}
