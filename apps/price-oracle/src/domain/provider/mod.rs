//! Price Providers
//!
//! A [`PriceProvider`] is the price store of one data source. Its owning
//! adapter is the only writer; the engine reads it on every tick. The
//! [`ProviderRegistry`] maps provider names to providers and follows the
//! set of active adapters.
//!
//! Both structures use reader/writer locks: reads run in parallel with each
//! other and never observe a partially applied batch of writes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::price::{Price, PriceBySymbol};

// =============================================================================
// Price Provider
// =============================================================================

/// Latest observation per symbol for a single named source.
#[derive(Debug)]
pub struct PriceProvider {
    name: String,
    prices: RwLock<PriceBySymbol>,
}

impl PriceProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upsert observations by symbol; the last write for a symbol wins.
    ///
    /// The whole batch is applied under one write lock.
    pub fn add_prices(&self, prices: impl IntoIterator<Item = Price>) {
        let mut table = self.prices.write();
        for price in prices {
            table.insert(price.symbol.clone(), price);
        }
    }

    /// Latest observation for `symbol`, or the zero value if none exists.
    #[must_use]
    pub fn get_price(&self, symbol: &str) -> Price {
        self.prices.read().get(symbol).cloned().unwrap_or_default()
    }

    /// Snapshot of every observation held.
    #[must_use]
    pub fn get_prices(&self) -> PriceBySymbol {
        self.prices.read().clone()
    }

    /// Number of symbols with an observation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    /// Whether no observation has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}

// =============================================================================
// Provider Registry
// =============================================================================

/// Registry of providers keyed by unique name.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<PriceProvider>>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh provider under `name`, replacing any prior one.
    pub fn add_provider(&self, name: &str) -> Arc<PriceProvider> {
        let provider = Arc::new(PriceProvider::new(name));
        self.providers
            .write()
            .insert(name.to_string(), Arc::clone(&provider));
        provider
    }

    /// Look up a provider by name.
    #[must_use]
    pub fn get_provider(&self, name: &str) -> Option<Arc<PriceProvider>> {
        self.providers.read().get(name).cloned()
    }

    /// Remove a provider; returns it if it was registered.
    pub fn remove_provider(&self, name: &str) -> Option<Arc<PriceProvider>> {
        self.providers.write().remove(name)
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_symbol_returns_zero_value() {
        let provider = PriceProvider::new("binance");
        assert!(provider.get_price("NTNUSD").is_zero());
        assert!(provider.is_empty());
    }

    #[test]
    fn later_write_replaces_earlier_one() {
        let provider = PriceProvider::new("binance");
        provider.add_prices([Price::new("NTNUSD", dec!(1.00), 1)]);
        provider.add_prices([
            Price::new("NTNUSD", dec!(1.05), 2),
            Price::new("NTNEUR", dec!(0.97), 2),
        ]);

        assert_eq!(provider.get_price("NTNUSD").price, dec!(1.05));
        assert_eq!(provider.get_price("NTNUSD").timestamp, 2);
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let provider = PriceProvider::new("binance");
        provider.add_prices([Price::new("A", dec!(1), 1)]);

        let snapshot = provider.get_prices();
        provider.add_prices([Price::new("A", dec!(2), 2)]);

        assert_eq!(snapshot["A"].price, dec!(1));
        assert_eq!(provider.get_price("A").price, dec!(2));
    }

    #[test]
    fn registry_add_replaces_existing_provider() {
        let registry = ProviderRegistry::new();
        let first = registry.add_provider("forex");
        first.add_prices([Price::new("EUR-USD", dec!(1.08), 1)]);

        let second = registry.add_provider("forex");
        assert!(second.is_empty());
        assert!(Arc::ptr_eq(&registry.get_provider("forex").unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_remove_makes_lookup_absent() {
        let registry = ProviderRegistry::new();
        registry.add_provider("forex");
        registry.add_provider("binance");

        assert!(registry.remove_provider("forex").is_some());
        assert!(registry.get_provider("forex").is_none());
        assert!(registry.get_provider("unknown").is_none());
        assert_eq!(registry.names(), vec!["binance".to_string()]);
        assert!(registry.remove_provider("forex").is_none());
    }

    #[test]
    fn concurrent_readers_see_whole_batches() {
        let provider = Arc::new(PriceProvider::new("binance"));
        let writer = {
            let provider = Arc::clone(&provider);
            std::thread::spawn(move || {
                for i in 0..500_i64 {
                    provider.add_prices([
                        Price::new("A", Decimal::from(i), i),
                        Price::new("B", Decimal::from(i), i),
                    ]);
                }
            })
        };

        for _ in 0..500 {
            let snapshot = provider.get_prices();
            if let (Some(a), Some(b)) = (snapshot.get("A"), snapshot.get("B")) {
                assert_eq!(a.timestamp, b.timestamp);
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn last_write_wins(writes in prop::collection::vec((0usize..4, 0i64..1_000_000), 1..64)) {
            let symbols = ["A", "B", "C", "D"];
            let provider = PriceProvider::new("p");
            let mut expected: HashMap<&str, Price> = HashMap::new();

            for (idx, value) in &writes {
                let price = Price::new(symbols[*idx], Decimal::from(*value), *value);
                expected.insert(symbols[*idx], price.clone());
                provider.add_prices([price]);
            }

            for symbol in symbols {
                let got = provider.get_price(symbol);
                match expected.get(symbol) {
                    Some(want) => prop_assert_eq!(&got, want),
                    None => prop_assert!(got.is_zero()),
                }
            }
        }
    }
}
