//! Price Source Port (Driven Port)
//!
//! Interface for an upstream queried directly inside the oracle process.

use async_trait::async_trait;

use super::AdapterError;
use crate::domain::price::Price;

/// Upstream price source.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Source name, used as the adapter name.
    fn name(&self) -> &str;

    /// Fetch observations for `symbols`.
    ///
    /// Symbols the source cannot price are left out of the result rather
    /// than failing the whole call.
    async fn fetch(&self, symbols: &[String]) -> Result<Vec<Price>, AdapterError>;
}
