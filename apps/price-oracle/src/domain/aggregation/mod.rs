//! Aggregation and Freshness Policies
//!
//! An [`Aggregator`] folds the fresh observations of one symbol into a
//! single published price. The engine only calls it with at least two
//! values; single observations are published as-is.
//!
//! [`FreshnessPolicy`] decides which observations are usable at a tick.

use std::time::Duration;

use rust_decimal::Decimal;

/// Default maximum observation age.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(3 * 60);

// =============================================================================
// Aggregators
// =============================================================================

/// Policy combining same-symbol observations into one price.
pub trait Aggregator: Send + Sync + std::fmt::Debug {
    /// Combine `prices` into a single value.
    ///
    /// # Panics
    ///
    /// Implementations panic when `prices` is empty. Callers must pass at
    /// least one value.
    fn aggregate(&self, prices: &[Decimal]) -> Decimal;

    /// Policy name, for logs.
    fn name(&self) -> &'static str;
}

/// Arithmetic mean without outlier rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAggregator;

impl Aggregator for MeanAggregator {
    fn aggregate(&self, prices: &[Decimal]) -> Decimal {
        assert!(!prices.is_empty(), "aggregate called with no observations");
        let count = Decimal::from(prices.len());

        match prices.iter().try_fold(Decimal::ZERO, |sum, p| sum.checked_add(*p)) {
            Some(sum) => sum / count,
            // Near the edge of the range: average term by term instead.
            None => prices
                .iter()
                .fold(Decimal::ZERO, |mean, p| saturating_add(mean, *p / count)),
        }
    }

    fn name(&self) -> &'static str {
        "mean"
    }
}

/// Median; the mean of the two middle values for even counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianAggregator;

impl Aggregator for MedianAggregator {
    fn aggregate(&self, prices: &[Decimal]) -> Decimal {
        assert!(!prices.is_empty(), "aggregate called with no observations");
        let mut sorted = prices.to_vec();
        sorted.sort_unstable();

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            midpoint(sorted[mid - 1], sorted[mid])
        }
    }

    fn name(&self) -> &'static str {
        "median"
    }
}

fn saturating_add(a: Decimal, b: Decimal) -> Decimal {
    a.checked_add(b).unwrap_or(if b.is_sign_negative() {
        Decimal::MIN
    } else {
        Decimal::MAX
    })
}

fn midpoint(a: Decimal, b: Decimal) -> Decimal {
    a.checked_add(b)
        .map_or_else(|| a / Decimal::TWO + b / Decimal::TWO, |sum| sum / Decimal::TWO)
}

// =============================================================================
// Freshness
// =============================================================================

/// Accepts observations younger than the window and not dated in the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    window_ms: i64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}

impl FreshnessPolicy {
    /// Create a policy with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Window length in milliseconds.
    #[must_use]
    pub const fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Whether an observation taken at `timestamp` is usable at `now`.
    ///
    /// Both values are milliseconds since the Unix epoch.
    #[must_use]
    pub const fn is_fresh(&self, timestamp: i64, now: i64) -> bool {
        timestamp <= now && now.saturating_sub(timestamp) < self.window_ms
    }
}

// =============================================================================
// Tests
// =============================================================================
