//! Domain Layer - Core oracle types and policies.
//!
//! Pure data structures and policies with no I/O: prices, per-source
//! provider stores, aggregation and freshness rules, plugin descriptors.

/// Price observations and symbol rules.
pub mod price;

/// Per-source price stores and their registry.
pub mod provider;

/// Aggregation and freshness policies.
pub mod aggregation;

/// Plugin descriptors published to consumers.
pub mod plugin;
