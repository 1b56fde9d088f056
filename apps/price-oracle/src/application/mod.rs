//! Application Layer - Ports and the oracle engine.
//!
//! Defines the adapter contracts the infrastructure implements and the
//! engine that drives them on every tick.

/// Port interfaces for price adapters and sources.
pub mod ports;

/// Oracle engine: symbol set, published prices, tick loop.
pub mod engine;
