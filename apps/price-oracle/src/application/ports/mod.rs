//! Port Interfaces
//!
//! Contracts between the engine and the data sources it fronts.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Adapter`: refreshes one price provider on demand (in-process or
//!   subprocess)
//! - `PriceSource`: fetches observations from one upstream, wrapped by the
//!   in-process adapter

mod adapter_port;
mod price_source_port;

pub use adapter_port::{Adapter, AdapterError, ProviderBinding, validate_adapter_name};
pub use price_source_port::PriceSource;
