//! In-Process Adapters
//!
//! Adapters that query their upstream directly inside the oracle process.

pub mod in_process;
pub mod mock;

pub use in_process::{DEFAULT_FETCH_TIMEOUT, InProcessAdapter};
pub use mock::MockPriceSource;
