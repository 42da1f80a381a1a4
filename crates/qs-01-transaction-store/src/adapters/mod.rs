//! # Adapters
//!
//! Concrete implementations of the outbound ports.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod time;

pub use memory::{InMemoryEngine, InMemorySession};
#[cfg(feature = "postgres")]
pub use postgres::{PoolStrategy, PostgresConfig, PostgresEngine, PostgresSession};
pub use time::SystemTimeSource;
