//! # Safe Queue Service Test Suite
//!
//! Unified test crate for flows that span several crates.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Codec throughput (criterion)
//! └── src/integration/  # Broker → handler → store flows
//!     ├── ingestion.rs
//!     └── recovery.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qs-tests
//!
//! # By category
//! cargo test -p qs-tests integration::ingestion
//! cargo test -p qs-tests integration::recovery
//!
//! # Benchmarks
//! cargo bench -p qs-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
