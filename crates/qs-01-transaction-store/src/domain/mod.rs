//! # Domain Layer
//!
//! Pure domain types: the transaction record, its table layout and the
//! store's error type. No I/O happens here.

pub mod entities;
pub mod errors;
pub mod schema;
