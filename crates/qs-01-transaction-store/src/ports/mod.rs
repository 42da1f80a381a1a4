//! # Ports (Hexagonal Architecture)
//!
//! - `inbound`: the API this crate offers to the runtime.
//! - `outbound`: what it needs from a storage engine and a clock.

pub mod inbound;
pub mod outbound;
