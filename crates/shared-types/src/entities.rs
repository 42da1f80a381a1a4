//! # Core Domain Primitives
//!
//! Fixed-width on-chain primitives used across every crate.

pub use primitive_types::{H160, H256, U256};

/// A 20-byte Ethereum address.
pub type Address = H160;

/// A 32-byte hash (Keccak-256 `safeTxHash`, transaction hash).
pub type Hash = H256;

/// The zero address, which an absent `to`/`gas_token`/`refund_receiver` stands for.
pub const ZERO_ADDRESS: Address = H160::zero();
