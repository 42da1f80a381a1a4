//! # Shared Types Crate
//!
//! Domain primitives and the codecs that guard the storage boundary.
//!
//! ## Design Principles
//!
//! - **Strict at the edges**: every value entering or leaving storage passes
//!   through a [`ColumnCodec`], so the rest of the system only ever sees
//!   in-range `U256`s and exact-width addresses and hashes.
//! - **Typed failures**: codec failures are [`CodecError`] variants, never
//!   panics or silent truncation.

pub mod codecs;
pub mod column;
pub mod entities;
pub mod errors;

pub use codecs::{
    to_hex, AddressCodec, BoolCodec, BytesCodec, ColumnCodec, FixedBytes, FixedBytesCodec,
    HashCodec, JsonCodec, Nullable, TimestampCodec, Uint256Codec, UINT256_PRECISION,
};
pub use column::ColumnValue;
pub use entities::*;
pub use errors::CodecError;
