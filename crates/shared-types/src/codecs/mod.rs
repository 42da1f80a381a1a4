//! # Domain Codecs
//!
//! Strict two-way transforms between storage values and domain types.
//!
//! | Codec | Domain type | Storage form |
//! |-------|-------------|--------------|
//! | [`Uint256Codec`] | `U256` | `NUMERIC(78, 0)` |
//! | [`AddressCodec`] | `H160` | `BYTEA` (20 bytes) |
//! | [`HashCodec`] | `H256` | `BYTEA` (32 bytes) |
//!
//! Every codec validates on both sides of the boundary: on the way in so
//! malformed input never reaches the database, and on the way out so schema
//! drift or storage corruption surfaces as a typed error instead of a
//! silently wrong value.

mod fixed_bytes;
mod scalar;
mod uint256;


pub use fixed_bytes::{to_hex, AddressCodec, FixedBytes, FixedBytesCodec, HashCodec};
pub use scalar::{BoolCodec, BytesCodec, JsonCodec, TimestampCodec};
pub use uint256::{Uint256Codec, UINT256_PRECISION};

use crate::column::ColumnValue;
use crate::errors::CodecError;

/// A bidirectional converter invoked at the storage-adapter boundary.
pub trait ColumnCodec {
    /// The strict domain type produced by `decode`.
    type Value;

    /// Convert a domain value into its storage representation.
    fn encode(&self, value: &Self::Value) -> Result<ColumnValue, CodecError>;

    /// Convert a stored value back into the domain type, validating it.
    fn decode(&self, column: &ColumnValue) -> Result<Self::Value, CodecError>;
}

/// Lifts a codec to optional values, mapping `None` to `NULL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nullable<C>(pub C);

impl<C: ColumnCodec> ColumnCodec for Nullable<C> {
    type Value = Option<C::Value>;

    fn encode(&self, value: &Self::Value) -> Result<ColumnValue, CodecError> {
        match value {
            Some(inner) => self.0.encode(inner),
            None => Ok(ColumnValue::Null),
        }
    }

    fn decode(&self, column: &ColumnValue) -> Result<Self::Value, CodecError> {
        match column {
            ColumnValue::Null => Ok(None),
            other => self.0.decode(other).map(Some),
        }
    }
}
