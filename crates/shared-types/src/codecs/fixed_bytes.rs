//! Fixed-width binary codec for addresses and hashes.

use std::marker::PhantomData;

use primitive_types::{H160, H256};

use super::ColumnCodec;
use crate::column::ColumnValue;
use crate::errors::CodecError;

/// A fixed-width byte string stored in a binary column.
pub trait FixedBytes: Sized {
    /// Exact width in bytes.
    const WIDTH: usize;
    /// Codec name reported in errors.
    const NAME: &'static str;

    /// Build from a slice already checked to be `WIDTH` bytes long.
    fn from_exact(bytes: &[u8]) -> Self;

    fn as_slice(&self) -> &[u8];
}

impl FixedBytes for H160 {
    const WIDTH: usize = 20;
    const NAME: &'static str = "address";

    fn from_exact(bytes: &[u8]) -> Self {
        H160::from_slice(bytes)
    }

    fn as_slice(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl FixedBytes for H256 {
    const WIDTH: usize = 32;
    const NAME: &'static str = "hash";

    fn from_exact(bytes: &[u8]) -> Self {
        H256::from_slice(bytes)
    }

    fn as_slice(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Codec for binary columns of exactly `T::WIDTH` bytes.
pub struct FixedBytesCodec<T>(PhantomData<T>);

/// 20-byte Ethereum address codec.
pub type AddressCodec = FixedBytesCodec<H160>;

/// 32-byte hash codec.
pub type HashCodec = FixedBytesCodec<H256>;

impl<T: FixedBytes> FixedBytesCodec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }

    /// Validate a loose input: raw bytes or a hex string (`0x` optional).
    pub fn coerce(&self, input: &ColumnValue) -> Result<T, CodecError> {
        match input {
            ColumnValue::Bytes(bytes) => self.from_bytes(bytes),
            ColumnValue::Text(text) => self.from_hex(text),
            other => Err(CodecError::Type {
                codec: T::NAME,
                expected: "bytes or hex string",
                found: other.type_name(),
            }),
        }
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if bytes.len() != T::WIDTH {
            return Err(CodecError::Length {
                codec: T::NAME,
                expected: T::WIDTH,
                actual: bytes.len(),
            });
        }
        Ok(T::from_exact(bytes))
    }

    pub fn from_hex(&self, text: &str) -> Result<T, CodecError> {
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        let bytes = hex::decode(digits).map_err(|e| CodecError::Format {
            codec: T::NAME,
            reason: e.to_string(),
        })?;
        self.from_bytes(&bytes)
    }
}

impl<T: FixedBytes> ColumnCodec for FixedBytesCodec<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Bytes(value.as_slice().to_vec()))
    }

    /// Stored values must already be binary; hex text here means schema drift.
    fn decode(&self, column: &ColumnValue) -> Result<T, CodecError> {
        match column {
            ColumnValue::Bytes(bytes) => self.from_bytes(bytes),
            other => Err(CodecError::Type {
                codec: T::NAME,
                expected: "bytes",
                found: other.type_name(),
            }),
        }
    }
}

impl<T> Clone for FixedBytesCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FixedBytesCodec<T> {}

impl<T> Default for FixedBytesCodec<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> std::fmt::Debug for FixedBytesCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBytesCodec").finish()
    }
}

/// `0x`-prefixed lowercase hex, for logs and wire payloads.
#[must_use]
pub fn to_hex<T: FixedBytes>(value: &T) -> String {
    format!("0x{}", hex::encode(value.as_slice()))
}
