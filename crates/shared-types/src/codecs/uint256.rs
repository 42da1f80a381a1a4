//! Unsigned 256-bit integer codec.

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use primitive_types::U256;

use super::ColumnCodec;
use crate::column::ColumnValue;
use crate::errors::CodecError;

/// Decimal digits needed to hold `2^256 - 1` (78 digits, scale 0).
pub const UINT256_PRECISION: u32 = 78;

/// Codec for `NUMERIC(78, 0)` columns holding `uint256` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uint256Codec;

impl Uint256Codec {
    pub const NAME: &'static str = "uint256";

    /// Validate a loose integral input and narrow it to `U256`.
    ///
    /// Accepts `Integer` and `Numeric` values; anything else, including a
    /// numeric with a non-zero fractional part, is a `Type` error.
    pub fn coerce(&self, input: &ColumnValue) -> Result<U256, CodecError> {
        match input {
            ColumnValue::Integer(i) => Self::from_bigint(&BigInt::from(*i)),
            ColumnValue::Numeric(d) => Self::from_decimal(d),
            other => Err(CodecError::Type {
                codec: Self::NAME,
                expected: "integral number",
                found: other.type_name(),
            }),
        }
    }

    /// Narrow an arbitrary precision decimal to `U256`.
    pub fn from_decimal(value: &BigDecimal) -> Result<U256, CodecError> {
        let (digits, exponent) = value.normalized().as_bigint_and_exponent();
        if digits.is_zero() {
            return Ok(U256::zero());
        }
        if exponent > 0 {
            return Err(CodecError::Type {
                codec: Self::NAME,
                expected: "integral number",
                found: "fractional numeric",
            });
        }
        // Anything with more than 78 integral digits cannot fit.
        let shift = exponent.unsigned_abs();
        if shift > u64::from(UINT256_PRECISION) {
            return Err(Self::out_of_range(value.to_string()));
        }
        let integral = digits * BigInt::from(10u8).pow(shift as u32);
        Self::from_bigint(&integral)
    }

    /// Narrow an arbitrary precision integer to `U256`.
    pub fn from_bigint(value: &BigInt) -> Result<U256, CodecError> {
        let (sign, bytes) = value.to_bytes_be();
        if sign == Sign::Minus || bytes.len() > 32 {
            return Err(Self::out_of_range(value.to_string()));
        }
        Ok(U256::from_big_endian(&bytes))
    }

    /// Widen a `U256` to a scale-0 decimal without loss of precision.
    #[must_use]
    pub fn to_decimal(value: &U256) -> BigDecimal {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        BigDecimal::new(BigInt::from_bytes_be(Sign::Plus, &buf), 0)
    }

    fn out_of_range(value: String) -> CodecError {
        CodecError::Range {
            codec: Self::NAME,
            value,
        }
    }
}

impl ColumnCodec for Uint256Codec {
    type Value = U256;

    fn encode(&self, value: &U256) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Numeric(Self::to_decimal(value)))
    }

    fn decode(&self, column: &ColumnValue) -> Result<U256, CodecError> {
        self.coerce(column)
    }
}
