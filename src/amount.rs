//! Scaled-integer token amounts.
//!
//! Every monetary quantity handled by the engine is an [`Amount`]: a count of
//! the token's smallest unit together with the token's decimal exponent
//! (18 for the collateral token, 6 for the debt token in the reference
//! deployment). Arithmetic multiplies before it divides, with 256-bit
//! intermediates, and rounds in an explicit direction. Human-unit values
//! (`rust_decimal::Decimal`) only appear at the edges: user input and display.

use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::types::EngineError;

/// Largest decimal exponent an [`Amount`] may carry (the `Decimal` scale limit).
pub const MAX_DECIMALS: u32 = 28;

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// `10^decimals` as a `u128`.
pub fn pow10(decimals: u32) -> Result<u128, EngineError> {
    10u128
        .checked_pow(decimals)
        .ok_or_else(|| EngineError::invalid("decimals", format!("10^{decimals} overflows 128 bits")))
}

/// Direction of an integer division's remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Truncate toward zero.
    Down,
    /// Any remainder bumps the quotient by one.
    Up,
}

/// `Π numerators / Π denominators`, rounded as asked.
///
/// Products are formed in 256 bits before dividing; only a product that
/// overflows 256 bits, or a quotient wider than 128 bits, is an error.
pub fn scale(numerators: &[u128], denominators: &[u128], rounding: Rounding) -> Result<u128, EngineError> {
    let product = |factors: &[u128]| {
        factors.iter().try_fold(U256::from(1u128), |acc, f| acc.checked_mul(U256::from(*f)))
    };
    let numerator = product(numerators)
        .ok_or_else(|| EngineError::invalid("amount", "product overflows 256 bits"))?;
    let denominator = product(denominators)
        .ok_or_else(|| EngineError::invalid("denominator", "product overflows 256 bits"))?;
    if denominator.is_zero() {
        return Err(EngineError::invalid("denominator", "division by zero"));
    }

    let mut quotient = numerator / denominator;
    if rounding == Rounding::Up && !(numerator % denominator).is_zero() {
        quotient += U256::from(1u128);
    }
    u128::try_from(quotient).map_err(|_| EngineError::invalid("amount", "result overflows 128 bits"))
}

/// `(a * b) / denominator`, multiplying first and truncating the quotient.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, EngineError> {
    scale(&[a, b], &[denominator], Rounding::Down)
}

/// `(a * b) / denominator`, multiplying first and rounding the quotient up.
pub fn mul_div_ceil(a: u128, b: u128, denominator: u128) -> Result<u128, EngineError> {
    scale(&[a, b], &[denominator], Rounding::Up)
}

/// Exact `(numerator, denominator)` form of a non-negative decimal.
pub fn ratio(value: Decimal, field: &str) -> Result<(u128, u128), EngineError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EngineError::invalid(field, format!("{value} is negative")));
    }
    let value = value.normalize();
    Ok((value.mantissa().unsigned_abs(), pow10(value.scale())?))
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A non-negative token amount in smallest units, tagged with its decimals.
///
/// Serialized as `{ "raw": "<integer>", "decimals": <n> }` so that 128-bit
/// values survive JSON consumers that only have doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AmountRepr", into = "AmountRepr")]
pub struct Amount {
    raw: u128,
    decimals: u32,
}

#[derive(Serialize, Deserialize)]
struct AmountRepr {
    raw: String,
    decimals: u32,
}

impl TryFrom<AmountRepr> for Amount {
    type Error = EngineError;

    fn try_from(repr: AmountRepr) -> Result<Self, Self::Error> {
        if repr.decimals > MAX_DECIMALS {
            return Err(EngineError::invalid(
                "decimals",
                format!("{} exceeds the maximum of {MAX_DECIMALS}", repr.decimals),
            ));
        }
        let raw = repr.raw.trim().parse::<u128>().map_err(|e| {
            EngineError::invalid("raw", format!("'{}' is not an unsigned integer: {e}", repr.raw))
        })?;
        Ok(Self::new(raw, repr.decimals))
    }
}

impl From<Amount> for AmountRepr {
    fn from(amount: Amount) -> Self {
        Self {
            raw: amount.raw.to_string(),
            decimals: amount.decimals,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Ok(value) => write!(f, "{}", value.normalize()),
            Err(_) => write!(f, "{}e-{}", self.raw, self.decimals),
        }
    }
}

impl Amount {
    pub const fn new(raw: u128, decimals: u32) -> Self {
        Self { raw, decimals }
    }

    pub const fn zero(decimals: u32) -> Self {
        Self::new(0, decimals)
    }

    pub fn raw(&self) -> u128 {
        self.raw
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Parse a human-unit decimal string ("0.85", "100") into smallest units.
    ///
    /// Rejects negatives, garbage, and strings with more fractional digits
    /// than `decimals` can hold. Blank input is an error; callers that treat
    /// blank as "absent" must check before calling.
    pub fn parse(text: &str, decimals: u32) -> Result<Self, EngineError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::invalid("amount", "empty string"));
        }

        let value = Decimal::from_str_exact(trimmed).map_err(|e| {
            EngineError::invalid("amount", format!("'{trimmed}' is not a decimal number: {e}"))
        })?;

        if value.normalize().scale() > decimals {
            return Err(EngineError::invalid(
                "amount",
                format!("'{trimmed}' has more than {decimals} fractional digits"),
            ));
        }

        Self::from_decimal(value, decimals, Rounding::Down)
    }

    /// Convert a human-unit `Decimal` into smallest units.
    pub fn from_decimal(value: Decimal, decimals: u32, rounding: Rounding) -> Result<Self, EngineError> {
        if decimals > MAX_DECIMALS {
            return Err(EngineError::invalid(
                "decimals",
                format!("{decimals} exceeds the maximum of {MAX_DECIMALS}"),
            ));
        }
        let (numerator, denominator) = ratio(value, "amount")?;
        let raw = scale(&[numerator, pow10(decimals)?], &[denominator], rounding)?;
        Ok(Self::new(raw, decimals))
    }

    /// Exact human-unit view of this amount.
    pub fn to_decimal(&self) -> Result<Decimal, EngineError> {
        let raw = i128::try_from(self.raw)
            .map_err(|_| EngineError::invalid("amount", "raw value exceeds the decimal range"))?;
        Decimal::try_from_i128_with_scale(raw, self.decimals)
            .map_err(|e| EngineError::invalid("amount", format!("{self:?} has no decimal form: {e}")))
    }

    /// Fail unless this amount carries the expected decimal exponent.
    pub fn ensure_decimals(&self, expected: u32, field: &str) -> Result<(), EngineError> {
        if self.decimals != expected {
            return Err(EngineError::invalid(
                field,
                format!("expected {expected} decimals, got {}", self.decimals),
            ));
        }
        Ok(())
    }

    /// Compare two amounts of the same decimal base.
    pub fn checked_cmp(&self, other: &Amount, field: &str) -> Result<Ordering, EngineError> {
        other.ensure_decimals(self.decimals, field)?;
        Ok(self.raw.cmp(&other.raw))
    }

    /// `max(0, self - other)` for amounts of the same decimal base.
    pub fn saturating_sub(&self, other: &Amount) -> Result<Amount, EngineError> {
        other.ensure_decimals(self.decimals, "amount")?;
        Ok(Self::new(self.raw.saturating_sub(other.raw), self.decimals))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
