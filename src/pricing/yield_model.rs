//! Leveraged yield projection.
//!
//! Simple carry model for a looped position: the collateral's base yield is
//! earned on the whole exposure, the borrow rate is paid on the borrowed
//! part. Rates are annual percentages.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::EngineError;

/// Decimal exponent of lending-pool "ray" rates.
pub const RAY_DECIMALS: u32 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldProjection {
    /// `base_yield * leverage`
    pub gross: Decimal,
    /// `borrow_rate * (leverage - 1)`
    pub borrow_cost: Decimal,
    pub net: Decimal,
}

pub fn project_yield(
    base_yield_pct: Decimal,
    leverage: Decimal,
    borrow_rate_pct: Decimal,
) -> Result<YieldProjection, EngineError> {
    if leverage < Decimal::ONE {
        return Err(EngineError::invalid("leverage", format!("must be >= 1, got {leverage}")));
    }
    if borrow_rate_pct.is_sign_negative() && !borrow_rate_pct.is_zero() {
        return Err(EngineError::invalid(
            "borrow_rate",
            format!("must not be negative, got {borrow_rate_pct}"),
        ));
    }

    let gross = base_yield_pct
        .checked_mul(leverage)
        .ok_or_else(|| EngineError::invalid("base_yield", "value out of range"))?;
    let borrow_cost = borrow_rate_pct
        .checked_mul(leverage - Decimal::ONE)
        .ok_or_else(|| EngineError::invalid("borrow_rate", "value out of range"))?;

    Ok(YieldProjection {
        gross,
        borrow_cost,
        net: gross - borrow_cost,
    })
}

/// Convert a ray-scaled annual rate (1e27 = 100%) to a percentage.
pub fn ray_to_percent(ray: u128) -> Result<Decimal, EngineError> {
    let raw = i128::try_from(ray).map_err(|_| EngineError::invalid("rate", "ray value out of range"))?;
    let fraction = Decimal::try_from_i128_with_scale(raw, RAY_DECIMALS)
        .map_err(|e| EngineError::invalid("rate", format!("ray value {ray} out of range: {e}")))?;
    Ok(fraction * dec!(100))
}
