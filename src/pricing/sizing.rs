//! Leveraged position sizing.
//!
//! Turns a principal and a leverage multiplier into the amount to
//! flash-borrow and the collateral to post, keeping the borrow inside the
//! lending pool's loan-to-value limit:
//!
//! ```text
//! debt                     = principal * (leverage - 1)
//! total value              = principal * leverage
//! required collateral val  = debt / ltv_limit
//! collateral value         = max(total value, required collateral val)
//! collateral amount        = collateral value / collateral price
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amount::{mul_div, pow10, ratio, scale, Amount, Rounding};
use crate::types::{Decimals, EngineError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Market parameters the sizer prices against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingConfig {
    /// Maximum fraction of collateral value that may be borrowed.
    pub ltv_limit: Decimal,
    /// Debt-token units per one collateral token.
    pub collateral_price: Decimal,
    pub decimals: Decimals,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            ltv_limit: dec!(0.9),
            collateral_price: dec!(0.8),
            decimals: Decimals::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Human-unit sizing inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingRequest {
    pub principal: Decimal,
    pub leverage: Decimal,
    pub ltv_limit: Decimal,
    pub collateral_price: Decimal,
}

/// Sizing result. Value fields are in debt decimals, the collateral amount
/// in collateral decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sizing {
    pub leverage: Decimal,
    pub principal: Amount,
    /// Flash-borrow amount.
    pub debt: Amount,
    pub total_value: Amount,
    pub required_collateral_value: Amount,
    pub collateral_value: Amount,
    pub collateral_amount: Amount,
}

/// Size a leveraged position.
///
/// Runs entirely on scaled integers. Debt-denominated outputs truncate to
/// the debt token's precision. The collateral amount rounds up to the
/// collateral token's precision so that
/// `collateral_amount * price >= debt / ltv_limit` still holds after
/// scaling.
pub fn size_position(request: &SizingRequest, decimals: Decimals) -> Result<Sizing, EngineError> {
    let SizingRequest {
        principal,
        leverage,
        ltv_limit,
        collateral_price,
    } = *request;

    if principal <= Decimal::ZERO {
        return Err(EngineError::invalid("principal", format!("must be > 0, got {principal}")));
    }
    if leverage < Decimal::ONE {
        return Err(EngineError::invalid("leverage", format!("must be >= 1, got {leverage}")));
    }
    if ltv_limit <= Decimal::ZERO || ltv_limit >= Decimal::ONE {
        return Err(EngineError::invalid("ltv_limit", format!("must be in (0, 1), got {ltv_limit}")));
    }
    if collateral_price <= Decimal::ZERO {
        return Err(EngineError::invalid(
            "collateral_price",
            format!("must be > 0, got {collateral_price}"),
        ));
    }

    // Exact integer forms of the human inputs.
    let (lev_n, lev_d) = ratio(leverage, "leverage")?;
    let (extra_n, extra_d) = ratio(leverage - Decimal::ONE, "leverage")?;
    let (ltv_n, ltv_d) = ratio(ltv_limit, "ltv_limit")?;
    let (price_n, price_d) = ratio(collateral_price, "collateral_price")?;
    let debt_unit = pow10(decimals.debt)?;
    let collateral_unit = pow10(decimals.collateral)?;

    let principal_amount = Amount::from_decimal(principal, decimals.debt, Rounding::Down)?;
    let p = principal_amount.raw();

    let debt = mul_div(p, extra_n, extra_d)?;
    if leverage == Decimal::ONE && debt != 0 {
        return Err(EngineError::StateInconsistency(format!(
            "1x leverage produced non-zero debt {debt}"
        )));
    }
    let total_value = mul_div(p, lev_n, lev_d)?;
    let required_value = mul_div(debt, ltv_d, ltv_n)?;

    // Collateral for each bound, rounded up: V / price and D / (ltv * price).
    let for_total = scale(
        &[total_value, price_d, collateral_unit],
        &[price_n, debt_unit],
        Rounding::Up,
    )?;
    let for_required = scale(
        &[debt, ltv_d, price_d, collateral_unit],
        &[ltv_n, price_n, debt_unit],
        Rounding::Up,
    )?;
    let collateral = for_total.max(for_required);
    if collateral == 0 {
        return Err(EngineError::invalid(
            "collateral_amount",
            format!("{principal} x {leverage} rounds to zero collateral at {} decimals", decimals.collateral),
        ));
    }

    // Collateral posted must cover the borrow at the LTV limit.
    let supported = scale(
        &[collateral, price_n, ltv_n, debt_unit],
        &[price_d, ltv_d, collateral_unit],
        Rounding::Down,
    )?;
    if supported < debt {
        return Err(EngineError::StateInconsistency(format!(
            "collateral {collateral} at {collateral_price} supports only {supported} of debt {debt}"
        )));
    }

    let in_debt = |raw: u128| Amount::new(raw, decimals.debt);
    let sizing = Sizing {
        leverage,
        principal: principal_amount,
        debt: in_debt(debt),
        total_value: in_debt(total_value),
        required_collateral_value: in_debt(required_value),
        collateral_value: in_debt(total_value.max(required_value)),
        collateral_amount: Amount::new(collateral, decimals.collateral),
    };

    debug!(
        principal = %sizing.principal,
        leverage = %leverage,
        debt = %sizing.debt,
        collateral = %sizing.collateral_amount,
        "Position sized"
    );

    Ok(sizing)
}

/// Sizer bound to one market's parameters.
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Size `principal` at `leverage` against the configured LTV and price.
    pub fn size(&self, principal: Decimal, leverage: Decimal) -> Result<Sizing, EngineError> {
        size_position(
            &SizingRequest {
                principal,
                leverage,
                ltv_limit: self.config.ltv_limit,
                collateral_price: self.config.collateral_price,
            },
            self.config.decimals,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
