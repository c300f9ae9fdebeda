//! Expected-profit estimation at a hypothetical close price.
//!
//! All arithmetic is on raw integers across the two decimal bases:
//!
//! ```text
//! value_in_debt = collateral_amount * close_price / 10^collateral_decimals
//! expect_profit = max(0, value_in_debt - debt_amount)
//! ```
//!
//! `close_price` is debt-token smallest units per one whole collateral
//! token. The division truncates; it never rounds up or to nearest.

use serde::{Deserialize, Serialize};

use crate::amount::{mul_div, pow10, Amount};
use crate::types::{Decimals, EngineError};

/// Profit breakdown at one close price, both in debt decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitEstimate {
    pub value_in_debt: Amount,
    pub expect_profit: Amount,
}

/// Parse an optional close-price string into debt-token units.
///
/// `None` and blank strings both mean "no close price".
pub fn parse_close_price(text: Option<&str>, decimals: Decimals) -> Result<Option<Amount>, EngineError> {
    match text.map(str::trim) {
        None | Some("") => Ok(None),
        Some(t) => Amount::parse(t, decimals.debt).map(Some).map_err(|e| match e {
            EngineError::InvalidInput { reason, .. } => EngineError::invalid("close_price", reason),
            other => other,
        }),
    }
}

/// Value the collateral at `close_price` and subtract the debt, floored at zero.
pub fn profit_at_price(
    collateral_amount: &Amount,
    debt_amount: &Amount,
    close_price: &Amount,
    decimals: Decimals,
) -> Result<ProfitEstimate, EngineError> {
    collateral_amount.ensure_decimals(decimals.collateral, "collateral_amount")?;
    debt_amount.ensure_decimals(decimals.debt, "debt_amount")?;
    close_price.ensure_decimals(decimals.debt, "close_price")?;

    let value = mul_div(
        collateral_amount.raw(),
        close_price.raw(),
        pow10(decimals.collateral)?,
    )?;
    let value_in_debt = Amount::new(value, decimals.debt);

    Ok(ProfitEstimate {
        value_in_debt,
        expect_profit: value_in_debt.saturating_sub(debt_amount)?,
    })
}

/// Expected profit for a position if it were closed at `close_price`.
///
/// Returns zero when no close price is given.
pub fn estimate_profit(
    collateral_amount: &Amount,
    debt_amount: &Amount,
    close_price: Option<&str>,
    decimals: Decimals,
) -> Result<Amount, EngineError> {
    match parse_close_price(close_price, decimals)? {
        Some(price) => {
            profit_at_price(collateral_amount, debt_amount, &price, decimals).map(|e| e.expect_profit)
        }
        None => {
            collateral_amount.ensure_decimals(decimals.collateral, "collateral_amount")?;
            debt_amount.ensure_decimals(decimals.debt, "debt_amount")?;
            Ok(Amount::zero(decimals.debt))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
