//! Shared types for the position engine.
//!
//! These types form the data model used across all modules. They are kept
//! free of collaborator and engine logic so that the pricing, engine and
//! ledger modules can all depend on them without circular references.

use alloy_primitives::U512;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::amount::Amount;

/// Decimal exponent of the collateral token in the reference deployment.
pub const COLLATERAL_DECIMALS: u32 = 18;

/// Decimal exponent of the debt token in the reference deployment.
pub const DEBT_DECIMALS: u32 = 6;

/// Fixed-point exponent of [`Position::effective_price`].
pub const PRICE_DECIMALS: u32 = 18;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque on-ledger address (vault, token, owner, router).
///
/// Stored lower-cased so that comparisons are case-insensitive, which is
/// how checksummed hex addresses must be compared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(EngineError::invalid("address", "must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(EngineError::invalid("address", format!("'{trimmed}' contains whitespace")));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A position's identity: the vault holding it plus its 1-based id.
///
/// Ordering is `(vault, id)`, which is the deterministic tie-break used
/// when ranking candidates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub vault: Address,
    pub id: u64,
}

impl PositionKey {
    pub fn new(vault: Address, id: u64) -> Self {
        Self { vault, id }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.vault, self.id)
    }
}

/// The (debt, collateral) token pair a take swaps between.
///
/// The taker pays in the debt token and receives the collateral token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub debt_token: Address,
    pub collateral_token: Address,
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.debt_token, self.collateral_token)
    }
}

/// Decimal exponents of the two tokens a vault deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimals {
    pub collateral: u32,
    pub debt: u32,
}

impl Default for Decimals {
    fn default() -> Self {
        Self {
            collateral: COLLATERAL_DECIMALS,
            debt: DEBT_DECIMALS,
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Borrow interest mode, using the lending pool's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InterestRateMode {
    Stable,
    Variable,
}

impl TryFrom<u8> for InterestRateMode {
    type Error = EngineError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(InterestRateMode::Stable),
            2 => Ok(InterestRateMode::Variable),
            other => Err(EngineError::invalid(
                "interest_rate_mode",
                format!("unknown mode {other} (expected 1 or 2)"),
            )),
        }
    }
}

impl From<InterestRateMode> for u8 {
    fn from(mode: InterestRateMode) -> Self {
        match mode {
            InterestRateMode::Stable => 1,
            InterestRateMode::Variable => 2,
        }
    }
}

impl fmt::Display for InterestRateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterestRateMode::Stable => write!(f, "Stable"),
            InterestRateMode::Variable => write!(f, "Variable"),
        }
    }
}

/// Cut-off for third-party takes. On the ledger `0` means "no deadline".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Deadline {
    None,
    At(i64),
}

impl TryFrom<i64> for Deadline {
    type Error = EngineError;

    fn try_from(ts: i64) -> Result<Self, Self::Error> {
        match ts {
            0 => Ok(Deadline::None),
            t if t > 0 => Ok(Deadline::At(t)),
            t => Err(EngineError::invalid("deadline", format!("negative timestamp {t}"))),
        }
    }
}

impl From<Deadline> for i64 {
    fn from(d: Deadline) -> Self {
        d.timestamp()
    }
}

impl Deadline {
    /// Ledger encoding: Unix seconds, or 0 when unset.
    pub fn timestamp(&self) -> i64 {
        match self {
            Deadline::None => 0,
            Deadline::At(t) => *t,
        }
    }

    /// True once a set deadline lies strictly in the past.
    pub fn has_passed(&self, now: i64) -> bool {
        matches!(self, Deadline::At(t) if *t < now)
    }

    /// True while third parties may still act: unset, or strictly in the future.
    pub fn is_open_at(&self, now: i64) -> bool {
        match self {
            Deadline::None => true,
            Deadline::At(t) => *t > now,
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::None => write!(f, "none"),
            Deadline::At(t) => match DateTime::<Utc>::from_timestamp(*t, 0) {
                Some(dt) => write!(f, "{}", dt.to_rfc3339()),
                None => write!(f, "{t}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A leveraged position as read from a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub key: PositionKey,
    pub collateral_token: Address,
    pub debt_token: Address,
    /// Collateral posted, in collateral decimals.
    pub collateral_amount: Amount,
    /// Amount flash-borrowed against the position, in debt decimals.
    pub debt_amount: Amount,
    /// Owner's own capital, in debt decimals.
    pub principal: Amount,
    pub interest_rate_mode: InterestRateMode,
    /// Profit a taker pays the owner, in debt decimals.
    pub expect_profit: Amount,
    pub deadline: Deadline,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] collateral={} debt={} principal={} profit={} mode={} deadline={}",
            self.key,
            self.collateral_amount,
            self.debt_amount,
            self.principal,
            self.expect_profit,
            self.interest_rate_mode,
            self.deadline,
        )
    }
}

impl Position {
    pub fn pair(&self) -> TokenPair {
        TokenPair {
            debt_token: self.debt_token.clone(),
            collateral_token: self.collateral_token.clone(),
        }
    }

    /// Expected profit per whole collateral token, in debt tokens scaled by
    /// [`PRICE_DECIMALS`]. Lower is a better deal for a taker. Zero when the
    /// position holds no collateral; saturates at `u128::MAX` raw.
    pub fn effective_price(&self) -> Amount {
        let (numerator, denominator) = self.price_terms();
        let scaled = numerator * unit(PRICE_DECIMALS) / denominator;
        Amount::new(u128::try_from(scaled).unwrap_or(u128::MAX), PRICE_DECIMALS)
    }

    /// Exact ordering of two positions by effective price.
    pub fn cmp_effective_price(&self, other: &Position) -> Ordering {
        let (a_num, a_den) = self.price_terms();
        let (b_num, b_den) = other.price_terms();
        (a_num * b_den).cmp(&(b_num * a_den))
    }

    /// Effective price as `profit * 10^dc / (collateral * 10^dd)`, in 512
    /// bits so that cross products never overflow.
    fn price_terms(&self) -> (U512, U512) {
        if self.collateral_amount.is_zero() {
            return (U512::ZERO, U512::from(1u8));
        }
        (
            U512::from(self.expect_profit.raw()) * unit(self.collateral_amount.decimals()),
            U512::from(self.collateral_amount.raw()) * unit(self.expect_profit.decimals()),
        )
    }
}

fn unit(decimals: u32) -> U512 {
    U512::from(10u8).pow(U512::from(decimals))
}

/// Everything a vault needs to open a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePositionRequest {
    pub collateral_token: Address,
    pub collateral_amount: Amount,
    pub debt_token: Address,
    /// Flash-borrow amount; zero at 1x leverage.
    pub debt_amount: Amount,
    pub principal: Amount,
    pub interest_rate_mode: InterestRateMode,
    pub expect_profit: Amount,
    pub deadline: Deadline,
}

// ---------------------------------------------------------------------------
// Take types
// ---------------------------------------------------------------------------

/// One aggregated take across any number of positions, handed to the
/// swap executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeInstruction {
    pub id: Uuid,
    /// Token the taker pays (the positions' debt token).
    pub token_in: Address,
    /// Token the taker receives (the positions' collateral token).
    pub token_out: Address,
    pub amount_in: Amount,
    pub min_amount_out: Amount,
    pub positions: Vec<PositionKey>,
}

impl fmt::Display for TakeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "take {} {} -> {} (min out {}) across {} position(s) [{}]",
            self.amount_in,
            self.token_in,
            self.token_out,
            self.min_amount_out,
            self.positions.len(),
            self.id,
        )
    }
}

/// Receipt returned by the swap executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub tx_hash: String,
    pub instruction_id: Uuid,
    pub amount_in: Amount,
    pub timestamp: DateTime<Utc>,
}

/// What a take of a given input would do to one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakePreview {
    pub debt_input: Amount,
    pub collateral_output: Amount,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors. Every variant names the precondition that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid input ({field}): {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("State inconsistency: {0}")]
    StateInconsistency(String),

    #[error("Insufficient allowance: need {needed}, have {available}")]
    InsufficientAllowance { needed: Amount, available: Amount },

    #[error("Position {vault}#{id} is not eligible for take: {reason}")]
    PositionNotEligible {
        vault: Address,
        id: u64,
        reason: String,
    },

    #[error("{caller} is not the owner of vault {vault}")]
    NotOwner { vault: Address, caller: Address },

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),
}

impl EngineError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable tag for API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInput { .. } => "invalid_input",
            EngineError::StateInconsistency(_) => "state_inconsistency",
            EngineError::InsufficientAllowance { .. } => "insufficient_allowance",
            EngineError::PositionNotEligible { .. } => "position_not_eligible",
            EngineError::NotOwner { .. } => "not_owner",
            EngineError::ExecutionFailure(_) => "execution_failure",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
