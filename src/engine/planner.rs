//! Position planning: from a sizing result to a created position.
//!
//! Drafting is pure. Submission and closing are gated on the caller owning
//! the vault; submission also needs the vault to be approved to pull the
//! principal, which [`PositionPlanner::approve_principal`] grants.

use std::sync::Arc;
use tracing::{info, warn};

use crate::amount::Amount;
use crate::ledger::{Ledger, Session, TokenAccounts};
use crate::pricing::profit::estimate_profit;
use crate::pricing::sizing::Sizing;
use crate::types::{
    Address, CreatePositionRequest, Deadline, Decimals, EngineError, InterestRateMode, TokenPair,
};

/// Build a creation request from a sizing result and the owner's choices.
///
/// `close_price` feeds the expected-profit estimate (absent means zero
/// profit, which keeps the position off the take list). `deadline`, when
/// given, must lie strictly after `now`.
pub fn draft_position(
    sizing: &Sizing,
    pair: &TokenPair,
    interest_rate_mode: InterestRateMode,
    close_price: Option<&str>,
    deadline: Option<i64>,
    now: i64,
    decimals: Decimals,
) -> Result<CreatePositionRequest, EngineError> {
    let deadline = match deadline {
        None => Deadline::None,
        Some(t) if t > now => Deadline::At(t),
        Some(t) => {
            return Err(EngineError::invalid(
                "deadline",
                format!("{t} is not after the current time {now}"),
            ));
        }
    };

    let expect_profit = estimate_profit(
        &sizing.collateral_amount,
        &sizing.debt,
        close_price,
        decimals,
    )?;

    Ok(CreatePositionRequest {
        collateral_token: pair.collateral_token.clone(),
        collateral_amount: sizing.collateral_amount,
        debt_token: pair.debt_token.clone(),
        debt_amount: sizing.debt,
        principal: sizing.principal,
        interest_rate_mode,
        expect_profit,
        deadline,
    })
}

/// Submits and closes positions on behalf of the session's caller.
pub struct PositionPlanner {
    ledger: Arc<dyn Ledger>,
    accounts: Arc<dyn TokenAccounts>,
    session: Arc<dyn Session>,
}

impl PositionPlanner {
    pub fn new(ledger: Arc<dyn Ledger>, accounts: Arc<dyn TokenAccounts>, session: Arc<dyn Session>) -> Self {
        Self {
            ledger,
            accounts,
            session,
        }
    }

    /// Open `request` in `vault`. Returns the new position id.
    pub async fn submit(&self, vault: &Address, request: &CreatePositionRequest) -> Result<u64, EngineError> {
        let caller = self.authorised_owner(vault).await?;

        // The vault pulls the principal from the caller.
        let allowance = self
            .accounts
            .allowance(&request.debt_token, &caller, vault)
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("allowance read failed: {e:#}")))?;
        if allowance.checked_cmp(&request.principal, "principal")?.is_lt() {
            return Err(EngineError::InsufficientAllowance {
                needed: request.principal,
                available: allowance,
            });
        }

        let id = self.ledger.create_position(vault, request).await.map_err(|e| {
            warn!(vault = %vault, error = %e, "Position creation failed");
            EngineError::ExecutionFailure(format!("{e:#}"))
        })?;

        info!(
            vault = %vault,
            id,
            collateral = %request.collateral_amount,
            debt = %request.debt_amount,
            profit = %request.expect_profit,
            deadline = %request.deadline,
            "Position created"
        );
        Ok(id)
    }

    /// Close position `id` in `vault`. Owners may close at any time.
    pub async fn close(&self, vault: &Address, id: u64) -> Result<(), EngineError> {
        self.authorised_owner(vault).await?;

        self.ledger.close_position(vault, id).await.map_err(|e| {
            warn!(vault = %vault, id, error = %e, "Position close failed");
            EngineError::ExecutionFailure(format!("{e:#}"))
        })?;

        info!(vault = %vault, id, "Position closed");
        Ok(())
    }

    /// Let `vault` pull up to `amount` of `token` from the caller.
    pub async fn approve_principal(&self, vault: &Address, token: &Address, amount: &Amount) -> Result<(), EngineError> {
        if amount.is_zero() {
            return Err(EngineError::invalid("amount", "must be > 0"));
        }
        self.signer()?;

        self.accounts
            .approve(token, vault, amount)
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("approve failed: {e:#}")))?;
        info!(vault = %vault, token = %token, amount = %amount, "Principal approved");
        Ok(())
    }

    fn signer(&self) -> Result<Address, EngineError> {
        if !self.session.can_sign() {
            return Err(EngineError::ExecutionFailure(
                "session is not authorised to sign".to_string(),
            ));
        }
        Ok(self.session.address())
    }

    async fn authorised_owner(&self, vault: &Address) -> Result<Address, EngineError> {
        let caller = self.signer()?;
        let owner = self
            .ledger
            .owner(vault)
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("owner read failed: {e:#}")))?;
        if owner != caller {
            return Err(EngineError::NotOwner {
                vault: vault.clone(),
                caller,
            });
        }
        Ok(caller)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
