//! Take execution.
//!
//! Turns a selection of scanned candidates into one aggregated take
//! instruction and hands it to the swap executor. Every precondition is
//! checked before anything is submitted; a failed swap leaves the selection
//! as it was so the caller can retry after fixing the cause.

use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::eligibility::evaluate_position;
use super::scanner::CandidateBook;
use crate::amount::Amount;
use crate::ledger::{Ledger, Session, SwapExecutor, TokenAccounts};
use crate::types::{
    Address, Decimals, EngineError, PositionKey, SwapReceipt, TakeInstruction, TakePreview, TokenPair,
};

// ---------------------------------------------------------------------------
// Instruction building
// ---------------------------------------------------------------------------

/// Validate a take and build its instruction.
///
/// Checks run in order: non-empty selection, non-zero amount, amount
/// decimals, then allowance. `take_amount` is in debt decimals and
/// `min_amount_out` in collateral decimals. `allowance` is what the taker
/// has approved the router to spend in the debt token.
pub fn prepare_take(
    pair: &TokenPair,
    selection: &[PositionKey],
    take_amount: &Amount,
    min_amount_out: &Amount,
    allowance: &Amount,
    decimals: Decimals,
) -> Result<TakeInstruction, EngineError> {
    if selection.is_empty() {
        return Err(EngineError::invalid("selection", "no positions selected"));
    }
    if take_amount.is_zero() {
        return Err(EngineError::invalid("take_amount", "must be > 0"));
    }
    take_amount.ensure_decimals(decimals.debt, "take_amount")?;
    min_amount_out.ensure_decimals(decimals.collateral, "min_amount_out")?;
    if allowance.checked_cmp(take_amount, "allowance")?.is_lt() {
        return Err(EngineError::InsufficientAllowance {
            needed: *take_amount,
            available: *allowance,
        });
    }

    Ok(TakeInstruction {
        id: Uuid::new_v4(),
        token_in: pair.debt_token.clone(),
        token_out: pair.collateral_token.clone(),
        amount_in: *take_amount,
        min_amount_out: *min_amount_out,
        positions: selection.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Result of a successful take.
#[derive(Debug, Clone)]
pub struct TakeOutcome {
    pub instruction: TakeInstruction,
    pub receipt: SwapReceipt,
    pub dry_run: bool,
}

/// The taker's debt-token funds, as seen by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakerFunds {
    pub balance: Amount,
    pub allowance: Amount,
}

/// Owns the taker's selection and drives a take through the swap executor.
pub struct TakeCoordinator {
    ledger: Arc<dyn Ledger>,
    swap: Arc<dyn SwapExecutor>,
    accounts: Arc<dyn TokenAccounts>,
    session: Arc<dyn Session>,
    book: Arc<CandidateBook>,
    /// Spender the allowance is checked against.
    router: Address,
    selection: Vec<PositionKey>,
    dry_run: bool,
}

impl TakeCoordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        swap: Arc<dyn SwapExecutor>,
        accounts: Arc<dyn TokenAccounts>,
        session: Arc<dyn Session>,
        book: Arc<CandidateBook>,
        router: Address,
        dry_run: bool,
    ) -> Self {
        Self {
            ledger,
            swap,
            accounts,
            session,
            book,
            router,
            selection: Vec::new(),
            dry_run,
        }
    }

    pub fn selection(&self) -> &[PositionKey] {
        &self.selection
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Add `key` to the selection, or remove it if already selected.
    ///
    /// Returns `true` when the key is selected afterwards. Only positions in
    /// the latest published scan can be added.
    pub async fn toggle(&mut self, key: PositionKey) -> Result<bool, EngineError> {
        if let Some(idx) = self.selection.iter().position(|k| *k == key) {
            self.selection.remove(idx);
            debug!(position = %key, "Deselected position");
            return Ok(false);
        }

        let listed = match self.book.latest().await {
            Some(report) => report.candidate(&key).is_some(),
            None => false,
        };
        if !listed {
            return Err(EngineError::PositionNotEligible {
                vault: key.vault,
                id: key.id,
                reason: "not in the latest scan".to_string(),
            });
        }

        debug!(position = %key, "Selected position");
        self.selection.push(key);
        Ok(true)
    }

    /// Take every selected position in one swap.
    ///
    /// Each selected position is re-checked against the latest scan at `now`
    /// and all must share one token pair. On success the selection is
    /// cleared; callers should rescan and re-read [`funds`](Self::funds).
    pub async fn execute(
        &mut self,
        take_amount: Amount,
        min_amount_out: Amount,
        now: i64,
    ) -> Result<TakeOutcome, EngineError> {
        if self.selection.is_empty() {
            return Err(EngineError::invalid("selection", "no positions selected"));
        }
        if take_amount.is_zero() {
            return Err(EngineError::invalid("take_amount", "must be > 0"));
        }

        let (pair, decimals) = self.validated_pair(now).await?;
        let caller = self.signer()?;

        let allowance = self
            .accounts
            .allowance(&pair.debt_token, &caller, &self.router)
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("allowance read failed: {e:#}")))?;

        let instruction = prepare_take(
            &pair,
            &self.selection,
            &take_amount,
            &min_amount_out,
            &allowance,
            decimals,
        )?;

        let receipt = if self.dry_run {
            info!(instruction = %instruction, "[DRY RUN] Would execute take");
            SwapReceipt::dry_run(&instruction)
        } else {
            info!(instruction = %instruction, caller = %caller, "Executing take");
            self.swap.execute(&instruction).await.map_err(|e| {
                warn!(id = %instruction.id, error = %e, "Swap execution failed");
                EngineError::ExecutionFailure(format!("{e:#}"))
            })?
        };

        info!(
            id = %instruction.id,
            tx = %receipt.tx_hash,
            positions = instruction.positions.len(),
            amount_in = %instruction.amount_in,
            "Take complete"
        );

        self.selection.clear();

        Ok(TakeOutcome {
            instruction,
            receipt,
            dry_run: self.dry_run,
        })
    }

    /// Approve the router to spend `amount` of the caller's `token`.
    ///
    /// Skipped in dry-run mode.
    pub async fn approve_router(&self, token: &Address, amount: &Amount) -> Result<(), EngineError> {
        if amount.is_zero() {
            return Err(EngineError::invalid("amount", "must be > 0"));
        }
        self.signer()?;

        if self.dry_run {
            info!(token = %token, amount = %amount, router = %self.router, "[DRY RUN] Would approve router");
            return Ok(());
        }
        self.accounts
            .approve(token, &self.router, amount)
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("approve failed: {e:#}")))?;
        info!(token = %token, amount = %amount, router = %self.router, "Router approved");
        Ok(())
    }

    /// What a take of `amount` would do to one position.
    pub async fn preview(&self, key: &PositionKey, amount: &Amount) -> anyhow::Result<TakePreview> {
        self.ledger
            .preview_take(&key.vault, key.id, amount)
            .await
            .with_context(|| format!("Failed to preview take of {amount} from {key}"))
    }

    /// The caller's balance and router allowance in `token`.
    pub async fn funds(&self, token: &Address) -> anyhow::Result<TakerFunds> {
        let caller = self.session.address();
        let (balance, allowance) = tokio::join!(
            self.accounts.balance(token, &caller),
            self.accounts.allowance(token, &caller, &self.router),
        );
        Ok(TakerFunds {
            balance: balance.context("Failed to read balance")?,
            allowance: allowance.context("Failed to read allowance")?,
        })
    }

    fn signer(&self) -> Result<Address, EngineError> {
        if !self.session.can_sign() {
            return Err(EngineError::ExecutionFailure(
                "session is not authorised to sign".to_string(),
            ));
        }
        Ok(self.session.address())
    }

    /// Re-check the selection against the latest scan and return its common
    /// pair with the pair's decimals.
    async fn validated_pair(&self, now: i64) -> Result<(TokenPair, Decimals), EngineError> {
        let report = self.book.latest().await;
        let mut pair: Option<(TokenPair, Decimals)> = None;

        for key in &self.selection {
            let candidate = report
                .as_ref()
                .and_then(|r| r.candidate(key))
                .ok_or_else(|| EngineError::PositionNotEligible {
                    vault: key.vault.clone(),
                    id: key.id,
                    reason: "not in the latest scan".to_string(),
                })?;

            let eligibility = evaluate_position(&candidate.position, now);
            if let Some(reason) = eligibility.rejection() {
                return Err(EngineError::PositionNotEligible {
                    vault: key.vault.clone(),
                    id: key.id,
                    reason: reason.to_string(),
                });
            }

            let this_pair = candidate.position.pair();
            match &pair {
                None => {
                    let decimals = Decimals {
                        collateral: candidate.position.collateral_amount.decimals(),
                        debt: candidate.position.debt_amount.decimals(),
                    };
                    pair = Some((this_pair, decimals));
                }
                Some((p, _)) if *p == this_pair => {}
                Some((p, _)) => {
                    return Err(EngineError::invalid(
                        "selection",
                        format!("mixed token pairs: {p} and {this_pair}"),
                    ));
                }
            }
        }

        pair.ok_or_else(|| EngineError::invalid("selection", "no positions selected"))
    }
}

// ---------------------------------------------------------------------------
// SwapReceipt helpers
// ---------------------------------------------------------------------------

impl SwapReceipt {
    /// Create a dry-run receipt (nothing submitted).
    pub fn dry_run(instruction: &TakeInstruction) -> Self {
        Self {
            tx_hash: format!("dry-run-{}", Uuid::new_v4()),
            instruction_id: instruction.id,
            amount_in: instruction.amount_in,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
