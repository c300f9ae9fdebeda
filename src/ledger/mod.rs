//! Collaborator seams.
//!
//! Defines the traits the engine talks to and provides one implementation:
//! - `GatewayClient`: JSON HTTP client for a ledger gateway that fronts the
//!   vault contracts, the swap router and the token contracts.
//!
//! Test doubles come from `mockall` (unit tests) and an in-memory ledger
//! (integration tests).

pub mod gateway;

use anyhow::Result;
use async_trait::async_trait;

use crate::amount::Amount;
use crate::types::{Address, CreatePositionRequest, Position, SwapReceipt, TakeInstruction, TakePreview};

/// A set of vaults holding positions.
///
/// Position ids within a vault are 1-based and contiguous, so
/// `1..=total_positions(vault)` enumerates every position.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn total_positions(&self, vault: &Address) -> Result<u64>;

    async fn position_by_id(&self, vault: &Address, id: u64) -> Result<Position>;

    async fn owner(&self, vault: &Address) -> Result<Address>;

    /// Open a position. Returns the new position's id.
    async fn create_position(&self, vault: &Address, request: &CreatePositionRequest) -> Result<u64>;

    async fn close_position(&self, vault: &Address, id: u64) -> Result<()>;

    /// What taking `amount` of debt input from one position would yield.
    async fn preview_take(&self, vault: &Address, id: u64, amount: &Amount) -> Result<TakePreview>;
}

/// Performs the token exchange for an aggregated take.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn execute(&self, instruction: &TakeInstruction) -> Result<SwapReceipt>;
}

/// Token balances and spending approvals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenAccounts: Send + Sync {
    async fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Result<Amount>;

    async fn balance(&self, token: &Address, holder: &Address) -> Result<Amount>;

    /// Let `spender` move up to `amount` of the caller's `token`, replacing
    /// any earlier approval.
    async fn approve(&self, token: &Address, spender: &Address, amount: &Amount) -> Result<()>;
}

/// The connected caller.
#[cfg_attr(test, mockall::automock)]
pub trait Session: Send + Sync {
    fn address(&self) -> Address;

    /// Whether the caller is authorised to sign transactions right now.
    fn can_sign(&self) -> bool;
}
