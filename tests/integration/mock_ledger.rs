//! In-memory ledger for integration testing.
//!
//! Implements every collaborator trait over shared in-memory state: vaults
//! with owners and positions, token allowances and balances, and a swap
//! router that marks taken positions. Failures and latency can be injected
//! per vault.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use takeover::amount::Amount;
use takeover::ledger::{Ledger, Session, SwapExecutor, TokenAccounts};
use takeover::types::*;

#[derive(Default)]
struct VaultState {
    owner: Option<Address>,
    positions: Vec<Position>,
}

#[derive(Default)]
struct State {
    vaults: HashMap<Address, VaultState>,
    allowances: HashMap<(Address, Address, Address), Amount>,
    balances: HashMap<(Address, Address), Amount>,
    swaps: Vec<TakeInstruction>,
    failing_vaults: HashSet<Address>,
    delays: HashMap<Address, Duration>,
    swap_error: Option<String>,
}

/// A deterministic in-memory ledger, swap router and token registry.
#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<State>>,
    caller: Address,
    can_sign: bool,
}

pub fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

impl MemoryLedger {
    pub fn new(caller: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            caller: addr(caller),
            can_sign: true,
        }
    }

    /// A view of the same ledger acting as a different caller.
    pub fn as_caller(&self, caller: &str) -> Self {
        Self {
            state: self.state.clone(),
            caller: addr(caller),
            can_sign: self.can_sign,
        }
    }

    pub fn add_vault(&self, vault: &str, owner: &str) {
        let mut s = self.state.lock().unwrap();
        s.vaults.entry(addr(vault)).or_default().owner = Some(addr(owner));
    }

    /// Append a position directly, bypassing ownership checks. Returns its id.
    pub fn insert_position(&self, vault: &str, build: impl FnOnce(PositionKey) -> Position) -> u64 {
        let mut s = self.state.lock().unwrap();
        let v = s.vaults.entry(addr(vault)).or_default();
        let id = v.positions.len() as u64 + 1;
        v.positions.push(build(PositionKey::new(addr(vault), id)));
        id
    }

    pub fn set_allowance(&self, token: &str, owner: &str, spender: &str, amount: Amount) {
        let mut s = self.state.lock().unwrap();
        s.allowances.insert((addr(token), addr(owner), addr(spender)), amount);
    }

    pub fn set_balance(&self, token: &str, holder: &str, amount: Amount) {
        let mut s = self.state.lock().unwrap();
        s.balances.insert((addr(token), addr(holder)), amount);
    }

    /// Make every read of `vault` fail.
    pub fn fail_vault(&self, vault: &str) {
        self.state.lock().unwrap().failing_vaults.insert(addr(vault));
    }

    /// Delay every read of `vault`.
    pub fn slow_vault(&self, vault: &str, delay: Duration) {
        self.state.lock().unwrap().delays.insert(addr(vault), delay);
    }

    pub fn fail_swaps(&self, msg: &str) {
        self.state.lock().unwrap().swap_error = Some(msg.to_string());
    }

    pub fn swaps(&self) -> Vec<TakeInstruction> {
        self.state.lock().unwrap().swaps.clone()
    }

    pub fn position(&self, vault: &str, id: u64) -> Option<Position> {
        let s = self.state.lock().unwrap();
        s.vaults
            .get(&addr(vault))
            .and_then(|v| v.positions.get((id as usize).checked_sub(1)?))
            .cloned()
    }

    /// Check injected failure and latency for `vault`.
    async fn touch(&self, vault: &Address) -> Result<()> {
        let delay = {
            let s = self.state.lock().unwrap();
            if s.failing_vaults.contains(vault) {
                bail!("vault {vault} unreachable");
            }
            s.delays.get(vault).copied()
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        Ok(())
    }

    fn with_position<T>(&self, vault: &Address, id: u64, f: impl FnOnce(&mut Position) -> T) -> Result<T> {
        let mut s = self.state.lock().unwrap();
        let v = s.vaults.get_mut(vault).ok_or_else(|| anyhow!("unknown vault {vault}"))?;
        let idx = (id as usize)
            .checked_sub(1)
            .ok_or_else(|| anyhow!("position ids start at 1"))?;
        let p = v
            .positions
            .get_mut(idx)
            .ok_or_else(|| anyhow!("no position {vault}#{id}"))?;
        Ok(f(p))
    }
}

/// Zero out a position so it is neither takeable nor worth anything.
fn settle(p: &mut Position) {
    p.collateral_amount = Amount::zero(p.collateral_amount.decimals());
    p.debt_amount = Amount::zero(p.debt_amount.decimals());
    p.expect_profit = Amount::zero(p.expect_profit.decimals());
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn total_positions(&self, vault: &Address) -> Result<u64> {
        self.touch(vault).await?;
        let s = self.state.lock().unwrap();
        Ok(s.vaults.get(vault).map(|v| v.positions.len() as u64).unwrap_or(0))
    }

    async fn position_by_id(&self, vault: &Address, id: u64) -> Result<Position> {
        self.touch(vault).await?;
        self.with_position(vault, id, |p| p.clone())
    }

    async fn owner(&self, vault: &Address) -> Result<Address> {
        self.touch(vault).await?;
        let s = self.state.lock().unwrap();
        s.vaults
            .get(vault)
            .and_then(|v| v.owner.clone())
            .ok_or_else(|| anyhow!("vault {vault} has no owner"))
    }

    async fn create_position(&self, vault: &Address, request: &CreatePositionRequest) -> Result<u64> {
        self.touch(vault).await?;
        let mut s = self.state.lock().unwrap();
        let v = s.vaults.get_mut(vault).ok_or_else(|| anyhow!("unknown vault {vault}"))?;
        let id = v.positions.len() as u64 + 1;
        v.positions.push(Position {
            key: PositionKey::new(vault.clone(), id),
            collateral_token: request.collateral_token.clone(),
            debt_token: request.debt_token.clone(),
            collateral_amount: request.collateral_amount,
            debt_amount: request.debt_amount,
            principal: request.principal,
            interest_rate_mode: request.interest_rate_mode,
            expect_profit: request.expect_profit,
            deadline: request.deadline,
        });
        Ok(id)
    }

    async fn close_position(&self, vault: &Address, id: u64) -> Result<()> {
        self.touch(vault).await?;
        self.with_position(vault, id, settle)
    }

    async fn preview_take(&self, vault: &Address, id: u64, amount: &Amount) -> Result<TakePreview> {
        self.touch(vault).await?;
        self.with_position(vault, id, |p| {
            // Collateral out pro rata to the share of debt covered.
            let debt = p.debt_amount.raw().max(1);
            let covered = amount.raw().min(debt);
            TakePreview {
                debt_input: Amount::new(covered, amount.decimals()),
                collateral_output: Amount::new(
                    p.collateral_amount.raw() / debt * covered,
                    p.collateral_amount.decimals(),
                ),
            }
        })
    }
}

#[async_trait]
impl SwapExecutor for MemoryLedger {
    async fn execute(&self, instruction: &TakeInstruction) -> Result<SwapReceipt> {
        let mut s = self.state.lock().unwrap();
        if let Some(msg) = &s.swap_error {
            bail!("{msg}");
        }

        for key in &instruction.positions {
            let p = s
                .vaults
                .get_mut(&key.vault)
                .and_then(|v| v.positions.get_mut((key.id as usize).checked_sub(1)?))
                .ok_or_else(|| anyhow!("no position {key}"))?;
            settle(p);
        }

        let allowance_key = (instruction.token_in.clone(), self.caller.clone(), addr("0xrouter"));
        if let Some(a) = s.allowances.get_mut(&allowance_key) {
            *a = a.saturating_sub(&instruction.amount_in)?;
        }

        s.swaps.push(instruction.clone());
        Ok(SwapReceipt {
            tx_hash: format!("0xtx{}", s.swaps.len()),
            instruction_id: instruction.id,
            amount_in: instruction.amount_in,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl TokenAccounts for MemoryLedger {
    async fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Result<Amount> {
        let s = self.state.lock().unwrap();
        Ok(s
            .allowances
            .get(&(token.clone(), owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(Amount::zero(DEBT_DECIMALS)))
    }

    async fn balance(&self, token: &Address, holder: &Address) -> Result<Amount> {
        let s = self.state.lock().unwrap();
        Ok(s
            .balances
            .get(&(token.clone(), holder.clone()))
            .copied()
            .unwrap_or(Amount::zero(DEBT_DECIMALS)))
    }

    async fn approve(&self, token: &Address, spender: &Address, amount: &Amount) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.allowances
            .insert((token.clone(), self.caller.clone(), spender.clone()), *amount);
        Ok(())
    }
}

impl Session for MemoryLedger {
    fn address(&self) -> Address {
        self.caller.clone()
    }

    fn can_sign(&self) -> bool {
        self.can_sign
    }
}
