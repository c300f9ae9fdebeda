//! End-to-end flows over the in-memory ledger: create -> scan -> select ->
//! take, owner gating, scan failures and stale-scan discarding.

mod mock_ledger;

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use mock_ledger::{addr, MemoryLedger};
use takeover::amount::Amount;
use takeover::engine::executor::TakeCoordinator;
use takeover::engine::planner::{draft_position, PositionPlanner};
use takeover::engine::scanner::{CandidateBook, PositionScanner};
use takeover::pricing::sizing::{PositionSizer, SizingConfig};
use takeover::types::*;

const NOW: i64 = 1_750_000_000;
const VAULT: &str = "0xvault";
const OWNER: &str = "0xowner";
const TAKER: &str = "0xtaker";

fn usdc(n: u128) -> Amount {
    Amount::new(n * 1_000_000, DEBT_DECIMALS)
}

fn pair() -> TokenPair {
    TokenPair {
        debt_token: addr("0xusdc"),
        collateral_token: addr("0xpt"),
    }
}

fn position(key: PositionKey, profit: u128, deadline: Deadline) -> Position {
    Position {
        key,
        collateral_token: addr("0xpt"),
        debt_token: addr("0xusdc"),
        collateral_amount: Amount::new(375_000_000_000_000_000_000, COLLATERAL_DECIMALS),
        debt_amount: usdc(200),
        principal: usdc(100),
        interest_rate_mode: InterestRateMode::Variable,
        expect_profit: Amount::new(profit, DEBT_DECIMALS),
        deadline,
    }
}

struct Harness {
    ledger: MemoryLedger,
    book: Arc<CandidateBook>,
    scanner: PositionScanner,
    coordinator: TakeCoordinator,
}

fn harness(dry_run: bool) -> Harness {
    let ledger = MemoryLedger::new(TAKER);
    ledger.add_vault(VAULT, OWNER);
    let book = Arc::new(CandidateBook::new());
    let shared = Arc::new(ledger.clone());
    let scanner = PositionScanner::new(shared.clone(), book.clone());
    let coordinator = TakeCoordinator::new(
        shared.clone(),
        shared.clone(),
        shared.clone(),
        shared,
        book.clone(),
        addr("0xrouter"),
        dry_run,
    );
    Harness {
        ledger,
        book,
        scanner,
        coordinator,
    }
}

// -- Create -> scan -> take --

#[tokio::test]
async fn test_create_scan_take_flow() {
    let mut h = harness(false);

    // Owner sizes and opens a 3x position with a close price
    let owner_view = Arc::new(h.ledger.as_caller(OWNER));
    let planner = PositionPlanner::new(owner_view.clone(), owner_view.clone(), owner_view);
    assert_ok!(planner.approve_principal(&addr(VAULT), &addr("0xusdc"), &usdc(100)).await);

    let sizing = PositionSizer::new(SizingConfig::default()).size(dec!(100), dec!(3)).unwrap();
    let request = draft_position(
        &sizing,
        &pair(),
        InterestRateMode::Variable,
        Some("0.85"),
        Some(NOW + 86_400),
        NOW,
        Decimals::default(),
    )
    .unwrap();
    let id = assert_ok!(planner.submit(&addr(VAULT), &request).await);
    assert_eq!(id, 1);

    // Taker scans and finds it
    let report = h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].position.expect_profit, Amount::new(118_750_000, 6));
    assert_eq!(report.default_pair, Some(pair()));

    // Select and take
    assert_ok!(h.coordinator.approve_router(&addr("0xusdc"), &usdc(300)).await);
    h.ledger.set_balance("0xusdc", TAKER, usdc(1_000));
    assert!(h.coordinator.toggle(PositionKey::new(addr(VAULT), 1)).await.unwrap());
    let outcome = assert_ok!(h.coordinator.execute(usdc(200), Amount::zero(18), NOW).await);
    assert_eq!(outcome.receipt.tx_hash, "0xtx1");
    assert!(h.coordinator.selection().is_empty());
    assert_eq!(h.ledger.swaps().len(), 1);

    // Rescan: the taken position is gone and the allowance was spent
    let report = h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    assert!(report.candidates.is_empty());
    let funds = h.coordinator.funds(&addr("0xusdc")).await.unwrap();
    assert_eq!(funds.allowance, usdc(100));
    assert_eq!(funds.balance, usdc(1_000));
}

#[tokio::test]
async fn test_take_multiple_positions_in_one_swap() {
    let mut h = harness(false);
    for profit in [30_000_000, 10_000_000, 20_000_000] {
        h.ledger.insert_position(VAULT, |k| position(k, profit, Deadline::None));
    }
    h.ledger.set_allowance("0xusdc", TAKER, "0xrouter", usdc(1_000));

    let report = h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    let ids: Vec<u64> = report.candidates.iter().map(|c| c.key().id).collect();
    assert_eq!(ids, vec![2, 3, 1]);

    for c in &report.candidates {
        h.coordinator.toggle(c.key().clone()).await.unwrap();
    }
    let outcome = h.coordinator.execute(usdc(600), Amount::zero(18), NOW).await.unwrap();
    assert_eq!(outcome.instruction.positions.len(), 3);
    assert_eq!(outcome.instruction.token_in, addr("0xusdc"));
    assert_eq!(outcome.instruction.token_out, addr("0xpt"));
}

#[tokio::test]
async fn test_dry_run_leaves_ledger_untouched() {
    let mut h = harness(true);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    h.ledger.set_allowance("0xusdc", TAKER, "0xrouter", usdc(500));

    h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    h.coordinator.toggle(PositionKey::new(addr(VAULT), 1)).await.unwrap();
    let outcome = h.coordinator.execute(usdc(200), Amount::zero(18), NOW).await.unwrap();

    assert!(outcome.dry_run);
    assert!(h.ledger.swaps().is_empty());
    let report = h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    assert_eq!(report.candidates.len(), 1);
}

// -- Take preconditions --

#[tokio::test]
async fn test_take_without_allowance_fails() {
    let mut h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    h.ledger.set_allowance("0xusdc", TAKER, "0xrouter", usdc(50));

    h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    h.coordinator.toggle(PositionKey::new(addr(VAULT), 1)).await.unwrap();
    let err = assert_err!(h.coordinator.execute(usdc(100), Amount::zero(18), NOW).await);
    assert_eq!(
        err,
        EngineError::InsufficientAllowance {
            needed: usdc(100),
            available: usdc(50),
        }
    );
    assert!(h.ledger.swaps().is_empty());
}

#[tokio::test]
async fn test_approving_router_unblocks_take() {
    let mut h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    h.coordinator.toggle(PositionKey::new(addr(VAULT), 1)).await.unwrap();

    let err = assert_err!(h.coordinator.execute(usdc(100), Amount::zero(18), NOW).await);
    assert_eq!(err.kind(), "insufficient_allowance");

    assert_ok!(h.coordinator.approve_router(&addr("0xusdc"), &usdc(100)).await);
    assert_eq!(h.coordinator.funds(&addr("0xusdc")).await.unwrap().allowance, usdc(100));
    assert_ok!(h.coordinator.execute(usdc(100), Amount::zero(18), NOW).await);
    assert_eq!(h.ledger.swaps().len(), 1);
}

#[tokio::test]
async fn test_swap_failure_keeps_selection() {
    let mut h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    h.ledger.set_allowance("0xusdc", TAKER, "0xrouter", usdc(500));
    h.ledger.fail_swaps("router paused");

    h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    h.coordinator.toggle(PositionKey::new(addr(VAULT), 1)).await.unwrap();
    let err = assert_err!(h.coordinator.execute(usdc(100), Amount::zero(18), NOW).await);
    assert_eq!(err.kind(), "execution_failure");
    assert_eq!(h.coordinator.selection().len(), 1);
}

#[tokio::test]
async fn test_expired_positions_never_listed() {
    let mut h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::At(NOW - 100)));
    h.ledger.insert_position(VAULT, |k| position(k, 0, Deadline::None));

    let report = h.scanner.scan_takeable(&[addr(VAULT)], NOW).await;
    assert!(report.candidates.is_empty());
    assert_err!(h.coordinator.toggle(PositionKey::new(addr(VAULT), 1)).await);
}

#[tokio::test]
async fn test_preview_take() {
    let h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));

    let preview = h
        .coordinator
        .preview(&PositionKey::new(addr(VAULT), 1), &usdc(100))
        .await
        .unwrap();
    assert_eq!(preview.debt_input, usdc(100));
    assert_eq!(preview.collateral_output.raw(), 187_500_000_000_000_000_000);
}

// -- Owner gating --

#[tokio::test]
async fn test_non_owner_cannot_create_or_close() {
    let h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    let stranger = Arc::new(h.ledger.as_caller("0xstranger"));
    let planner = PositionPlanner::new(stranger.clone(), stranger.clone(), stranger);

    let sizing = PositionSizer::new(SizingConfig::default()).size(dec!(50), dec!(2)).unwrap();
    let request =
        draft_position(&sizing, &pair(), InterestRateMode::Variable, None, None, NOW, Decimals::default()).unwrap();

    let err = assert_err!(planner.submit(&addr(VAULT), &request).await);
    assert_eq!(err.kind(), "not_owner");
    let err = assert_err!(planner.close(&addr(VAULT), 1).await);
    assert_eq!(err.kind(), "not_owner");
}

#[tokio::test]
async fn test_owner_close_removes_from_scan() {
    let h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::At(NOW - 10)));
    let owner_view = Arc::new(h.ledger.as_caller(OWNER));
    let planner = PositionPlanner::new(owner_view.clone(), owner_view.clone(), owner_view);

    // Closing ignores the deadline
    assert_ok!(planner.close(&addr(VAULT), 1).await);
    let closed = h.ledger.position(VAULT, 1).unwrap();
    assert!(closed.collateral_amount.is_zero());

    let views = h.scanner.owner_positions(&addr(VAULT), NOW).await.unwrap();
    assert_eq!(views.len(), 1);
    assert!(!views[0].eligibility.can_others_take);
}

// -- Scan robustness --

#[tokio::test]
async fn test_failing_vault_does_not_abort_scan() {
    let h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    h.ledger.add_vault("0xbroken", OWNER);
    h.ledger.fail_vault("0xbroken");

    let report = h.scanner.scan_takeable(&[addr("0xbroken"), addr(VAULT)], NOW).await;
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].vault, addr("0xbroken"));
}

#[tokio::test]
async fn test_stale_scan_is_discarded() {
    let h = harness(false);
    h.ledger.insert_position(VAULT, |k| position(k, 10_000_000, Deadline::None));
    h.ledger.add_vault("0xslow", OWNER);
    h.ledger.insert_position("0xslow", |k| position(k, 10_000_000, Deadline::None));
    h.ledger.slow_vault("0xslow", Duration::from_millis(100));

    // The slow scan starts first and finishes last
    let slow_vaults = [addr("0xslow")];
    let fast_vaults = [addr(VAULT)];
    let (slow, fast) = tokio::join!(
        h.scanner.scan_takeable(&slow_vaults, NOW),
        h.scanner.scan_takeable(&fast_vaults, NOW),
    );
    assert!(slow.generation < fast.generation);

    let latest = h.book.latest().await.unwrap();
    assert_eq!(latest.generation, fast.generation);
    assert_eq!(latest.candidates[0].key().vault, addr(VAULT));
}
