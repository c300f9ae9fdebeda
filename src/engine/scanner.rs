//! Multi-vault position scanner.
//!
//! Reads every position from the configured vaults, keeps the ones a third
//! party may take right now, and ranks them so the cheapest expected profit
//! per collateral token comes first. Results are published to a
//! [`CandidateBook`] that discards scans overtaken by a newer one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::eligibility::{evaluate_position, Eligibility};
use crate::amount::Amount;
use crate::ledger::Ledger;
use crate::types::{Address, Position, PositionKey, TokenPair};

// ---------------------------------------------------------------------------
// Scan results
// ---------------------------------------------------------------------------

/// A takeable position with its ranking key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub position: Position,
    pub owner: Address,
    /// Expected profit per whole collateral token, for display. Ranking
    /// compares the exact ratio.
    pub effective_price: Amount,
    pub eligibility: Eligibility,
}

impl Candidate {
    pub fn key(&self) -> &PositionKey {
        &self.position.key
    }
}

/// A vault whose reads failed during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFailure {
    pub vault: Address,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub generation: u64,
    pub scanned_at: DateTime<Utc>,
    /// The clock value eligibility was evaluated at.
    pub now: i64,
    pub candidates: Vec<Candidate>,
    pub failures: Vec<VaultFailure>,
    /// Pair of the best candidate, the natural default for a take.
    pub default_pair: Option<TokenPair>,
    pub vaults_scanned: usize,
    pub positions_read: usize,
}

impl ScanReport {
    pub fn candidate(&self, key: &PositionKey) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.key() == key)
    }
}

/// One position with its eligibility, for an owner's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub position: Position,
    pub eligibility: Eligibility,
}

// ---------------------------------------------------------------------------
// Candidate book
// ---------------------------------------------------------------------------

/// Latest published scan, guarded by a generation counter.
///
/// Each scan takes a ticket from [`begin`](Self::begin). A finished scan is
/// only published if its ticket is still the newest one handed out, so a
/// slow scan can never overwrite the results of one started after it.
#[derive(Debug, Default)]
pub struct CandidateBook {
    generation: AtomicU64,
    latest: RwLock<Option<ScanReport>>,
}

impl CandidateBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Publish `report` unless a newer scan has started. Returns whether it
    /// was published.
    pub async fn publish(&self, report: ScanReport) -> bool {
        let mut latest = self.latest.write().await;
        if report.generation != self.generation.load(Ordering::SeqCst) {
            debug!(
                generation = report.generation,
                newest = self.generation.load(Ordering::SeqCst),
                "Discarding stale scan"
            );
            return false;
        }
        *latest = Some(report);
        true
    }

    pub async fn latest(&self) -> Option<ScanReport> {
        self.latest.read().await.clone()
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct PositionScanner {
    ledger: Arc<dyn Ledger>,
    book: Arc<CandidateBook>,
}

impl PositionScanner {
    pub fn new(ledger: Arc<dyn Ledger>, book: Arc<CandidateBook>) -> Self {
        Self { ledger, book }
    }

    pub fn book(&self) -> &Arc<CandidateBook> {
        &self.book
    }

    /// Scan `vaults` and publish the ranked takeable positions.
    ///
    /// A vault whose count, owner or any position read fails is skipped and
    /// reported in [`ScanReport::failures`]. The returned report is the one
    /// this scan produced, whether or not it won publication.
    pub async fn scan_takeable(&self, vaults: &[Address], now: i64) -> ScanReport {
        let generation = self.book.begin();

        let mut seen = HashSet::new();
        let unique: Vec<&Address> = vaults.iter().filter(|v| seen.insert(*v)).collect();

        info!(generation, vaults = unique.len(), "Starting position scan");

        let results = join_all(unique.iter().map(|vault| self.read_vault(vault))).await;

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        let mut positions_read = 0usize;

        for (vault, result) in unique.iter().zip(results) {
            match result {
                Ok((owner, positions)) => {
                    positions_read += positions.len();
                    let before = candidates.len();
                    candidates.extend(
                        positions
                            .into_iter()
                            .filter_map(|position| Self::to_candidate(position, &owner, now)),
                    );
                    debug!(
                        vault = %vault,
                        takeable = candidates.len() - before,
                        "Vault scanned"
                    );
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    warn!(vault = %vault, error = %reason, "Vault scan failed, skipping");
                    failures.push(VaultFailure {
                        vault: (*vault).clone(),
                        reason,
                    });
                }
            }
        }

        rank_candidates(&mut candidates);

        let report = ScanReport {
            generation,
            scanned_at: Utc::now(),
            now,
            default_pair: candidates.first().map(|c| c.position.pair()),
            candidates,
            failures,
            vaults_scanned: unique.len(),
            positions_read,
        };

        let published = self.book.publish(report.clone()).await;

        info!(
            generation,
            candidates = report.candidates.len(),
            failed_vaults = report.failures.len(),
            positions = report.positions_read,
            published,
            "Position scan complete"
        );

        report
    }

    /// Every position in one vault with its eligibility at `now`, in id order.
    pub async fn owner_positions(&self, vault: &Address, now: i64) -> Result<Vec<PositionView>> {
        let positions = self.read_positions(vault).await?;
        Ok(positions
            .into_iter()
            .map(|position| PositionView {
                eligibility: evaluate_position(&position, now),
                position,
            })
            .collect())
    }

    // -- Ledger reads ----------------------------------------------------

    async fn read_vault(&self, vault: &Address) -> Result<(Address, Vec<Position>)> {
        let (owner, positions) = tokio::join!(
            self.ledger.owner(vault),
            self.read_positions(vault),
        );
        let owner = owner.with_context(|| format!("Failed to read owner of vault {vault}"))?;
        Ok((owner, positions?))
    }

    async fn read_positions(&self, vault: &Address) -> Result<Vec<Position>> {
        let total = self
            .ledger
            .total_positions(vault)
            .await
            .with_context(|| format!("Failed to read position count of vault {vault}"))?;

        let reads = (1..=total).map(|id| async move {
            self.ledger
                .position_by_id(vault, id)
                .await
                .with_context(|| format!("Failed to read position {vault}#{id}"))
        });
        try_join_all(reads).await
    }

    fn to_candidate(position: Position, owner: &Address, now: i64) -> Option<Candidate> {
        let eligibility = evaluate_position(&position, now);
        if !eligibility.can_others_take {
            return None;
        }
        Some(Candidate {
            effective_price: position.effective_price(),
            position,
            owner: owner.clone(),
            eligibility,
        })
    }
}

/// Ascending effective price, ties broken by `(vault, id)`.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.position
            .cmp_effective_price(&b.position)
            .then_with(|| a.position.key.cmp(&b.position.key))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
