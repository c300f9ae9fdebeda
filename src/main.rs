//! takeover: leveraged position engine service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects to the ledger gateway, optionally serves the JSON API, and
//! runs the takeable-position scan loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use takeover::api::{self, routes::ApiState};
use takeover::config;
use takeover::engine::executor::TakeCoordinator;
use takeover::engine::scanner::{CandidateBook, PositionScanner, ScanReport};
use takeover::ledger::gateway::GatewayClient;
use takeover::ledger::Session;
use takeover::types::Address;

/// Caller used when none is configured; read-only.
const NO_CALLER: &str = "0x0000000000000000000000000000000000000000";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    info!(
        gateway = %cfg.gateway.base_url,
        vaults = cfg.vaults.scan.len(),
        scan_interval_secs = cfg.engine.scan_interval_secs,
        dry_run = cfg.engine.dry_run,
        "takeover starting up"
    );

    // -- Initialise components -------------------------------------------

    let caller = match &cfg.gateway.caller {
        Some(c) => c.clone(),
        None => {
            warn!("No caller configured, running read-only");
            Address::parse(NO_CALLER)?
        }
    };
    let token = cfg.gateway_token().unwrap_or_else(|e| {
        warn!(error = %e, "Gateway token unavailable, signing disabled");
        None
    });

    let gateway = Arc::new(GatewayClient::new(
        &cfg.gateway.base_url,
        token,
        caller,
        cfg.market.decimals(),
    )?);

    let book = Arc::new(CandidateBook::new());
    let scanner = PositionScanner::new(gateway.clone(), book.clone());

    // The coordinator reads from the same book the scanner publishes to.
    let router = cfg.gateway.router.clone().unwrap_or_else(|| gateway.address());
    let coordinator = TakeCoordinator::new(
        gateway.clone(),
        gateway.clone(),
        gateway.clone(),
        gateway.clone(),
        book.clone(),
        router,
        cfg.engine.dry_run,
    );

    if cfg.api.enabled {
        let state = Arc::new(ApiState::new(book.clone(), cfg.market.clone()));
        api::spawn_api(state, cfg.api.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.scan_interval_secs,
        can_sign = gateway.can_sign(),
        "Entering scan loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = chrono::Utc::now().timestamp();
                let report = scanner.scan_takeable(&cfg.vaults.scan, now).await;
                log_scan_report(&report);

                if let Some(pair) = &report.default_pair {
                    match coordinator.funds(&pair.debt_token).await {
                        Ok(funds) => info!(
                            token = %pair.debt_token,
                            balance = %funds.balance,
                            allowance = %funds.allowance,
                            "Taker funds"
                        ),
                        Err(e) => warn!(error = ?e, "Failed to read taker funds"),
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("takeover shut down cleanly.");
    Ok(())
}

/// Log a human-readable scan summary.
fn log_scan_report(report: &ScanReport) {
    match report.candidates.first() {
        Some(best) => info!(
            generation = report.generation,
            candidates = report.candidates.len(),
            failed_vaults = report.failures.len(),
            best = %best.position.key,
            best_price = %best.effective_price,
            best_profit = %best.position.expect_profit,
            "Scan summary"
        ),
        None => info!(
            generation = report.generation,
            failed_vaults = report.failures.len(),
            "Scan summary: no takeable positions"
        ),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("takeover=info"));

    let json_logging = std::env::var("TAKEOVER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
