//! API route handlers.
//!
//! All endpoints speak JSON. Engine errors become `422 Unprocessable Entity`
//! with `{ "error": <kind>, "message": <text> }`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::amount::Amount;
use crate::config::MarketConfig;
use crate::engine::eligibility::{evaluate_eligibility, Eligibility, TakeStatus};
use crate::engine::executor::prepare_take;
use crate::engine::scanner::{CandidateBook, ScanReport};
use crate::pricing::profit::estimate_profit;
use crate::pricing::sizing::{size_position, Sizing, SizingRequest};
use crate::pricing::yield_model::{project_yield, ray_to_percent, YieldProjection};
use crate::types::{Deadline, EngineError, PositionKey, TakeInstruction, TokenPair};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub book: Arc<CandidateBook>,
    pub market: MarketConfig,
}

impl ApiState {
    pub fn new(book: Arc<CandidateBook>, market: MarketConfig) -> Self {
        Self { book, market }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SizeBody {
    pub principal: Decimal,
    pub leverage: Decimal,
    /// Defaults to the configured market LTV.
    pub ltv_limit: Option<Decimal>,
    /// Defaults to the configured collateral price.
    pub collateral_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ProfitBody {
    pub collateral_amount: Amount,
    pub debt_amount: Amount,
    pub close_price: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfitResponse {
    pub expect_profit: Amount,
}

#[derive(Debug, Deserialize)]
pub struct EligibilityBody {
    pub deadline: Deadline,
    pub expect_profit: Amount,
    /// Defaults to the server clock.
    pub now: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EligibilityResponse {
    #[serde(flatten)]
    pub eligibility: Eligibility,
    pub status: TakeStatus,
}

#[derive(Debug, Deserialize)]
pub struct PrepareTakeBody {
    /// Defaults to the pair of the best candidate in the latest scan.
    pub pair: Option<TokenPair>,
    pub selection: Vec<PositionKey>,
    pub take_amount: Amount,
    pub min_amount_out: Amount,
    pub allowance: Amount,
}

#[derive(Debug, Deserialize)]
pub struct YieldBody {
    /// Defaults to the configured base yield.
    pub base_yield_pct: Option<Decimal>,
    pub leverage: Decimal,
    pub borrow_rate_pct: Option<Decimal>,
    /// Borrow rate as a 27-decimal ray, as a decimal string.
    pub borrow_rate_ray: Option<String>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/candidates
pub async fn get_candidates(State(state): State<AppState>) -> Json<Option<ScanReport>> {
    Json(state.book.latest().await)
}

/// POST /api/size
pub async fn post_size(State(state): State<AppState>, Json(body): Json<SizeBody>) -> ApiResult<Sizing> {
    let request = SizingRequest {
        principal: body.principal,
        leverage: body.leverage,
        ltv_limit: body.ltv_limit.unwrap_or(state.market.ltv_limit),
        collateral_price: body.collateral_price.unwrap_or(state.market.collateral_price),
    };
    Ok(Json(size_position(&request, state.market.decimals())?))
}

/// POST /api/profit
pub async fn post_profit(State(state): State<AppState>, Json(body): Json<ProfitBody>) -> ApiResult<ProfitResponse> {
    let expect_profit = estimate_profit(
        &body.collateral_amount,
        &body.debt_amount,
        body.close_price.as_deref(),
        state.market.decimals(),
    )?;
    Ok(Json(ProfitResponse { expect_profit }))
}

/// POST /api/eligibility
pub async fn post_eligibility(Json(body): Json<EligibilityBody>) -> Json<EligibilityResponse> {
    let now = body.now.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let eligibility = evaluate_eligibility(body.deadline, &body.expect_profit, now);
    Json(EligibilityResponse {
        status: eligibility.status(),
        eligibility,
    })
}

/// POST /api/take/prepare
pub async fn post_prepare_take(
    State(state): State<AppState>,
    Json(body): Json<PrepareTakeBody>,
) -> ApiResult<TakeInstruction> {
    if body.selection.is_empty() {
        return Err(EngineError::invalid("selection", "no positions selected").into());
    }
    let pair = match body.pair {
        Some(pair) => pair,
        None => state
            .book
            .latest()
            .await
            .and_then(|r| r.default_pair)
            .ok_or_else(|| EngineError::invalid("pair", "no pair given and no scan has found one"))?,
    };
    let instruction = prepare_take(
        &pair,
        &body.selection,
        &body.take_amount,
        &body.min_amount_out,
        &body.allowance,
        state.market.decimals(),
    )?;
    Ok(Json(instruction))
}

/// POST /api/yield
pub async fn post_yield(State(state): State<AppState>, Json(body): Json<YieldBody>) -> ApiResult<YieldProjection> {
    let borrow_rate = match (body.borrow_rate_pct, body.borrow_rate_ray.as_deref()) {
        (Some(pct), None) => pct,
        (None, Some(ray)) => {
            let raw = ray
                .trim()
                .parse::<u128>()
                .map_err(|e| EngineError::invalid("borrow_rate_ray", format!("'{ray}': {e}")))?;
            ray_to_percent(raw)?
        }
        _ => {
            return Err(EngineError::invalid(
                "borrow_rate",
                "give exactly one of borrow_rate_pct and borrow_rate_ray",
            )
            .into())
        }
    };
    let base = body.base_yield_pct.unwrap_or(state.market.base_yield_pct);
    Ok(Json(project_yield(base, body.leverage, borrow_rate)?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
