//! Investment handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::{AppState, Caller};
use super::super::types::{
    ApiResult, ConfirmPaymentRequest, PlaceInvestmentRequest, RefundRequest, ok,
};
use super::require_owner;
use crate::core_types::InvestmentId;
use crate::error::SettlementError;
use crate::investment::{Investment, PlaceInvestment, TokenHolding};

/// POST /api/v1/investments
pub async fn place_investment(
    State(state): State<Arc<AppState>>,
    Caller(investor): Caller,
    Json(req): Json<PlaceInvestmentRequest>,
) -> ApiResult<Investment> {
    let investment = state
        .engine
        .place_investment(PlaceInvestment {
            investor_id: investor,
            offering_id: req.offering_id,
            amount: req.amount.inner(),
            payment_method: req.payment_method,
            email: req.email,
        })
        .await?;
    ok(investment)
}

/// GET /api/v1/investments
pub async fn list_investments(
    State(state): State<Arc<AppState>>,
    Caller(investor): Caller,
) -> ApiResult<Vec<Investment>> {
    ok(state.engine.investments_for(&investor))
}

/// GET /api/v1/investments/{investment_id}
pub async fn get_investment(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<InvestmentId>,
) -> ApiResult<Investment> {
    let investment = state.engine.get_investment(id)?;
    if investment.investor_id != caller {
        // Do not leak other investors' records
        return Err(SettlementError::NotFound(format!("investment {}", id)).into());
    }
    ok(investment)
}

/// POST /api/v1/investments/{investment_id}/confirm
///
/// Client-side confirmation after checkout; the webhook is the primary path.
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<InvestmentId>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> ApiResult<Investment> {
    let investment = state.engine.get_investment(id)?;
    if investment.investor_id != caller {
        return Err(SettlementError::NotFound(format!("investment {}", id)).into());
    }
    ok(state.engine.confirm_payment(id, &req.reference).await?)
}

/// POST /api/v1/investments/{investment_id}/cancel
pub async fn cancel_investment(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<InvestmentId>,
) -> ApiResult<Investment> {
    ok(state.engine.cancel_investment(id, &caller).await?)
}

/// POST /api/v1/investments/{investment_id}/refund
///
/// Offering owner only.
pub async fn refund_investment(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<InvestmentId>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Investment> {
    let investment = state.engine.get_investment(id)?;
    require_owner(&state, investment.offering_id, &caller).await?;
    ok(state.engine.refund_investment(id, &req.reason).await?)
}

/// GET /api/v1/holdings
pub async fn list_holdings(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> ApiResult<Vec<TokenHolding>> {
    ok(state.engine.holdings_for(&caller))
}
