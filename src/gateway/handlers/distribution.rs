//! Dividend distribution handlers. All routes are offering-owner only.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::{AppState, Caller};
use super::super::types::{ApiResult, CreateDistributionRequest, ok};
use super::require_owner;
use crate::core_types::DistributionId;
use crate::distribution::{DividendDistribution, DividendPayment};

/// POST /api/v1/distributions
pub async fn create_distribution(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(req): Json<CreateDistributionRequest>,
) -> ApiResult<DividendDistribution> {
    require_owner(&state, req.offering_id, &caller).await?;
    let distribution = state
        .engine
        .create_distribution(req.offering_id, req.per_token_amount.inner(), req.as_of)
        .await?;
    ok(distribution)
}

/// POST /api/v1/distributions/{distribution_id}/process
pub async fn process_payments(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<DistributionId>,
) -> ApiResult<DividendDistribution> {
    let distribution = state.engine.get_distribution(id)?;
    require_owner(&state, distribution.offering_id, &caller).await?;
    ok(state.engine.process_payments(id).await?)
}

/// POST /api/v1/distributions/{distribution_id}/retry
pub async fn retry_failed(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<DistributionId>,
) -> ApiResult<DividendDistribution> {
    let distribution = state.engine.get_distribution(id)?;
    require_owner(&state, distribution.offering_id, &caller).await?;
    ok(state.engine.retry_failed_payments(id).await?)
}

/// GET /api/v1/distributions/{distribution_id}
pub async fn get_distribution(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<DistributionId>,
) -> ApiResult<DividendDistribution> {
    let distribution = state.engine.get_distribution(id)?;
    require_owner(&state, distribution.offering_id, &caller).await?;
    ok(distribution)
}

/// GET /api/v1/distributions/{distribution_id}/payments
pub async fn get_payments(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<DistributionId>,
) -> ApiResult<Vec<DividendPayment>> {
    let distribution = state.engine.get_distribution(id)?;
    require_owner(&state, distribution.offering_id, &caller).await?;
    ok(state.engine.distribution_payments(id)?)
}

/// POST /api/v1/distributions/{distribution_id}/abandon
///
/// Marks the distribution failed; unpaid rows are not retried.
pub async fn abandon_distribution(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<DistributionId>,
) -> ApiResult<DividendDistribution> {
    let distribution = state.engine.get_distribution(id)?;
    require_owner(&state, distribution.offering_id, &caller).await?;
    ok(state.engine.abandon_distribution(id)?)
}
