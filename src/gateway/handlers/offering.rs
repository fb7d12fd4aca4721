//! Offering handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::{AppState, Caller};
use super::super::types::{ApiResult, RegisterOfferingRequest, ok};
use crate::core_types::OfferingId;
use crate::ledger::{Availability, Offering, OfferingStatus, OfferingTerms};

/// POST /api/v1/offerings
///
/// The caller becomes the offering owner.
pub async fn register_offering(
    State(state): State<Arc<AppState>>,
    Caller(owner): Caller,
    Json(req): Json<RegisterOfferingRequest>,
) -> ApiResult<Offering> {
    let terms = OfferingTerms {
        name: req.name,
        owner_id: owner,
        token_id: req.token_id,
        total_supply: req.total_supply,
        price_per_token: req.price_per_token.inner(),
        min_investment: req.min_investment.inner(),
        max_investment: req.max_investment.map(|m| m.inner()),
        min_tokens_per_purchase: 1,
        max_tokens_per_purchase: req.max_tokens_per_purchase,
        window_start: req.window_start,
        window_end: req.window_end,
        status: OfferingStatus::Active,
    };
    ok(state.engine.register_offering(terms).await?)
}

/// GET /api/v1/offerings
pub async fn list_offerings(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Offering>> {
    ok(state.engine.list_offerings().await?)
}

/// GET /api/v1/offerings/{offering_id}
pub async fn get_offering(
    State(state): State<Arc<AppState>>,
    Path(offering_id): Path<OfferingId>,
) -> ApiResult<Offering> {
    ok(state.engine.get_offering(offering_id).await?)
}

/// GET /api/v1/offerings/{offering_id}/availability
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(offering_id): Path<OfferingId>,
) -> ApiResult<Availability> {
    ok(state.engine.get_offering_availability(offering_id).await?)
}
