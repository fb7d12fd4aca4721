use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::types::ApiError;
use crate::core_types::UserId;
use crate::db::Database;
use crate::engine::SettlementEngine;

/// Header carrying the caller identity, set by the upstream auth proxy
pub const USER_HEADER: &str = "x-user-id";
/// Processor webhook signature header
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    /// Secret for webhook signature checks; unsigned webhooks are refused
    /// when unset
    pub webhook_secret: Option<String>,
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(
        engine: Arc<SettlementEngine>,
        webhook_secret: Option<String>,
        db: Option<Database>,
    ) -> Self {
        Self {
            engine,
            webhook_secret,
            db,
        }
    }
}

/// Authenticated caller, taken from [`USER_HEADER`]
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Missing x-user-id header"))?;
        Ok(Caller(UserId::from(value)))
    }
}
