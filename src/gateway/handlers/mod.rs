//! HTTP handlers, one submodule per resource

pub mod approval;
pub mod distribution;
pub mod health;
pub mod investment;
pub mod offering;
pub mod webhook;

use super::state::AppState;
use super::types::ApiError;
use crate::core_types::{OfferingId, UserId};
use crate::error::SettlementError;
use crate::ledger::Offering;

/// Load an offering and check the caller owns it
pub(crate) async fn require_owner(
    state: &AppState,
    offering_id: OfferingId,
    caller: &UserId,
) -> Result<Offering, ApiError> {
    let offering = state.engine.get_offering(offering_id).await?;
    if &offering.owner_id != caller {
        return Err(SettlementError::Unauthorized.into());
    }
    Ok(offering)
}
