//! Reservation record and state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{InvestmentId, OfferingId, ReservationId, TokenAmount};
use crate::ledger::ReservationToken;

/// Reservation state
///
/// `Active` is left exactly once, to either terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    /// Supply is held until `expires_at`
    Active,
    /// Terminal: held tokens moved to sold
    Committed,
    /// Terminal: held tokens returned to availability
    Released,
}

impl ReservationState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Active => "active",
            ReservationState::Committed => "committed",
            ReservationState::Released => "released",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a reservation was released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseReason {
    Cancelled,
    Expired,
    PaymentFailed,
}

/// A time-boxed hold on offering supply, owned by one investment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub offering_id: OfferingId,
    pub investment_id: InvestmentId,
    pub tokens_held: TokenAmount,
    pub expires_at: DateTime<Utc>,
    pub state: ReservationState,
    pub release_reason: Option<ReleaseReason>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn token(&self) -> ReservationToken {
        ReservationToken {
            reservation_id: self.id,
            offering_id: self.offering_id,
            tokens: self.tokens_held,
            expires_at: self.expires_at,
        }
    }

    /// Past its deadline at `now` (commit is still allowed at exactly `expires_at`)
    #[inline]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
