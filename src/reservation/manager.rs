use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use super::types::{ReleaseReason, Reservation, ReservationState};
use crate::clock::TimeSource;
use crate::core_types::{InvestmentId, OfferingId, ReservationId, TokenAmount};
use crate::error::SettlementError;
use crate::ledger::SupplyLedger;

/// Reservation Manager
pub struct ReservationManager {
    ledger: Arc<dyn SupplyLedger>,
    clock: Arc<dyn TimeSource>,
    records: DashMap<ReservationId, Reservation>,
    default_hold: Duration,
}

impl ReservationManager {
    pub fn new(
        ledger: Arc<dyn SupplyLedger>,
        clock: Arc<dyn TimeSource>,
        default_hold: Duration,
    ) -> Self {
        Self {
            ledger,
            clock,
            records: DashMap::new(),
            default_hold,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn SupplyLedger> {
        &self.ledger
    }

    pub fn default_hold(&self) -> Duration {
        self.default_hold
    }

    pub fn get(&self, id: ReservationId) -> Result<Reservation, SettlementError> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| SettlementError::NotFound(format!("reservation {}", id)))
    }

    /// Hold supply for an investment using the configured hold duration
    pub async fn reserve(
        &self,
        investment_id: InvestmentId,
        offering_id: OfferingId,
        tokens: TokenAmount,
    ) -> Result<Reservation, SettlementError> {
        self.reserve_for(investment_id, offering_id, tokens, self.default_hold)
            .await
    }

    /// Hold supply for an investment for `hold`
    pub async fn reserve_for(
        &self,
        investment_id: InvestmentId,
        offering_id: OfferingId,
        tokens: TokenAmount,
        hold: Duration,
    ) -> Result<Reservation, SettlementError> {
        if hold <= Duration::zero() {
            return Err(SettlementError::Validation(
                "hold duration must be positive".into(),
            ));
        }

        let now = self.clock.now();
        let id = ReservationId::new();
        let token = self
            .ledger
            .try_reserve(offering_id, id, tokens, now + hold, now)
            .await?;

        let reservation = Reservation {
            id,
            offering_id,
            investment_id,
            tokens_held: token.tokens,
            expires_at: token.expires_at,
            state: ReservationState::Active,
            release_reason: None,
            created_at: now,
            settled_at: None,
        };
        self.records.insert(id, reservation.clone());

        info!(
            reservation_id = %id,
            investment_id = %investment_id,
            offering_id = %offering_id,
            tokens,
            expires_at = %reservation.expires_at,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Atomic CAS on the record. Returns the updated record, or `None` if the
    /// reservation was not `Active` (or `guard` refused).
    fn transition_if_active(
        &self,
        id: ReservationId,
        next: ReservationState,
        reason: Option<ReleaseReason>,
        now: DateTime<Utc>,
        guard: impl FnOnce(&Reservation) -> bool,
    ) -> Result<Option<Reservation>, SettlementError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("reservation {}", id)))?;

        if record.state != ReservationState::Active || !guard(record.value()) {
            return Ok(None);
        }
        record.state = next;
        record.release_reason = reason;
        record.settled_at = Some(now);
        Ok(Some(record.clone()))
    }

    /// Undo a CAS whose ledger call failed
    fn revert_to_active(&self, id: ReservationId) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.state = ReservationState::Active;
            record.release_reason = None;
            record.settled_at = None;
        }
    }

    /// Commit the held tokens to sold.
    ///
    /// Idempotent for an already-committed reservation. Fails with
    /// `ReservationExpired` once the deadline has passed; the hold is then
    /// released on the spot instead of waiting for the sweep.
    pub async fn confirm(&self, id: ReservationId) -> Result<Reservation, SettlementError> {
        let now = self.clock.now();
        let current = self.get(id)?;

        match current.state {
            ReservationState::Committed => return Ok(current),
            ReservationState::Released => return Err(SettlementError::ReservationExpired),
            ReservationState::Active => {}
        }

        if current.is_overdue(now) {
            self.release_with(id, ReleaseReason::Expired).await?;
            return Err(SettlementError::ReservationExpired);
        }

        let Some(committed) = self.transition_if_active(
            id,
            ReservationState::Committed,
            None,
            now,
            |r| !r.is_overdue(now),
        )?
        else {
            // Lost the race: someone else moved it out of Active
            let latest = self.get(id)?;
            return match latest.state {
                ReservationState::Committed => Ok(latest),
                _ => Err(SettlementError::ReservationExpired),
            };
        };

        match self.ledger.commit(&committed.token(), now).await {
            Ok(()) => {
                info!(reservation_id = %id, tokens = committed.tokens_held, "Reservation committed");
                Ok(committed)
            }
            Err(SettlementError::ReservationExpired) => {
                // Ledger clock disagreed; settle as expired
                if let Some(mut record) = self.records.get_mut(&id) {
                    record.state = ReservationState::Released;
                    record.release_reason = Some(ReleaseReason::Expired);
                }
                self.ledger.release(&committed.token()).await?;
                Err(SettlementError::ReservationExpired)
            }
            Err(e) => {
                error!(reservation_id = %id, error = %e, "Ledger commit failed, reverting");
                self.revert_to_active(id);
                Err(e)
            }
        }
    }

    /// Explicit cancellation. Releasing a non-active reservation is a no-op.
    pub async fn release(&self, id: ReservationId) -> Result<Reservation, SettlementError> {
        self.release_with(id, ReleaseReason::Cancelled).await
    }

    pub async fn release_with(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
    ) -> Result<Reservation, SettlementError> {
        let now = self.clock.now();
        let Some(released) =
            self.transition_if_active(id, ReservationState::Released, Some(reason), now, |_| true)?
        else {
            return self.get(id);
        };

        if let Err(e) = self.ledger.release(&released.token()).await {
            error!(reservation_id = %id, error = %e, "Ledger release failed, reverting");
            self.revert_to_active(id);
            return Err(e);
        }

        debug!(reservation_id = %id, ?reason, "Reservation released");
        Ok(released)
    }

    /// Release every active reservation past its deadline at `now`.
    ///
    /// Safe to run concurrently and repeatedly: each reservation is
    /// claimed by CAS, so it is released by exactly one caller.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<Reservation> {
        let overdue: Vec<ReservationId> = self
            .records
            .iter()
            .filter(|r| r.state == ReservationState::Active && r.is_overdue(now))
            .map(|r| r.id)
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for id in overdue {
            let claimed = match self.transition_if_active(
                id,
                ReservationState::Released,
                Some(ReleaseReason::Expired),
                now,
                |r| r.is_overdue(now),
            ) {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    warn!(reservation_id = %id, error = %e, "Expiry claim failed");
                    continue;
                }
            };

            match self.ledger.release(&claimed.token()).await {
                Ok(_) => expired.push(claimed),
                Err(e) => {
                    error!(reservation_id = %id, error = %e, "Expiry release failed, will retry");
                    self.revert_to_active(id);
                }
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue reservations");
        }
        expired
    }

    /// Active reservations (diagnostics)
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == ReservationState::Active)
            .count()
    }
}
