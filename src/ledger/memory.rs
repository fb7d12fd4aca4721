//! In-memory supply ledger
//!
//! One `DashMap` row per offering. Every mutation happens while holding the
//! row's entry guard, which is the row lock: concurrent reservations on the
//! same offering serialize, different offerings proceed in parallel.
//! Guards are never held across an `.await`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use super::{
    Offering, OfferingStatus, OfferingTerms, ReleaseOutcome, ReservationToken, SupplyLedger,
    validate_terms,
};
use crate::core_types::{OfferingId, ReservationId, TokenAmount};
use crate::error::SettlementError;

#[derive(Debug)]
struct Hold {
    tokens: TokenAmount,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct OfferingRow {
    offering: Offering,
    holds: HashMap<ReservationId, Hold>,
    /// Makes `commit` idempotent. Every commit sells at least one token and
    /// `tokens_sold` never decreases, so this holds at most `total_supply`
    /// entries.
    committed: HashSet<ReservationId>,
}

/// Supply ledger backed by a concurrent map
#[derive(Default)]
pub struct MemorySupplyLedger {
    rows: DashMap<OfferingId, OfferingRow>,
}

impl MemorySupplyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(offering_id: OfferingId) -> SettlementError {
        SettlementError::NotFound(format!("offering {}", offering_id))
    }
}

#[async_trait]
impl SupplyLedger for MemorySupplyLedger {
    async fn register(
        &self,
        terms: OfferingTerms,
        now: DateTime<Utc>,
    ) -> Result<Offering, SettlementError> {
        validate_terms(&terms)?;
        let offering = Offering::from_terms(OfferingId::new(), terms, now);
        info!(
            offering_id = %offering.id,
            total_supply = offering.total_supply,
            price = %offering.price_per_token,
            "Offering registered"
        );
        self.rows.insert(
            offering.id,
            OfferingRow {
                offering: offering.clone(),
                holds: HashMap::new(),
                committed: HashSet::new(),
            },
        );
        Ok(offering)
    }

    async fn get(&self, offering_id: OfferingId) -> Result<Offering, SettlementError> {
        self.rows
            .get(&offering_id)
            .map(|row| row.offering.clone())
            .ok_or_else(|| Self::not_found(offering_id))
    }

    async fn list(&self) -> Result<Vec<Offering>, SettlementError> {
        let mut offerings: Vec<Offering> =
            self.rows.iter().map(|row| row.offering.clone()).collect();
        offerings.sort_by_key(|o| o.id);
        Ok(offerings)
    }

    async fn try_reserve(
        &self,
        offering_id: OfferingId,
        reservation_id: ReservationId,
        tokens: TokenAmount,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReservationToken, SettlementError> {
        if tokens == 0 {
            return Err(SettlementError::Validation(
                "reservation must hold at least one token".into(),
            ));
        }

        let mut row = self
            .rows
            .get_mut(&offering_id)
            .ok_or_else(|| Self::not_found(offering_id))?;

        if let Some(reason) = row.offering.closed_reason(now) {
            return Err(SettlementError::OfferingClosed(reason));
        }

        let available = row.offering.available();
        if tokens > available {
            return Err(SettlementError::InsufficientSupply {
                requested: tokens,
                available,
            });
        }

        row.offering.tokens_reserved += tokens;
        row.holds.insert(reservation_id, Hold { tokens, expires_at });

        debug!(
            offering_id = %offering_id,
            reservation_id = %reservation_id,
            tokens,
            reserved = row.offering.tokens_reserved,
            "Supply held"
        );

        Ok(ReservationToken {
            reservation_id,
            offering_id,
            tokens,
            expires_at,
        })
    }

    async fn commit(
        &self,
        token: &ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        let mut row = self
            .rows
            .get_mut(&token.offering_id)
            .ok_or_else(|| Self::not_found(token.offering_id))?;

        if row.committed.contains(&token.reservation_id) {
            return Ok(());
        }

        let Some(hold) = row.holds.get(&token.reservation_id) else {
            // Released by cancellation or by the expiry sweep
            return Err(SettlementError::ReservationExpired);
        };
        if now > hold.expires_at {
            return Err(SettlementError::ReservationExpired);
        }
        let held = hold.tokens;

        row.holds.remove(&token.reservation_id);
        row.committed.insert(token.reservation_id);
        row.offering.tokens_reserved -= held;
        row.offering.tokens_sold += held;

        if row.offering.is_sold_out() && row.offering.status == OfferingStatus::Active {
            row.offering.status = OfferingStatus::Closed;
            info!(offering_id = %token.offering_id, "Offering sold out, closed");
        }

        debug_assert!(
            row.offering.tokens_sold + row.offering.tokens_reserved <= row.offering.total_supply
        );
        Ok(())
    }

    async fn release(&self, token: &ReservationToken) -> Result<ReleaseOutcome, SettlementError> {
        let mut row = self
            .rows
            .get_mut(&token.offering_id)
            .ok_or_else(|| Self::not_found(token.offering_id))?;

        match row.holds.remove(&token.reservation_id) {
            Some(hold) => {
                row.offering.tokens_reserved -= hold.tokens;
                debug!(
                    offering_id = %token.offering_id,
                    reservation_id = %token.reservation_id,
                    tokens = hold.tokens,
                    "Supply released"
                );
                Ok(ReleaseOutcome::Released)
            }
            None => Ok(ReleaseOutcome::NoOp),
        }
    }

    async fn transition(
        &self,
        offering_id: OfferingId,
        next: OfferingStatus,
    ) -> Result<Offering, SettlementError> {
        let mut row = self
            .rows
            .get_mut(&offering_id)
            .ok_or_else(|| Self::not_found(offering_id))?;

        let current = row.offering.status;
        if !current.can_transition_to(next) {
            return Err(SettlementError::InvalidStateTransition(format!(
                "offering {} -> {}",
                current, next
            )));
        }
        row.offering.status = next;
        info!(offering_id = %offering_id, from = %current, to = %next, "Offering status changed");
        Ok(row.offering.clone())
    }

    async fn record_investor(&self, offering_id: OfferingId) -> Result<(), SettlementError> {
        let mut row = self
            .rows
            .get_mut(&offering_id)
            .ok_or_else(|| Self::not_found(offering_id))?;
        row.offering.investor_count += 1;
        Ok(())
    }
}
