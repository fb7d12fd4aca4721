//! Supply Ledger
//!
//! Authoritative counters for each offering's finite token supply.
//!
//! # Invariant
//!
//! For every offering, at every observable instant:
//!
//! ```text
//! tokens_sold + tokens_reserved <= total_supply
//! ```
//!
//! Each counter mutation is a single atomic compare-and-update: a row lock
//! in [`MemorySupplyLedger`], a conditional `UPDATE` in [`PgSupplyLedger`].
//! A read-check-write across two statements is never used.
//!
//! Holds are tracked per reservation so that `commit` and `release` move
//! exactly the held quantity and are safe to repeat.

pub mod memory;
pub mod offering;
pub mod pg;

pub use memory::MemorySupplyLedger;
pub use offering::{Availability, Offering, OfferingStatus, OfferingTerms};
pub use pg::PgSupplyLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{OfferingId, ReservationId, TokenAmount};
use crate::error::SettlementError;

/// Proof that supply is held for one reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationToken {
    pub reservation_id: ReservationId,
    pub offering_id: OfferingId,
    pub tokens: TokenAmount,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of `release`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Held tokens returned to availability
    Released,
    /// Hold was already gone (released or committed); nothing changed
    NoOp,
}

/// Offering supply counters
#[async_trait]
pub trait SupplyLedger: Send + Sync {
    /// Create an offering with zeroed counters
    async fn register(
        &self,
        terms: OfferingTerms,
        now: DateTime<Utc>,
    ) -> Result<Offering, SettlementError>;

    async fn get(&self, offering_id: OfferingId) -> Result<Offering, SettlementError>;

    async fn list(&self) -> Result<Vec<Offering>, SettlementError>;

    /// Hold `tokens` until `expires_at`.
    ///
    /// # Errors
    /// - `OfferingClosed` if the offering is not active or `now` is outside
    ///   its investment window
    /// - `InsufficientSupply` if fewer than `tokens` are available
    async fn try_reserve(
        &self,
        offering_id: OfferingId,
        reservation_id: ReservationId,
        tokens: TokenAmount,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReservationToken, SettlementError>;

    /// Move held tokens from reserved to sold.
    ///
    /// Repeating a successful commit is a no-op. Committing after
    /// `expires_at`, or after the hold was released, fails with
    /// `ReservationExpired`. Selling the last token closes the offering.
    async fn commit(
        &self,
        token: &ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError>;

    /// Return held tokens to availability (idempotent)
    async fn release(&self, token: &ReservationToken) -> Result<ReleaseOutcome, SettlementError>;

    /// Move the offering's status forward
    async fn transition(
        &self,
        offering_id: OfferingId,
        next: OfferingStatus,
    ) -> Result<Offering, SettlementError>;

    /// Count one more distinct investor
    async fn record_investor(&self, offering_id: OfferingId) -> Result<(), SettlementError>;

    async fn availability(&self, offering_id: OfferingId) -> Result<Availability, SettlementError> {
        let offering = self.get(offering_id).await?;
        Ok(Availability::from(&offering))
    }
}

/// Validate registration terms
pub(crate) fn validate_terms(terms: &OfferingTerms) -> Result<(), SettlementError> {
    use rust_decimal::Decimal;

    if terms.total_supply == 0 {
        return Err(SettlementError::Validation(
            "total_supply must be positive".into(),
        ));
    }
    if terms.price_per_token <= Decimal::ZERO {
        return Err(SettlementError::Validation(
            "price_per_token must be positive".into(),
        ));
    }
    if terms.min_investment.is_sign_negative() {
        return Err(SettlementError::Validation(
            "min_investment must not be negative".into(),
        ));
    }
    if let Some(max) = terms.max_investment
        && max < terms.min_investment
    {
        return Err(SettlementError::Validation(
            "max_investment is below min_investment".into(),
        ));
    }
    if terms.min_tokens_per_purchase == 0 {
        return Err(SettlementError::Validation(
            "min_tokens_per_purchase must be positive".into(),
        ));
    }
    if let Some(max) = terms.max_tokens_per_purchase
        && max < terms.min_tokens_per_purchase
    {
        return Err(SettlementError::Validation(
            "max_tokens_per_purchase is below min_tokens_per_purchase".into(),
        ));
    }
    if terms.window_end <= terms.window_start {
        return Err(SettlementError::Validation(
            "investment window ends before it starts".into(),
        ));
    }
    if terms.status.is_terminal() {
        return Err(SettlementError::Validation(format!(
            "cannot register an offering as {}",
            terms.status
        )));
    }
    Ok(())
}
