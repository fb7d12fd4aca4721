//! Investment Service
//!
//! Drives the investment FSM: validation and reservation on placement,
//! payment reconciliation on confirmation, and best-effort delivery of
//! tokens on the ledger afterwards.
//!
//! # Ordering on confirmation
//!
//! 1. Verify with the processor (transient errors change nothing)
//! 2. Commit the reservation (the CAS that decides confirmation vs expiry)
//! 3. Persist `Confirmed`, allocate tokens, upsert the holding
//! 4. Ledger transfer + audit message; outcome goes to `token_transfer_status`
//!
//! Ledger Service failures never fail a confirmation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::holdings::HoldingStore;
use super::state::{InvestmentState, RefundStatus, TokenTransferStatus};
use super::store::InvestmentStore;
use super::types::{
    DeliveryTracking, Investment, PlaceInvestment, REASON_AMOUNT_MISMATCH, REASON_CANCELLED,
    REASON_CHECKOUT_FAILED, REASON_PAYMENT_FAILED, REASON_RESERVATION_EXPIRED, RefundTracking,
};
use crate::clock::TimeSource;
use crate::collaborators::{
    CollaboratorError, LedgerService, NotificationKind, NotificationSink, PaymentProcessor,
};
use crate::core_types::{InvestmentId, UserId};
use crate::error::SettlementError;
use crate::ledger::{Offering, SupplyLedger};
use crate::money::{cost_of, from_minor_units, to_minor_units, tokens_for_amount};
use crate::reservation::{ReleaseReason, ReservationManager};

/// Settings the investment service needs from configuration
#[derive(Debug, Clone)]
pub struct InvestmentSettings {
    pub currency: String,
    pub currency_decimals: u32,
    /// Ledger account tokens are transferred out of
    pub treasury_account: String,
    pub audit_topic_id: String,
    pub delivery_retry_base: Duration,
    pub delivery_max_attempts: u32,
}

impl Default for InvestmentSettings {
    fn default() -> Self {
        Self {
            currency: "NGN".to_string(),
            currency_decimals: 2,
            treasury_account: "0.0.1001".to_string(),
            audit_topic_id: "0.0.2002".to_string(),
            delivery_retry_base: Duration::seconds(5),
            delivery_max_attempts: 8,
        }
    }
}

/// Exponential backoff: `base × 2^(attempts-1)`, capped at 2^10
pub(crate) fn backoff(base: Duration, attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(10);
    base * (1i32 << exp)
}

pub struct InvestmentService {
    reservations: Arc<ReservationManager>,
    store: Arc<InvestmentStore>,
    holdings: Arc<HoldingStore>,
    payments: Arc<dyn PaymentProcessor>,
    ledger_service: Arc<dyn LedgerService>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn TimeSource>,
    settings: InvestmentSettings,
}

impl InvestmentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reservations: Arc<ReservationManager>,
        store: Arc<InvestmentStore>,
        holdings: Arc<HoldingStore>,
        payments: Arc<dyn PaymentProcessor>,
        ledger_service: Arc<dyn LedgerService>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn TimeSource>,
        settings: InvestmentSettings,
    ) -> Self {
        Self {
            reservations,
            store,
            holdings,
            payments,
            ledger_service,
            notifier,
            clock,
            settings,
        }
    }

    fn supply(&self) -> &Arc<dyn SupplyLedger> {
        self.reservations.ledger()
    }

    pub fn store(&self) -> &Arc<InvestmentStore> {
        &self.store
    }

    pub fn holdings(&self) -> &Arc<HoldingStore> {
        &self.holdings
    }

    pub fn get(&self, id: InvestmentId) -> Result<Investment, SettlementError> {
        self.store.get(id)
    }

    // ========================================================================
    // Placement
    // ========================================================================

    /// Validate the request against the offering's terms and compute tokens
    fn validate_purchase(
        &self,
        offering: &Offering,
        req: &PlaceInvestment,
        now: DateTime<Utc>,
    ) -> Result<u64, SettlementError> {
        if req.amount <= Decimal::ZERO {
            return Err(SettlementError::Validation("amount must be positive".into()));
        }
        if let Some(reason) = offering.closed_reason(now) {
            return Err(SettlementError::OfferingClosed(reason));
        }
        if req.amount < offering.min_investment {
            return Err(SettlementError::Validation(format!(
                "amount {} is below the minimum investment {}",
                req.amount, offering.min_investment
            )));
        }
        if let Some(max) = offering.max_investment
            && req.amount > max
        {
            return Err(SettlementError::Validation(format!(
                "amount {} exceeds the maximum investment {}",
                req.amount, max
            )));
        }

        let tokens = tokens_for_amount(req.amount, offering.price_per_token)?;
        if tokens == 0 || tokens < offering.min_tokens_per_purchase {
            return Err(SettlementError::Validation(format!(
                "amount buys {} tokens, minimum per purchase is {}",
                tokens, offering.min_tokens_per_purchase
            )));
        }
        if let Some(max) = offering.max_tokens_per_purchase
            && tokens > max
        {
            return Err(SettlementError::Validation(format!(
                "amount buys {} tokens, maximum per purchase is {}",
                tokens, max
            )));
        }

        if req.payment_method.uses_checkout()
            && req.email.as_deref().is_none_or(|e| e.trim().is_empty())
        {
            return Err(SettlementError::Validation(
                "email is required for checkout payments".into(),
            ));
        }
        Ok(tokens)
    }

    /// Reserve supply and open a payment for a new investment.
    ///
    /// # Errors
    /// `Validation`, `OfferingClosed`, `InsufficientSupply`; a checkout that
    /// cannot be initialized releases the reservation and returns
    /// `Collaborator`.
    pub async fn place_investment(
        &self,
        req: PlaceInvestment,
    ) -> Result<Investment, SettlementError> {
        let now = self.clock.now();
        let offering = self.supply().get(req.offering_id).await?;
        let tokens = self.validate_purchase(&offering, &req, now)?;
        let amount_due = cost_of(tokens, offering.price_per_token)?;
        let amount_minor = to_minor_units(amount_due, self.settings.currency_decimals)?;

        let id = InvestmentId::new();
        let reservation = self
            .reservations
            .reserve(id, req.offering_id, tokens)
            .await?;

        let investment = Investment {
            id,
            investor_id: req.investor_id.clone(),
            offering_id: req.offering_id,
            reservation_id: reservation.id,
            amount_requested: req.amount,
            amount_due,
            tokens_requested: tokens,
            tokens_allocated: 0,
            payment_method: req.payment_method,
            state: InvestmentState::Created,
            payment_reference: Investment::reference_for(id),
            authorization_url: None,
            failure_reason: None,
            amount_captured_minor: None,
            token_transfer_status: TokenTransferStatus::NotStarted,
            delivery: DeliveryTracking::default(),
            refund: None,
            created_at: now,
            confirmed_at: None,
            failed_at: None,
            refunded_at: None,
        };
        let reference = investment.payment_reference.clone();
        self.store.insert(investment);

        let mut authorization_url = None;
        if req.payment_method.uses_checkout() {
            let email = req.email.as_deref().unwrap_or_default();
            match self.payments.initialize(email, amount_minor, &reference).await {
                Ok(url) => authorization_url = Some(url),
                Err(e) => {
                    warn!(investment_id = %id, error = %e, "Checkout initialization failed");
                    self.reservations
                        .release_with(reservation.id, ReleaseReason::PaymentFailed)
                        .await?;
                    self.mark_failed(id, REASON_CHECKOUT_FAILED, None)?;
                    return Err(e.into());
                }
            }
        }

        let placed = self.store.update(id, |inv| {
            inv.state = InvestmentState::AwaitingPayment;
            inv.authorization_url = authorization_url;
        })?;

        info!(
            investment_id = %id,
            investor = %req.investor_id,
            offering_id = %req.offering_id,
            tokens,
            amount_due = %amount_due,
            method = ?req.payment_method,
            "Investment placed"
        );
        Ok(placed)
    }

    // ========================================================================
    // Confirmation
    // ========================================================================

    /// Reconcile a payment notification for an investment.
    ///
    /// Idempotent: a redelivered notification for a confirmed investment
    /// returns the existing record without touching counters. Concurrent
    /// redeliveries for the same investment are serialized.
    pub async fn confirm_payment(
        &self,
        id: InvestmentId,
        reference: &str,
    ) -> Result<Investment, SettlementError> {
        let lock = self.store.lock(id);
        let _guard = lock.lock().await;

        let inv = self.store.get(id)?;
        if inv.payment_reference != reference {
            return Err(SettlementError::Validation(
                "payment reference does not match investment".into(),
            ));
        }

        match inv.state {
            InvestmentState::Confirmed | InvestmentState::Refunded => {
                debug!(investment_id = %id, state = %inv.state, "Duplicate confirmation ignored");
                return Ok(inv);
            }
            InvestmentState::Failed => return self.handle_late_payment(inv).await,
            InvestmentState::Created | InvestmentState::AwaitingPayment => {}
        }

        // 1. Verify
        let verification = self.payments.verify(reference).await.map_err(|e| {
            warn!(investment_id = %id, error = %e, "Payment verification unavailable");
            SettlementError::from(e)
        })?;

        if !verification.is_success() {
            self.reservations
                .release_with(inv.reservation_id, ReleaseReason::PaymentFailed)
                .await?;
            self.mark_failed(id, REASON_PAYMENT_FAILED, None)?;
            return Err(SettlementError::PaymentVerificationFailed(
                "processor reported the charge as failed".into(),
            ));
        }

        let expected_minor = to_minor_units(inv.amount_due, self.settings.currency_decimals)?;
        let currency_ok = verification
            .currency
            .eq_ignore_ascii_case(&self.settings.currency);
        if verification.amount_minor != expected_minor || !currency_ok {
            warn!(
                investment_id = %id,
                expected_minor,
                captured_minor = verification.amount_minor,
                currency = %verification.currency,
                "Captured amount does not match amount due"
            );
            self.reservations
                .release_with(inv.reservation_id, ReleaseReason::PaymentFailed)
                .await?;
            self.mark_failed(id, REASON_AMOUNT_MISMATCH, Some(verification.amount_minor))?;
            return Err(SettlementError::PaymentVerificationFailed(format!(
                "captured {} {} minor units, expected {} {}",
                verification.amount_minor,
                verification.currency,
                expected_minor,
                self.settings.currency
            )));
        }

        // 2. Commit the reservation
        match self.reservations.confirm(inv.reservation_id).await {
            Ok(_) => {}
            Err(SettlementError::ReservationExpired) => {
                self.mark_failed(id, REASON_RESERVATION_EXPIRED, Some(verification.amount_minor))?;
                return Err(SettlementError::ReservationExpired);
            }
            Err(e) => return Err(e),
        }

        // 3. Persist
        let now = self.clock.now();
        let confirmed = self.store.update(id, |inv| {
            inv.state = InvestmentState::Confirmed;
            inv.tokens_allocated = inv.tokens_requested;
            inv.amount_captured_minor = Some(verification.amount_minor);
            inv.confirmed_at = Some(now);
            inv.token_transfer_status = TokenTransferStatus::Pending;
        })?;

        let first = self.holdings.apply_purchase(
            &confirmed.investor_id,
            confirmed.offering_id,
            confirmed.tokens_allocated,
            confirmed.amount_due,
            now,
        );
        if first && let Err(e) = self.supply().record_investor(confirmed.offering_id).await {
            warn!(offering_id = %confirmed.offering_id, error = %e, "Failed to count investor");
        }

        info!(
            investment_id = %id,
            tokens = confirmed.tokens_allocated,
            "Investment confirmed"
        );
        self.notifier.notify(
            &confirmed.investor_id,
            NotificationKind::InvestmentConfirmed,
            json!({
                "investment_id": id.to_string(),
                "tokens": confirmed.tokens_allocated,
                "amount": confirmed.amount_due.to_string(),
            }),
        );

        // 4. Deliver (best effort)
        self.deliver_tokens(id).await;
        self.store.get(id)
    }

    /// A payment arrived for an investment that already failed.
    ///
    /// Funds the processor captured are scheduled for refund once.
    async fn handle_late_payment(&self, inv: Investment) -> Result<Investment, SettlementError> {
        let failure = match inv.failure_reason.as_deref() {
            Some(REASON_RESERVATION_EXPIRED) => SettlementError::ReservationExpired,
            Some(reason) => SettlementError::PaymentVerificationFailed(reason.to_string()),
            None => SettlementError::InvalidStateTransition("investment already failed".into()),
        };
        if inv.refund.is_some() {
            return Err(failure);
        }

        let verification = self.payments.verify(&inv.payment_reference).await?;
        if verification.is_success() {
            let now = self.clock.now();
            self.store.update(inv.id, |record| {
                record.amount_captured_minor = Some(verification.amount_minor);
                record.refund = Some(RefundTracking::scheduled(verification.amount_minor, now));
            })?;
            info!(
                investment_id = %inv.id,
                amount_minor = verification.amount_minor,
                "Late payment captured for failed investment, refund scheduled"
            );
        }
        Err(failure)
    }

    /// Move an open investment to `Failed`. Captured funds schedule a refund.
    fn mark_failed(
        &self,
        id: InvestmentId,
        reason: &str,
        captured_minor: Option<u64>,
    ) -> Result<Investment, SettlementError> {
        let now = self.clock.now();
        let mut transitioned = false;
        let failed = self.store.update(id, |inv| {
            if inv.state.is_open() {
                transitioned = true;
                inv.state = InvestmentState::Failed;
                inv.failed_at = Some(now);
                inv.failure_reason = Some(reason.to_string());
            }
            if let Some(minor) = captured_minor
                && inv.refund.is_none()
            {
                inv.amount_captured_minor = Some(minor);
                inv.refund = Some(RefundTracking::scheduled(minor, now));
            }
        })?;

        if !transitioned {
            return Ok(failed);
        }
        info!(investment_id = %id, reason, "Investment failed");
        self.notifier.notify(
            &failed.investor_id,
            NotificationKind::InvestmentFailed,
            json!({ "investment_id": id.to_string(), "reason": reason }),
        );
        Ok(failed)
    }

    // ========================================================================
    // Cancellation, expiry, refunds
    // ========================================================================

    /// Investor abandons an unpaid investment
    pub async fn cancel_investment(
        &self,
        id: InvestmentId,
        investor: &UserId,
    ) -> Result<Investment, SettlementError> {
        let lock = self.store.lock(id);
        let _guard = lock.lock().await;

        let inv = self.store.get(id)?;
        if &inv.investor_id != investor {
            return Err(SettlementError::Unauthorized);
        }
        if !inv.state.is_open() {
            return Err(SettlementError::InvalidStateTransition(format!(
                "cannot cancel a {} investment",
                inv.state
            )));
        }
        self.reservations.release(inv.reservation_id).await?;
        self.mark_failed(id, REASON_CANCELLED, None)
    }

    /// Release overdue reservations and fail their investments.
    ///
    /// Returns the number of investments failed.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> usize {
        let expired = self.reservations.expire_overdue(now).await;
        let mut failed = 0;
        for reservation in expired {
            let id = reservation.investment_id;
            let open = self.store.get(id).map(|inv| inv.state.is_open()).unwrap_or(false);
            if !open {
                continue;
            }
            match self.mark_failed(id, REASON_RESERVATION_EXPIRED, None) {
                Ok(_) => failed += 1,
                Err(e) => error!(investment_id = %id, error = %e, "Failed to mark investment expired"),
            }
        }
        failed
    }

    /// Administrative reversal of a confirmed investment.
    ///
    /// The holding is reduced and captured funds refunded. `tokens_sold` is
    /// monotonic, so the offering's supply is not restored.
    pub async fn refund_investment(
        &self,
        id: InvestmentId,
        reason: &str,
    ) -> Result<Investment, SettlementError> {
        let lock = self.store.lock(id);
        let _guard = lock.lock().await;

        let inv = self.store.get(id)?;
        if !inv.state.can_transition_to(InvestmentState::Refunded) {
            return Err(SettlementError::InvalidStateTransition(format!(
                "cannot refund a {} investment",
                inv.state
            )));
        }

        let now = self.clock.now();
        let amount_minor = match inv.amount_captured_minor {
            Some(minor) => minor,
            None => to_minor_units(inv.amount_due, self.settings.currency_decimals)?,
        };

        self.holdings.apply_refund(
            &inv.investor_id,
            inv.offering_id,
            inv.tokens_allocated,
            inv.amount_due,
            now,
        );
        let reason_owned = reason.to_string();
        self.store.update(id, |record| {
            record.state = InvestmentState::Refunded;
            record.refunded_at = Some(now);
            record.failure_reason = Some(reason_owned);
            record.refund = Some(RefundTracking::scheduled(amount_minor, now));
        })?;

        info!(investment_id = %id, amount_minor, reason, "Investment refunded");
        self.notifier.notify(
            &inv.investor_id,
            NotificationKind::InvestmentRefunded,
            json!({
                "investment_id": id.to_string(),
                "amount": from_minor_units(amount_minor, self.settings.currency_decimals).to_string(),
            }),
        );

        self.attempt_refund(id).await;
        self.store.get(id)
    }

    /// Retry a scheduled refund under the investment's lock
    pub async fn retry_refund(&self, id: InvestmentId) -> Option<RefundStatus> {
        let lock = self.store.lock(id);
        let _guard = lock.lock().await;
        self.attempt_refund(id).await
    }

    /// Attempt one scheduled refund. Caller holds the investment's lock.
    async fn attempt_refund(&self, id: InvestmentId) -> Option<RefundStatus> {
        let inv = self.store.get(id).ok()?;
        let refund = inv.refund.as_ref()?;
        if refund.status != RefundStatus::Scheduled {
            return Some(refund.status);
        }

        let result = self
            .payments
            .refund(&inv.payment_reference, refund.amount_minor)
            .await;
        let now = self.clock.now();
        let base = self.settings.delivery_retry_base;
        let max_attempts = self.settings.delivery_max_attempts;

        let updated = self
            .store
            .update(id, |record| {
                let Some(refund) = record.refund.as_mut() else {
                    return;
                };
                refund.attempts += 1;
                match &result {
                    Ok(processor_reference) => {
                        refund.status = RefundStatus::Completed;
                        refund.processor_reference = Some(processor_reference.clone());
                        refund.next_attempt_at = None;
                    }
                    Err(e) => {
                        refund.last_error = Some(e.to_string());
                        if refund.attempts >= max_attempts {
                            refund.status = RefundStatus::Failed;
                            refund.next_attempt_at = None;
                        } else {
                            refund.next_attempt_at = Some(now + backoff(base, refund.attempts));
                        }
                    }
                }
            })
            .ok()?;

        if let Err(e) = &result {
            warn!(investment_id = %id, error = %e, "Refund attempt failed");
        }
        updated.refund.map(|r| r.status)
    }

    // ========================================================================
    // Token delivery
    // ========================================================================

    /// Transfer allocated tokens on the ledger and record the audit message.
    ///
    /// Each step is skipped once it has succeeded, so retries never transfer
    /// twice. Failures reschedule with exponential backoff until
    /// `delivery_max_attempts`, then park as `Failed`.
    pub async fn deliver_tokens(&self, id: InvestmentId) -> TokenTransferStatus {
        let inv = match self.store.get(id) {
            Ok(inv) => inv,
            Err(_) => return TokenTransferStatus::NotStarted,
        };
        if inv.state != InvestmentState::Confirmed
            || inv.token_transfer_status == TokenTransferStatus::Completed
        {
            return inv.token_transfer_status;
        }

        let outcome = self.run_delivery(&inv).await;
        let now = self.clock.now();
        let base = self.settings.delivery_retry_base;
        let max_attempts = self.settings.delivery_max_attempts;

        let updated = self.store.update(id, |record| {
            let (transaction_id, audit_sequence, failure) = &outcome;
            if let Some(tx) = transaction_id {
                record.delivery.transaction_id = Some(tx.clone());
            }
            if let Some(seq) = audit_sequence {
                record.delivery.audit_sequence = Some(*seq);
            }
            match failure {
                None => {
                    record.token_transfer_status = TokenTransferStatus::Completed;
                    record.delivery.next_attempt_at = None;
                    record.delivery.last_error = None;
                }
                Some(e) => {
                    record.delivery.attempts += 1;
                    record.delivery.last_error = Some(e.to_string());
                    if record.delivery.attempts >= max_attempts {
                        record.token_transfer_status = TokenTransferStatus::Failed;
                        record.delivery.next_attempt_at = None;
                    } else {
                        record.token_transfer_status = TokenTransferStatus::Pending;
                        record.delivery.next_attempt_at =
                            Some(now + backoff(base, record.delivery.attempts));
                    }
                }
            }
        });

        match updated {
            Ok(record) => {
                if let Some(e) = &outcome.2 {
                    warn!(
                        investment_id = %id,
                        attempts = record.delivery.attempts,
                        status = ?record.token_transfer_status,
                        error = %SettlementError::LedgerServiceUnavailable(e.to_string()),
                        "Token delivery failed"
                    );
                } else {
                    info!(investment_id = %id, tx = ?record.delivery.transaction_id, "Tokens delivered");
                }
                record.token_transfer_status
            }
            Err(_) => TokenTransferStatus::NotStarted,
        }
    }

    /// Returns (transfer tx, audit sequence, first failure)
    async fn run_delivery(
        &self,
        inv: &Investment,
    ) -> (Option<String>, Option<u64>, Option<CollaboratorError>) {
        let mut transaction_id = inv.delivery.transaction_id.clone();
        let mut audit_sequence = inv.delivery.audit_sequence;

        let token_id = match self.supply().get(inv.offering_id).await {
            Ok(offering) => offering.token_id,
            Err(e) => {
                return (
                    None,
                    None,
                    Some(CollaboratorError::unavailable("supply-ledger", e)),
                );
            }
        };

        if transaction_id.is_none() {
            match self
                .ledger_service
                .transfer(
                    &self.settings.treasury_account,
                    inv.investor_id.as_str(),
                    &token_id,
                    inv.tokens_allocated,
                )
                .await
            {
                Ok(tx) => transaction_id = Some(tx),
                Err(e) => return (None, None, Some(e)),
            }
        }

        if audit_sequence.is_none() {
            let message = json!({
                "type": "investment_confirmed",
                "investment_id": inv.id.to_string(),
                "offering_id": inv.offering_id.to_string(),
                "investor_id": inv.investor_id.as_str(),
                "tokens": inv.tokens_allocated,
                "amount": inv.amount_due.to_string(),
                "transaction_id": transaction_id,
            });
            match self
                .ledger_service
                .record_audit_message(&self.settings.audit_topic_id, &message)
                .await
            {
                Ok(seq) => audit_sequence = Some(seq),
                Err(e) => return (transaction_id, None, Some(e)),
            }
        }

        (transaction_id, audit_sequence, None)
    }

    /// Retry delivery for one investment under its lock
    pub async fn retry_delivery(&self, id: InvestmentId) -> TokenTransferStatus {
        let lock = self.store.lock(id);
        let _guard = lock.lock().await;
        self.deliver_tokens(id).await
    }

    /// Put a parked (`Failed`) delivery back in the retry queue
    pub fn requeue_delivery(&self, id: InvestmentId) -> Result<Investment, SettlementError> {
        let inv = self.store.get(id)?;
        if inv.token_transfer_status != TokenTransferStatus::Failed {
            return Err(SettlementError::InvalidStateTransition(format!(
                "token transfer is {:?}",
                inv.token_transfer_status
            )));
        }
        self.store.update(id, |record| {
            record.token_transfer_status = TokenTransferStatus::Pending;
            record.delivery.attempts = 0;
            record.delivery.next_attempt_at = None;
        })
    }
}
