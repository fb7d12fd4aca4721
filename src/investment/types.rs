//! Investment records and requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{InvestmentState, PaymentStatus, RefundStatus, TokenTransferStatus};
use crate::core_types::{InvestmentId, Money, OfferingId, ReservationId, TokenAmount, UserId};

/// Failure reason recorded when the hold lapsed before payment confirmed
pub const REASON_RESERVATION_EXPIRED: &str = "RESERVATION_EXPIRED";
pub const REASON_PAYMENT_FAILED: &str = "PAYMENT_VERIFICATION_FAILED";
pub const REASON_AMOUNT_MISMATCH: &str = "PAYMENT_AMOUNT_MISMATCH";
pub const REASON_CANCELLED: &str = "CANCELLED";
pub const REASON_CHECKOUT_FAILED: &str = "CHECKOUT_INITIALIZATION_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Crypto,
}

impl PaymentMethod {
    /// Captured through the payment processor checkout
    #[inline]
    pub fn uses_checkout(&self) -> bool {
        matches!(self, PaymentMethod::Card | PaymentMethod::BankTransfer)
    }
}

/// Request to buy into an offering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceInvestment {
    pub investor_id: UserId,
    pub offering_id: OfferingId,
    /// Amount the investor wants to invest, in major units
    pub amount: Money,
    pub payment_method: PaymentMethod,
    /// Required for checkout-based methods
    #[serde(default)]
    pub email: Option<String>,
}

/// Ledger-side delivery bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryTracking {
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Ledger transaction of the token transfer, once it succeeded
    pub transaction_id: Option<String>,
    /// Audit topic sequence number, once recorded
    pub audit_sequence: Option<u64>,
}

/// Refund bookkeeping for captured funds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundTracking {
    pub status: RefundStatus,
    pub amount_minor: u64,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub processor_reference: Option<String>,
    pub last_error: Option<String>,
}

impl RefundTracking {
    pub fn scheduled(amount_minor: u64, at: DateTime<Utc>) -> Self {
        Self {
            status: RefundStatus::Scheduled,
            amount_minor,
            attempts: 0,
            next_attempt_at: Some(at),
            processor_reference: None,
            last_error: None,
        }
    }
}

/// One purchase attempt by one investor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub investor_id: UserId,
    pub offering_id: OfferingId,
    pub reservation_id: ReservationId,
    /// As entered by the investor
    pub amount_requested: Money,
    /// `tokens_requested × price_per_token`; what the processor must capture
    pub amount_due: Money,
    pub tokens_requested: TokenAmount,
    /// Zero until confirmed
    pub tokens_allocated: TokenAmount,
    pub payment_method: PaymentMethod,
    pub state: InvestmentState,
    /// Processor reference; unique per investment
    pub payment_reference: String,
    pub authorization_url: Option<String>,
    pub failure_reason: Option<String>,
    /// Minor units the processor reported as captured
    pub amount_captured_minor: Option<u64>,
    pub token_transfer_status: TokenTransferStatus,
    pub delivery: DeliveryTracking,
    pub refund: Option<RefundTracking>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Investment {
    #[inline]
    pub fn payment_status(&self) -> PaymentStatus {
        self.state.payment_status()
    }

    pub fn reference_for(id: InvestmentId) -> String {
        format!("INV-{}", id)
    }
}
