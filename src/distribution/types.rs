//! Dividend distribution records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{DistributionId, Money, OfferingId, PaymentId, TokenAmount, UserId};

/// Distribution status
///
/// `Pending → Processing → Completed`; a completed distribution with failed
/// rows goes back through `Processing` on retry. `Failed` is set only by an
/// operator abandoning the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Pending => "pending",
            DistributionStatus::Processing => "processing",
            DistributionStatus::Completed => "completed",
            DistributionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-recipient payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRowStatus {
    Pending,
    /// Accepted by the payout rail, not yet settled
    Sent,
    /// Settled on the recipient side
    Received,
    Failed,
}

impl PaymentRowStatus {
    #[inline]
    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentRowStatus::Sent | PaymentRowStatus::Received)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DividendDistribution {
    pub id: DistributionId,
    pub offering_id: OfferingId,
    pub per_token_amount: Money,
    pub withholding_rate: Decimal,
    pub currency: String,
    /// Σ gross
    pub total_amount: Money,
    pub total_tax: Money,
    pub total_net: Money,
    /// Snapshot instant
    pub distribution_date: DateTime<Utc>,
    pub status: DistributionStatus,
    pub total_recipients: u64,
    /// Monotonic
    pub successful_payments: u64,
    /// Monotonic
    pub failed_payments: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DividendPayment {
    pub id: PaymentId,
    pub distribution_id: DistributionId,
    pub recipient_id: UserId,
    pub tokens_held_at_snapshot: TokenAmount,
    pub gross_amount: Money,
    pub tax_withheld: Money,
    pub net_amount: Money,
    pub status: PaymentRowStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub transaction_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl DividendPayment {
    /// Idempotency key handed to the payout rail
    pub fn payout_reference(&self) -> String {
        format!("DIV-{}-{}", self.distribution_id, self.id)
    }
}

/// Outcome of one payout attempt
#[derive(Debug, Clone)]
pub(crate) enum PayoutOutcome {
    Paid { reference: String, settled: bool },
    Failed(String),
}
