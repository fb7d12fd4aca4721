//! External Collaborators
//!
//! Narrow capability interfaces for everything the settlement core does NOT
//! own: payment capture, the token ledger, the payout rail and user
//! notifications.
//!
//! # Contract
//!
//! - Collaborators are never the source of truth for financial state.
//!   A failing collaborator call leaves the core's records consistent and
//!   is retried out-of-band.
//! - Every mutating call carries a caller-chosen reference so that a
//!   retried call is idempotent on the collaborator's side.
//!
//! Each trait has a deterministic fake in [`fake`] and a real HTTP
//! implementation ([`paystack`], [`ledger_gateway`]).

pub mod fake;
pub mod ledger_gateway;
pub mod paystack;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core_types::{Money, UserId};

/// Collaborator failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Transient: network failure, 5xx, rate limit. Safe to retry.
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    /// The collaborator explicitly refused the operation
    #[error("{service} rejected the request: {reason}")]
    Rejected { service: &'static str, reason: String },

    /// No answer within the caller's deadline; outcome unknown
    #[error("{service} timed out after {millis}ms")]
    Timeout { service: &'static str, millis: u64 },
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, reason: impl ToString) -> Self {
        CollaboratorError::Unavailable {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn rejected(service: &'static str, reason: impl ToString) -> Self {
        CollaboratorError::Rejected {
            service,
            reason: reason.to_string(),
        }
    }

    /// Check if the outcome is unknown and the call may be repeated
    pub fn is_transient(&self) -> bool {
        !matches!(self, CollaboratorError::Rejected { .. })
    }
}

// ============================================================================
// Payment Processor
// ============================================================================

/// Verified status of a payment reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Success,
    Failed,
}

/// Result of `PaymentProcessor::verify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub status: VerificationStatus,
    pub amount_minor: u64,
    pub currency: String,
}

impl PaymentVerification {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == VerificationStatus::Success
    }
}

/// Card/bank payment capture
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Get processor name for logging
    fn name(&self) -> &'static str;

    /// Start a checkout; returns the URL the investor completes payment at
    async fn initialize(
        &self,
        email: &str,
        amount_minor: u64,
        reference: &str,
    ) -> Result<String, CollaboratorError>;

    /// Ask the processor whether `reference` was captured
    async fn verify(&self, reference: &str) -> Result<PaymentVerification, CollaboratorError>;

    /// Return captured funds; returns the processor's refund reference
    async fn refund(&self, reference: &str, amount_minor: u64)
    -> Result<String, CollaboratorError>;
}

// ============================================================================
// Ledger Service (token ledger + consensus audit topic)
// ============================================================================

#[async_trait]
pub trait LedgerService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mint `amount` tokens; returns the ledger transaction ID
    async fn mint(
        &self,
        token_id: &str,
        amount: u64,
        authority: &str,
    ) -> Result<String, CollaboratorError>;

    /// Transfer tokens between ledger accounts; returns the transaction ID
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        token_id: &str,
        amount: u64,
    ) -> Result<String, CollaboratorError>;

    /// Append an audit record to a topic; returns its sequence number
    async fn record_audit_message(
        &self,
        topic_id: &str,
        payload: &serde_json::Value,
    ) -> Result<u64, CollaboratorError>;
}

// ============================================================================
// Payout Gateway (bank-transfer rail)
// ============================================================================

/// Payout acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    /// Rail-side transaction reference
    pub reference: String,
    /// True when the rail reports the funds as settled on the recipient side
    pub settled: bool,
}

/// Moves money out of the platform (dividends, treasury withdrawals)
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pay `amount` to `recipient`.
    ///
    /// # Idempotency
    /// A repeated call with the same `reference` must not pay twice.
    async fn pay(
        &self,
        recipient: &UserId,
        amount: Money,
        currency: &str,
        reference: &str,
    ) -> Result<PayoutReceipt, CollaboratorError>;
}

// ============================================================================
// Notification Sink
// ============================================================================

/// User-facing notice kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InvestmentConfirmed,
    InvestmentFailed,
    InvestmentRefunded,
    DividendPaid,
    DividendFailed,
    ApprovalRequested,
    ApprovalExecuted,
    ApprovalRejected,
    ProposalFinalized,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::InvestmentConfirmed => "investment_confirmed",
            NotificationKind::InvestmentFailed => "investment_failed",
            NotificationKind::InvestmentRefunded => "investment_refunded",
            NotificationKind::DividendPaid => "dividend_paid",
            NotificationKind::DividendFailed => "dividend_failed",
            NotificationKind::ApprovalRequested => "approval_requested",
            NotificationKind::ApprovalExecuted => "approval_executed",
            NotificationKind::ApprovalRejected => "approval_rejected",
            NotificationKind::ProposalFinalized => "proposal_finalized",
        }
    }
}

/// Fire-and-forget user notices. Implementations must not block or fail.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, user: &UserId, kind: NotificationKind, payload: serde_json::Value);
}

/// Notification sink that only logs
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, user: &UserId, kind: NotificationKind, payload: serde_json::Value) {
        info!(user = %user, kind = kind.as_str(), payload = %payload, "notification");
    }
}
