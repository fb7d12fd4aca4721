//! Investment FSM State Definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Investment FSM states
///
/// ```text
/// Created ──► AwaitingPayment ──► Confirmed ──► Refunded
///    │               │
///    └───────────────┴──► Failed
/// ```
///
/// Terminal: Failed, Refunded. `Confirmed → Refunded` is administrative only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentState {
    /// Supply reserved, checkout not yet started
    Created,
    /// Waiting for the processor to confirm capture
    AwaitingPayment,
    /// Payment captured and tokens allocated
    Confirmed,
    /// Terminal: payment never completed
    Failed,
    /// Terminal: confirmed investment reversed by an operator
    Refunded,
}

impl InvestmentState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvestmentState::Failed | InvestmentState::Refunded)
    }

    /// Still waiting on payment
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            InvestmentState::Created | InvestmentState::AwaitingPayment
        )
    }

    pub fn can_transition_to(&self, next: InvestmentState) -> bool {
        use InvestmentState::*;
        matches!(
            (self, next),
            (Created, AwaitingPayment)
                | (Created, Confirmed)
                | (Created, Failed)
                | (AwaitingPayment, Confirmed)
                | (AwaitingPayment, Failed)
                | (Confirmed, Refunded)
        )
    }

    /// Payment status as reported to investors
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            InvestmentState::Created | InvestmentState::AwaitingPayment => PaymentStatus::Pending,
            InvestmentState::Confirmed => PaymentStatus::Confirmed,
            InvestmentState::Failed => PaymentStatus::Failed,
            InvestmentState::Refunded => PaymentStatus::Refunded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentState::Created => "created",
            InvestmentState::AwaitingPayment => "awaiting_payment",
            InvestmentState::Confirmed => "confirmed",
            InvestmentState::Failed => "failed",
            InvestmentState::Refunded => "refunded",
        }
    }
}

impl fmt::Display for InvestmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
    Refunded,
}

/// Progress of the on-ledger token transfer after confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTransferStatus {
    NotStarted,
    /// Awaiting (re)delivery
    Pending,
    Completed,
    /// Retries exhausted; needs an operator
    Failed,
}

/// Refund of captured funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Scheduled,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use InvestmentState::*;
        assert!(Created.can_transition_to(AwaitingPayment));
        assert!(AwaitingPayment.can_transition_to(Confirmed));
        assert!(AwaitingPayment.can_transition_to(Failed));
        assert!(Confirmed.can_transition_to(Refunded));

        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Confirmed));
        assert!(!Refunded.can_transition_to(Confirmed));
        assert!(!AwaitingPayment.can_transition_to(Refunded));
    }

    #[test]
    fn test_payment_status_mapping() {
        assert_eq!(
            InvestmentState::AwaitingPayment.payment_status(),
            PaymentStatus::Pending
        );
        assert_eq!(
            InvestmentState::Refunded.payment_status(),
            PaymentStatus::Refunded
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&InvestmentState::AwaitingPayment).unwrap(),
            "\"awaiting_payment\""
        );
        assert_eq!(
            serde_json::to_string(&TokenTransferStatus::NotStarted).unwrap(),
            "\"not_started\""
        );
    }
}
