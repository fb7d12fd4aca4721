//! Settlement Error Types
//!
//! One error enum for every synchronous failure the settlement core returns.
//! Callers branch on [`SettlementError::code`], never on the message text.

use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::money::MoneyError;

/// Settlement error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    // === Validation Errors (never persisted) ===
    #[error("Validation failed: {0}")]
    Validation(String),

    // === Supply Errors ===
    #[error("Insufficient supply: requested {requested}, available {available}")]
    InsufficientSupply { requested: u64, available: u64 },

    #[error("Offering is not open for investment: {0}")]
    OfferingClosed(String),

    #[error("Reservation expired")]
    ReservationExpired,

    // === Payment Errors ===
    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    // === Approval Errors ===
    #[error("Signer is not authorized for this request")]
    Unauthorized,

    #[error("Signer has already approved this request")]
    AlreadyApproved,

    #[error("Voter has already cast a vote on this proposal")]
    DuplicateVote,

    #[error("Request is no longer open: {0}")]
    RequestClosed(String),

    // === Distribution Errors ===
    #[error("Distribution is already being processed")]
    DistributionBusy,

    // === Infrastructure Errors ===
    #[error("Ledger service unavailable: {0}")]
    LedgerServiceUnavailable(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl SettlementError {
    /// Stable error kind for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "VALIDATION_ERROR",
            SettlementError::InsufficientSupply { .. } => "INSUFFICIENT_SUPPLY",
            SettlementError::OfferingClosed(_) => "OFFERING_CLOSED",
            SettlementError::ReservationExpired => "RESERVATION_EXPIRED",
            SettlementError::PaymentVerificationFailed(_) => "PAYMENT_VERIFICATION_FAILED",
            SettlementError::Unauthorized => "UNAUTHORIZED",
            SettlementError::AlreadyApproved => "ALREADY_APPROVED",
            SettlementError::DuplicateVote => "DUPLICATE_VOTE",
            SettlementError::RequestClosed(_) => "REQUEST_CLOSED",
            SettlementError::DistributionBusy => "DISTRIBUTION_BUSY",
            SettlementError::LedgerServiceUnavailable(_) => "LEDGER_SERVICE_UNAVAILABLE",
            SettlementError::Collaborator(_) => "COLLABORATOR_ERROR",
            SettlementError::DatabaseError(_) => "DATABASE_ERROR",
            SettlementError::NotFound(_) => "NOT_FOUND",
            SettlementError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::Validation(_) => 400,
            SettlementError::Unauthorized => 403,
            SettlementError::NotFound(_) => 404,
            SettlementError::AlreadyApproved
            | SettlementError::DuplicateVote
            | SettlementError::DistributionBusy
            | SettlementError::RequestClosed(_)
            | SettlementError::InvalidStateTransition(_) => 409,
            SettlementError::InsufficientSupply { .. }
            | SettlementError::OfferingClosed(_)
            | SettlementError::ReservationExpired
            | SettlementError::PaymentVerificationFailed(_) => 422,
            SettlementError::DatabaseError(_) => 500,
            SettlementError::LedgerServiceUnavailable(_) | SettlementError::Collaborator(_) => 503,
        }
    }

    /// Errors that leave state untouched and may succeed on redelivery
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::Collaborator(_)
                | SettlementError::LedgerServiceUnavailable(_)
                | SettlementError::DatabaseError(_)
                | SettlementError::DistributionBusy
        )
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::DatabaseError(e.to_string())
    }
}

impl From<MoneyError> for SettlementError {
    fn from(e: MoneyError) -> Self {
        SettlementError::Validation(e.to_string())
    }
}

impl From<CollaboratorError> for SettlementError {
    fn from(e: CollaboratorError) -> Self {
        SettlementError::Collaborator(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SettlementError::ReservationExpired.code(), "RESERVATION_EXPIRED");
        assert_eq!(
            SettlementError::InsufficientSupply {
                requested: 500,
                available: 400
            }
            .code(),
            "INSUFFICIENT_SUPPLY"
        );
        assert_eq!(SettlementError::DuplicateVote.code(), "DUPLICATE_VOTE");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(SettlementError::Validation("x".into()).http_status(), 400);
        assert_eq!(SettlementError::Unauthorized.http_status(), 403);
        assert_eq!(SettlementError::AlreadyApproved.http_status(), 409);
        assert_eq!(SettlementError::OfferingClosed("closed".into()).http_status(), 422);
        assert_eq!(
            SettlementError::Collaborator("down".into()).http_status(),
            503
        );
    }

    #[test]
    fn test_display() {
        let err = SettlementError::InsufficientSupply {
            requested: 500,
            available: 400,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient supply: requested 500, available 400"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SettlementError::Collaborator("timeout".into()).is_retryable());
        assert!(!SettlementError::ReservationExpired.is_retryable());
    }
}
