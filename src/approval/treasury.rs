//! Treasury withdrawals
//!
//! Multisig requests over an offering's treasury. Once approved, the
//! executor pays the recipient through the payout rail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use super::coordinator::ApprovalExecutor;
use super::policy::ThresholdPolicy;
use super::types::{ApprovalRequest, ApprovalSubject, NewApprovalRequest};
use crate::collaborators::{CollaboratorError, PayoutGateway};
use crate::core_types::{ApprovalId, Money, OfferingId, UserId};
use crate::error::SettlementError;

/// Payout reference for a withdrawal; stable across execution retries
pub fn withdrawal_reference(id: ApprovalId) -> String {
    format!("TRW-{}", id)
}

#[derive(Debug, Clone)]
pub struct WithdrawalParams {
    pub offering_id: OfferingId,
    pub amount: Money,
    pub recipient: UserId,
    pub purpose: String,
    pub owner: UserId,
    pub admins: Vec<UserId>,
    /// Defaults to every signer
    pub required_approvals: Option<u32>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Build a withdrawal request signed by the owner and the admins
pub fn withdrawal_request(params: WithdrawalParams) -> Result<NewApprovalRequest, SettlementError> {
    if params.amount <= Decimal::ZERO {
        return Err(SettlementError::Validation(
            "withdrawal amount must be positive".into(),
        ));
    }
    if params.purpose.trim().is_empty() {
        return Err(SettlementError::Validation(
            "withdrawal purpose is required".into(),
        ));
    }

    let mut signers = vec![(params.owner.clone(), 1)];
    for admin in params.admins {
        if !signers.iter().any(|(s, _)| *s == admin) {
            signers.push((admin, 1));
        }
    }
    let required = params.required_approvals.unwrap_or(signers.len() as u32);

    Ok(NewApprovalRequest {
        subject: ApprovalSubject::TreasuryWithdrawal {
            offering_id: params.offering_id,
            amount: params.amount,
            recipient: params.recipient,
            purpose: params.purpose,
        },
        signers,
        policy: ThresholdPolicy::Signatures { required },
        deadline: params.deadline,
        created_by: params.owner,
    })
}

pub struct TreasuryExecutor {
    payouts: Arc<dyn PayoutGateway>,
    currency: String,
}

impl TreasuryExecutor {
    pub fn new(payouts: Arc<dyn PayoutGateway>, currency: impl Into<String>) -> Self {
        Self {
            payouts,
            currency: currency.into(),
        }
    }
}

#[async_trait]
impl ApprovalExecutor for TreasuryExecutor {
    async fn execute(&self, request: &ApprovalRequest) -> Result<String, CollaboratorError> {
        let ApprovalSubject::TreasuryWithdrawal {
            amount, recipient, ..
        } = &request.subject
        else {
            return Err(CollaboratorError::rejected(
                "treasury",
                "request is not a treasury withdrawal",
            ));
        };

        let reference = withdrawal_reference(request.id);
        let receipt = self
            .payouts
            .pay(recipient, *amount, &self.currency, &reference)
            .await?;
        info!(
            approval_id = %request.id,
            recipient = %recipient,
            amount = %amount,
            reference = %receipt.reference,
            "Treasury withdrawal paid"
        );
        Ok(receipt.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WithdrawalParams {
        WithdrawalParams {
            offering_id: OfferingId::new(),
            amount: Decimal::from(250_000),
            recipient: UserId::from("contractor"),
            purpose: "facade works".into(),
            owner: UserId::from("owner"),
            admins: vec![UserId::from("admin"), UserId::from("owner")],
            required_approvals: None,
            deadline: None,
        }
    }

    #[test]
    fn test_signers_are_owner_and_admins_deduplicated() {
        let req = withdrawal_request(params()).unwrap();
        assert_eq!(req.signers.len(), 2);
        assert_eq!(req.policy, ThresholdPolicy::Signatures { required: 2 });
        assert_eq!(req.created_by, UserId::from("owner"));
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let mut p = params();
        p.amount = Decimal::ZERO;
        assert_eq!(withdrawal_request(p).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_reference_is_stable() {
        let id = ApprovalId::new();
        assert_eq!(withdrawal_reference(id), withdrawal_reference(id));
        assert!(withdrawal_reference(id).starts_with("TRW-"));
    }
}
