//! Governance proposals
//!
//! Token-weighted votes. Voting power is each holder's balance at the
//! snapshot time; an executed proposal is recorded on the audit topic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use super::coordinator::ApprovalExecutor;
use super::policy::ThresholdPolicy;
use super::types::{ApprovalRequest, ApprovalSubject, NewApprovalRequest};
use crate::collaborators::{CollaboratorError, LedgerService};
use crate::core_types::{OfferingId, TokenAmount, UserId};
use crate::error::SettlementError;
use crate::investment::HoldingStore;

#[derive(Debug, Clone)]
pub struct ProposalParams {
    pub offering_id: OfferingId,
    pub title: String,
    pub description: String,
    pub proposer: UserId,
    pub quorum_required: Decimal,
    pub approval_threshold: Decimal,
    pub voting_ends_at: DateTime<Utc>,
}

/// Build a proposal whose electorate is the holder snapshot at `snapshot_at`.
///
/// `total_supply` is the offering's issued supply, so unsold tokens count
/// against turnout.
pub fn proposal_request(
    params: ProposalParams,
    holdings: &HoldingStore,
    total_supply: TokenAmount,
    snapshot_at: DateTime<Utc>,
) -> Result<NewApprovalRequest, SettlementError> {
    if params.title.trim().is_empty() {
        return Err(SettlementError::Validation("proposal title is required".into()));
    }
    let signers: Vec<(UserId, TokenAmount)> = holdings.snapshot(params.offering_id, snapshot_at);
    if signers.is_empty() {
        return Err(SettlementError::Validation(
            "offering has no token holders to vote".into(),
        ));
    }

    Ok(NewApprovalRequest {
        subject: ApprovalSubject::GovernanceProposal {
            offering_id: params.offering_id,
            title: params.title,
            description: params.description,
        },
        signers,
        policy: ThresholdPolicy::Quorum {
            quorum_required: params.quorum_required,
            approval_threshold: params.approval_threshold,
            total_supply,
        },
        deadline: Some(params.voting_ends_at),
        created_by: params.proposer,
    })
}

pub struct ProposalExecutor {
    ledger: Arc<dyn LedgerService>,
    audit_topic_id: String,
}

impl ProposalExecutor {
    pub fn new(ledger: Arc<dyn LedgerService>, audit_topic_id: impl Into<String>) -> Self {
        Self {
            ledger,
            audit_topic_id: audit_topic_id.into(),
        }
    }
}

#[async_trait]
impl ApprovalExecutor for ProposalExecutor {
    async fn execute(&self, request: &ApprovalRequest) -> Result<String, CollaboratorError> {
        let ApprovalSubject::GovernanceProposal {
            offering_id, title, ..
        } = &request.subject
        else {
            return Err(CollaboratorError::rejected(
                "governance",
                "request is not a governance proposal",
            ));
        };

        let message = json!({
            "type": "governance_proposal_passed",
            "approval_id": request.id.to_string(),
            "offering_id": offering_id.to_string(),
            "title": title,
            "tally": request.tally,
        });
        let sequence = self
            .ledger
            .record_audit_message(&self.audit_topic_id, &message)
            .await?;
        Ok(format!("{}#{}", self.audit_topic_id, sequence))
    }
}
