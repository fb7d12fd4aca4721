//! Approval request records

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::{Tally, ThresholdPolicy};
use crate::core_types::{ApprovalId, Money, OfferingId, TokenAmount, UserId};

/// Approval request status
///
/// ```text
/// Pending ──► Approved ──► Executed
///    │
///    ├──► Rejected
///    └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    /// Threshold met; execution pending or failed (retryable)
    Approved,
    Rejected,
    Executed,
    Expired,
}

impl ApprovalStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Rejected | ApprovalStatus::Executed | ApprovalStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Executed => "executed",
            ApprovalStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executor routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    TreasuryWithdrawal,
    GovernanceProposal,
}

/// What the request approves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalSubject {
    TreasuryWithdrawal {
        offering_id: OfferingId,
        amount: Money,
        recipient: UserId,
        purpose: String,
    },
    GovernanceProposal {
        offering_id: OfferingId,
        title: String,
        description: String,
    },
}

impl ApprovalSubject {
    pub fn kind(&self) -> SubjectKind {
        match self {
            ApprovalSubject::TreasuryWithdrawal { .. } => SubjectKind::TreasuryWithdrawal,
            ApprovalSubject::GovernanceProposal { .. } => SubjectKind::GovernanceProposal,
        }
    }

    pub fn offering_id(&self) -> OfferingId {
        match self {
            ApprovalSubject::TreasuryWithdrawal { offering_id, .. }
            | ApprovalSubject::GovernanceProposal { offering_id, .. } => *offering_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub signer: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: UserId,
    pub choice: VoteChoice,
    /// Voting power at the proposal snapshot
    pub weight: TokenAmount,
    pub at: DateTime<Utc>,
}

/// Submission parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub subject: ApprovalSubject,
    /// Eligible signers with their weight (1 for multisig, voting power for
    /// governance)
    pub signers: Vec<(UserId, TokenAmount)>,
    pub policy: ThresholdPolicy,
    pub deadline: Option<DateTime<Utc>>,
    pub created_by: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub subject: ApprovalSubject,
    pub signer_set: BTreeMap<UserId, TokenAmount>,
    pub policy: ThresholdPolicy,
    /// Strictly growing, no duplicates
    pub approvers: Vec<Approval>,
    pub ballots: Vec<Ballot>,
    pub status: ApprovalStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub tally: Option<Tally>,
    /// Executor receipt (payout reference, audit sequence)
    pub execution_result: Option<String>,
    pub last_execution_error: Option<String>,
    pub execution_attempts: u32,
    /// Set while the executor runs; guards exactly-once execution
    #[serde(skip)]
    pub(crate) executing: bool,
}

impl ApprovalRequest {
    pub fn has_approved(&self, signer: &UserId) -> bool {
        self.approvers.iter().any(|a| &a.signer == signer)
    }

    pub fn has_voted(&self, voter: &UserId) -> bool {
        self.ballots.iter().any(|b| &b.voter == voter)
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}
