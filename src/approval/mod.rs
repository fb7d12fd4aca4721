//! Approval Coordination
//!
//! M-of-N signer approvals for treasury withdrawals and token-weighted
//! governance votes, sharing one threshold primitive.
//!
//! # Invariants
//!
//! - `approvers` only grows and never holds a signer twice
//! - an approved request runs its executor at most once at a time and
//!   reaches `Executed` at most once
//! - `Rejected`, `Executed` and `Expired` are terminal

pub mod coordinator;
pub mod governance;
pub mod policy;
pub mod treasury;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use coordinator::{ApprovalCoordinator, ApprovalExecutor, ApprovalSweep};
pub use governance::{ProposalExecutor, ProposalParams, proposal_request};
pub use policy::{Tally, ThresholdPolicy};
pub use treasury::{TreasuryExecutor, WithdrawalParams, withdrawal_request};
pub use types::{
    Approval, ApprovalRequest, ApprovalStatus, ApprovalSubject, Ballot, NewApprovalRequest,
    SubjectKind, VoteChoice,
};
