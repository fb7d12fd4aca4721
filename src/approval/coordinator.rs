//! Approval Coordinator
//!
//! Drives approval requests through their state machine and invokes the
//! executor registered for the subject kind once the threshold is met.
//!
//! Every mutation of a request happens under its `DashMap` entry guard.
//! The guard is never held across an executor call: the request is first
//! claimed (`executing = true`) and the outcome is written back afterwards.
//! A caller dropped mid-execution releases the claim so the request can be
//! retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::policy::ThresholdPolicy;
use super::types::{
    Approval, ApprovalRequest, ApprovalStatus, Ballot, NewApprovalRequest, SubjectKind,
    VoteChoice,
};
use crate::clock::TimeSource;
use crate::collaborators::{CollaboratorError, NotificationKind, NotificationSink};
use crate::core_types::{ApprovalId, OfferingId, UserId};
use crate::error::SettlementError;

/// Side effect run once a request is approved
#[async_trait]
pub trait ApprovalExecutor: Send + Sync {
    /// Returns a receipt (payout reference, audit sequence number)
    async fn execute(&self, request: &ApprovalRequest) -> Result<String, CollaboratorError>;
}

/// Result of one sweep pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApprovalSweep {
    pub expired: usize,
    pub finalized: usize,
}

pub struct ApprovalCoordinator {
    requests: DashMap<ApprovalId, ApprovalRequest>,
    executors: DashMap<SubjectKind, Arc<dyn ApprovalExecutor>>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn TimeSource>,
}

impl ApprovalCoordinator {
    pub fn new(notifier: Arc<dyn NotificationSink>, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            requests: DashMap::new(),
            executors: DashMap::new(),
            notifier,
            clock,
        }
    }

    pub fn register_executor(&self, kind: SubjectKind, executor: Arc<dyn ApprovalExecutor>) {
        self.executors.insert(kind, executor);
    }

    /// Open a new request in `Pending`
    pub fn submit(&self, new: NewApprovalRequest) -> Result<ApprovalRequest, SettlementError> {
        let now = self.clock.now();

        if new.signers.is_empty() {
            return Err(SettlementError::Validation("signer set is empty".into()));
        }
        let mut signer_set = BTreeMap::new();
        for (signer, weight) in new.signers {
            if weight == 0 {
                return Err(SettlementError::Validation(format!(
                    "signer {} has no weight",
                    signer
                )));
            }
            if signer_set.insert(signer.clone(), weight).is_some() {
                return Err(SettlementError::Validation(format!(
                    "duplicate signer {}",
                    signer
                )));
            }
        }
        new.policy.validate(signer_set.len())?;

        if new.policy.is_vote() && new.deadline.is_none() {
            return Err(SettlementError::Validation(
                "a vote needs a voting deadline".into(),
            ));
        }
        if let Some(deadline) = new.deadline
            && deadline <= now
        {
            return Err(SettlementError::Validation(
                "deadline must be in the future".into(),
            ));
        }

        let request = ApprovalRequest {
            id: ApprovalId::new(),
            subject: new.subject,
            signer_set,
            policy: new.policy,
            approvers: Vec::new(),
            ballots: Vec::new(),
            status: ApprovalStatus::Pending,
            deadline: new.deadline,
            created_by: new.created_by,
            created_at: now,
            decided_at: None,
            executed_at: None,
            rejected_by: None,
            tally: None,
            execution_result: None,
            last_execution_error: None,
            execution_attempts: 0,
            executing: false,
        };
        self.requests.insert(request.id, request.clone());

        info!(
            approval_id = %request.id,
            kind = ?request.subject.kind(),
            offering_id = %request.subject.offering_id(),
            signers = request.signer_set.len(),
            "Approval request submitted"
        );
        for signer in request.signer_set.keys() {
            self.notifier.notify(
                signer,
                NotificationKind::ApprovalRequested,
                json!({
                    "approval_id": request.id.to_string(),
                    "kind": request.subject.kind(),
                    "deadline": request.deadline,
                }),
            );
        }
        Ok(request)
    }

    /// Read a request, applying any lapsed deadline first
    pub fn get(&self, id: ApprovalId) -> Result<ApprovalRequest, SettlementError> {
        let now = self.clock.now();
        let mut record = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("approval request {}", id)))?;
        let expired = expire_if_due(&mut record, now);
        let snapshot = record.clone();
        drop(record);

        if expired {
            self.on_expired(&snapshot);
        }
        Ok(snapshot)
    }

    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = self.clock.now();
        let mut pending: Vec<ApprovalRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .filter(|r| r.policy.is_vote() || !r.is_past_deadline(now))
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    pub fn list_by_offering(&self, offering: OfferingId) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .requests
            .iter()
            .filter(|r| r.subject.offering_id() == offering)
            .map(|r| r.clone())
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    /// Record a signer's approval.
    ///
    /// The approval that reaches the threshold flips the request to
    /// `Approved` and runs the executor. A failed execution leaves the
    /// request `Approved` for `retry_execution`.
    pub async fn approve(
        &self,
        id: ApprovalId,
        signer: &UserId,
    ) -> Result<ApprovalRequest, SettlementError> {
        let now = self.clock.now();
        let (claimed, expired) = {
            let mut record = self
                .requests
                .get_mut(&id)
                .ok_or_else(|| SettlementError::NotFound(format!("approval request {}", id)))?;

            if expire_if_due(&mut record, now) {
                (None, Some(record.clone()))
            } else {
                let required = match record.policy {
                    ThresholdPolicy::Signatures { required } => required as usize,
                    ThresholdPolicy::Quorum { .. } => {
                        return Err(SettlementError::Validation(
                            "governance proposals are decided by vote".into(),
                        ));
                    }
                };
                if !record.signer_set.contains_key(signer) {
                    return Err(SettlementError::Unauthorized);
                }
                if record.has_approved(signer) {
                    return Err(SettlementError::AlreadyApproved);
                }
                if record.status != ApprovalStatus::Pending {
                    return Err(SettlementError::RequestClosed(record.status.to_string()));
                }

                record.approvers.push(Approval {
                    signer: signer.clone(),
                    at: now,
                });
                debug!(
                    approval_id = %id,
                    signer = %signer,
                    approvals = record.approvers.len(),
                    required,
                    "Approval recorded"
                );

                if record.approvers.len() >= required {
                    record.status = ApprovalStatus::Approved;
                    record.decided_at = Some(now);
                    record.executing = true;
                    (Some(record.clone()), None)
                } else {
                    (None, None)
                }
            }
        };

        if let Some(snapshot) = expired {
            self.on_expired(&snapshot);
            return Err(SettlementError::RequestClosed("expired".into()));
        }
        if let Some(snapshot) = claimed {
            info!(approval_id = %id, "Approval threshold reached");
            self.execute(snapshot).await;
        }
        self.get(id)
    }

    /// Single veto: any signer can reject a pending request
    pub fn reject(
        &self,
        id: ApprovalId,
        signer: &UserId,
    ) -> Result<ApprovalRequest, SettlementError> {
        let now = self.clock.now();
        let mut record = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("approval request {}", id)))?;

        if expire_if_due(&mut record, now) {
            let snapshot = record.clone();
            drop(record);
            self.on_expired(&snapshot);
            return Err(SettlementError::RequestClosed("expired".into()));
        }
        if record.policy.is_vote() {
            return Err(SettlementError::Validation(
                "governance proposals are decided by vote".into(),
            ));
        }
        if !record.signer_set.contains_key(signer) {
            return Err(SettlementError::Unauthorized);
        }
        if record.status != ApprovalStatus::Pending {
            return Err(SettlementError::RequestClosed(record.status.to_string()));
        }

        record.status = ApprovalStatus::Rejected;
        record.rejected_by = Some(signer.clone());
        record.decided_at = Some(now);
        let snapshot = record.clone();
        drop(record);

        info!(approval_id = %id, signer = %signer, "Approval request rejected");
        self.notifier.notify(
            &snapshot.created_by,
            NotificationKind::ApprovalRejected,
            json!({
                "approval_id": id.to_string(),
                "rejected_by": signer.as_str(),
            }),
        );
        Ok(snapshot)
    }

    /// Cast a weighted vote on a governance proposal
    pub fn cast_vote(
        &self,
        id: ApprovalId,
        voter: &UserId,
        choice: VoteChoice,
    ) -> Result<ApprovalRequest, SettlementError> {
        let now = self.clock.now();
        let mut record = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("approval request {}", id)))?;

        if !record.policy.is_vote() {
            return Err(SettlementError::Validation(
                "request is decided by signer approvals".into(),
            ));
        }
        if record.status != ApprovalStatus::Pending {
            return Err(SettlementError::RequestClosed(record.status.to_string()));
        }
        if record.is_past_deadline(now) {
            return Err(SettlementError::RequestClosed("voting has ended".into()));
        }
        let weight = *record
            .signer_set
            .get(voter)
            .ok_or(SettlementError::Unauthorized)?;
        if record.has_voted(voter) {
            return Err(SettlementError::DuplicateVote);
        }

        record.ballots.push(Ballot {
            voter: voter.clone(),
            choice,
            weight,
            at: now,
        });
        debug!(approval_id = %id, voter = %voter, ?choice, weight, "Vote cast");
        Ok(record.clone())
    }

    /// Tally a vote once its deadline has passed.
    ///
    /// Tallying happens exactly once; later calls return the decided
    /// request unchanged.
    pub async fn finalize(&self, id: ApprovalId) -> Result<ApprovalRequest, SettlementError> {
        let now = self.clock.now();
        let (snapshot, passed) = {
            let mut record = self
                .requests
                .get_mut(&id)
                .ok_or_else(|| SettlementError::NotFound(format!("approval request {}", id)))?;

            let Some(tally) = record.policy.tally(&record.ballots) else {
                return Err(SettlementError::Validation(
                    "request is decided by signer approvals".into(),
                ));
            };
            if record.tally.is_some() {
                return Ok(record.clone());
            }
            if !record.is_past_deadline(now) {
                return Err(SettlementError::InvalidStateTransition(
                    "voting is still open".into(),
                ));
            }

            let passed = tally.passed;
            record.tally = Some(tally);
            record.decided_at = Some(now);
            if passed {
                record.status = ApprovalStatus::Approved;
                record.executing = true;
            } else {
                record.status = ApprovalStatus::Rejected;
            }
            (record.clone(), passed)
        };

        if let Some(tally) = &snapshot.tally {
            info!(
                approval_id = %id,
                votes_for = tally.votes_for,
                votes_against = tally.votes_against,
                votes_abstain = tally.votes_abstain,
                turnout = %tally.turnout,
                approval_rate = %tally.approval_rate,
                passed,
                "Proposal finalized"
            );
        }
        self.notifier.notify(
            &snapshot.created_by,
            NotificationKind::ProposalFinalized,
            json!({
                "approval_id": id.to_string(),
                "passed": passed,
                "tally": snapshot.tally,
            }),
        );

        if passed {
            self.execute(snapshot).await;
        }
        self.get(id)
    }

    /// Re-run the executor for an `Approved` request whose execution failed
    pub async fn retry_execution(
        &self,
        id: ApprovalId,
    ) -> Result<ApprovalRequest, SettlementError> {
        let snapshot = {
            let mut record = self
                .requests
                .get_mut(&id)
                .ok_or_else(|| SettlementError::NotFound(format!("approval request {}", id)))?;
            if record.status != ApprovalStatus::Approved {
                return Err(SettlementError::InvalidStateTransition(format!(
                    "cannot execute a {} request",
                    record.status
                )));
            }
            if record.executing {
                return Err(SettlementError::InvalidStateTransition(
                    "execution already in progress".into(),
                ));
            }
            record.executing = true;
            record.clone()
        };

        self.execute(snapshot).await;
        self.get(id)
    }

    /// Expire lapsed multisig requests and finalize ended votes
    pub async fn sweep(&self, now: DateTime<Utc>) -> ApprovalSweep {
        let mut report = ApprovalSweep::default();

        let due: Vec<(ApprovalId, bool)> = self
            .requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending && r.is_past_deadline(now))
            .map(|r| (r.id, r.policy.is_vote()))
            .collect();

        for (id, is_vote) in due {
            if is_vote {
                match self.finalize(id).await {
                    Ok(_) => report.finalized += 1,
                    Err(e) => debug!(approval_id = %id, error = %e, "Finalize skipped"),
                }
                continue;
            }

            let expired = self.requests.get_mut(&id).and_then(|mut record| {
                expire_if_due(&mut record, now).then(|| record.clone())
            });
            if let Some(snapshot) = expired {
                self.on_expired(&snapshot);
                report.expired += 1;
            }
        }

        if report.expired + report.finalized > 0 {
            info!(
                expired = report.expired,
                finalized = report.finalized,
                "Approval sweep complete"
            );
        }
        report
    }

    /// Run the executor for a claimed request and write back the outcome
    async fn execute(&self, request: ApprovalRequest) {
        let id = request.id;
        let kind = request.subject.kind();
        let mut claim = ExecutionClaim {
            requests: &self.requests,
            id,
            armed: true,
        };

        let executor = self.executors.get(&kind).map(|e| e.value().clone());
        let outcome = match executor {
            Some(executor) => executor.execute(&request).await,
            None => Err(CollaboratorError::rejected(
                "approval",
                format!("no executor registered for {:?}", kind),
            )),
        };

        // Disarm before taking the entry lock
        claim.armed = false;
        let now = self.clock.now();
        let Some(mut record) = self.requests.get_mut(&id) else {
            error!(approval_id = %id, "Approval request vanished during execution");
            return;
        };
        record.executing = false;
        record.execution_attempts += 1;

        match outcome {
            Ok(receipt) => {
                record.status = ApprovalStatus::Executed;
                record.executed_at = Some(now);
                record.execution_result = Some(receipt.clone());
                record.last_execution_error = None;
                let created_by = record.created_by.clone();
                drop(record);

                info!(approval_id = %id, receipt = %receipt, "Approval executed");
                self.notifier.notify(
                    &created_by,
                    NotificationKind::ApprovalExecuted,
                    json!({ "approval_id": id.to_string(), "receipt": receipt }),
                );
            }
            Err(e) => {
                record.last_execution_error = Some(e.to_string());
                let attempts = record.execution_attempts;
                drop(record);
                warn!(
                    approval_id = %id,
                    attempts,
                    error = %e,
                    "Approval execution failed; request stays approved"
                );
            }
        }
    }

    fn on_expired(&self, request: &ApprovalRequest) {
        info!(approval_id = %request.id, "Approval request expired");
        self.notifier.notify(
            &request.created_by,
            NotificationKind::ApprovalRejected,
            json!({
                "approval_id": request.id.to_string(),
                "reason": "expired",
            }),
        );
    }
}

/// Releases the `executing` flag when an execution future is dropped
/// before its outcome is written
struct ExecutionClaim<'a> {
    requests: &'a DashMap<ApprovalId, ApprovalRequest>,
    id: ApprovalId,
    armed: bool,
}

impl Drop for ExecutionClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(mut record) = self.requests.get_mut(&self.id) {
            record.executing = false;
            record.last_execution_error = Some("execution interrupted".into());
        }
        warn!(approval_id = %self.id, "Approval execution interrupted, claim released");
    }
}

/// Move a lapsed multisig request to `Expired`. Votes are finalized
/// instead, never expired.
fn expire_if_due(request: &mut ApprovalRequest, now: DateTime<Utc>) -> bool {
    if request.status != ApprovalStatus::Pending
        || request.policy.is_vote()
        || !request.is_past_deadline(now)
    {
        return false;
    }
    request.status = ApprovalStatus::Expired;
    request.decided_at = Some(now);
    true
}
