//! Treasury withdrawal and governance handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::{AppState, Caller};
use super::super::types::{
    ApiError, ApiResult, ProposalRequestBody, VoteRequest, WithdrawalRequestBody, ok,
};
use crate::approval::{ApprovalRequest, ProposalParams, WithdrawalParams};
use crate::core_types::ApprovalId;

/// POST /api/v1/approvals/withdrawals
///
/// Submitted by the offering owner; the owner and `admins` sign.
pub async fn submit_withdrawal(
    State(state): State<Arc<AppState>>,
    Caller(owner): Caller,
    Json(req): Json<WithdrawalRequestBody>,
) -> ApiResult<ApprovalRequest> {
    let request = state
        .engine
        .submit_withdrawal(WithdrawalParams {
            offering_id: req.offering_id,
            amount: req.amount.inner(),
            recipient: req.recipient,
            purpose: req.purpose,
            owner,
            admins: req.admins,
            required_approvals: req.required_approvals,
            deadline: req.deadline,
        })
        .await?;
    ok(request)
}

/// POST /api/v1/approvals/proposals
pub async fn submit_proposal(
    State(state): State<Arc<AppState>>,
    Caller(proposer): Caller,
    Json(req): Json<ProposalRequestBody>,
) -> ApiResult<ApprovalRequest> {
    let request = state
        .engine
        .submit_proposal(ProposalParams {
            offering_id: req.offering_id,
            title: req.title,
            description: req.description,
            proposer,
            quorum_required: req.quorum_required.inner(),
            approval_threshold: req.approval_threshold.inner(),
            voting_ends_at: req.voting_ends_at,
        })
        .await?;
    ok(request)
}

/// GET /api/v1/approvals/{approval_id}
///
/// Visible to the creator and the signer set.
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<ApprovalId>,
) -> ApiResult<ApprovalRequest> {
    let request = state.engine.get_approval(id)?;
    if request.created_by != caller && !request.signer_set.contains_key(&caller) {
        return ApiError::from(crate::error::SettlementError::NotFound(format!(
            "approval request {}",
            id
        )))
        .into_err();
    }
    ok(request)
}

/// POST /api/v1/approvals/{approval_id}/approve
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Caller(signer): Caller,
    Path(id): Path<ApprovalId>,
) -> ApiResult<ApprovalRequest> {
    ok(state.engine.approve(id, &signer).await?)
}

/// POST /api/v1/approvals/{approval_id}/reject
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Caller(signer): Caller,
    Path(id): Path<ApprovalId>,
) -> ApiResult<ApprovalRequest> {
    ok(state.engine.reject(id, &signer)?)
}

/// POST /api/v1/approvals/{approval_id}/vote
pub async fn cast_vote(
    State(state): State<Arc<AppState>>,
    Caller(voter): Caller,
    Path(id): Path<ApprovalId>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<ApprovalRequest> {
    ok(state.engine.cast_vote(id, &voter, req.choice)?)
}

/// POST /api/v1/approvals/{approval_id}/finalize
pub async fn finalize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ApprovalId>,
) -> ApiResult<ApprovalRequest> {
    ok(state.engine.finalize_proposal(id).await?)
}

/// POST /api/v1/approvals/{approval_id}/execute
///
/// Re-runs a failed execution. Creator only.
pub async fn retry_execution(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<ApprovalId>,
) -> ApiResult<ApprovalRequest> {
    let request = state.engine.get_approval(id)?;
    if request.created_by != caller {
        return ApiError::from(crate::error::SettlementError::Unauthorized).into_err();
    }
    ok(state.engine.retry_execution(id).await?)
}
