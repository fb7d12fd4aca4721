//! Integration Tests for Approval Coordination
//!
//! Multisig withdrawals against the fake payout rail and governance votes
//! tallied against holder snapshots.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal::Decimal;

    use crate::approval::{
        ApprovalCoordinator, ApprovalExecutor, ApprovalRequest, ApprovalStatus, ApprovalSubject,
        NewApprovalRequest, ProposalExecutor, ProposalParams, SubjectKind, ThresholdPolicy,
        TreasuryExecutor, VoteChoice, WithdrawalParams, proposal_request, withdrawal_request,
    };
    use crate::clock::{ManualTimeSource, TimeSource};
    use crate::collaborators::fake::{
        FakeLedgerService, FakePayoutGateway, RecordingNotificationSink,
    };
    use crate::collaborators::{CollaboratorError, NotificationKind};
    use crate::core_types::{OfferingId, UserId};
    use crate::error::SettlementError;
    use crate::investment::HoldingStore;

    /// Counts calls; fails while `failing` is set, stalls while `hanging` is set
    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
        failing: AtomicBool,
        hanging: AtomicBool,
    }

    #[async_trait]
    impl ApprovalExecutor for CountingExecutor {
        async fn execute(&self, request: &ApprovalRequest) -> Result<String, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.hanging.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(CollaboratorError::unavailable("test", "rail down"));
            }
            Ok(format!("OK-{}", request.id))
        }
    }

    struct TestHarness {
        coordinator: Arc<ApprovalCoordinator>,
        clock: Arc<ManualTimeSource>,
        notices: Arc<RecordingNotificationSink>,
        executor: Arc<CountingExecutor>,
        offering: OfferingId,
    }

    impl TestHarness {
        fn new() -> Self {
            let clock = Arc::new(ManualTimeSource::at_epoch());
            let notices = Arc::new(RecordingNotificationSink::new());
            let coordinator = Arc::new(ApprovalCoordinator::new(notices.clone(), clock.clone()));
            let executor = Arc::new(CountingExecutor::default());
            coordinator.register_executor(SubjectKind::TreasuryWithdrawal, executor.clone());
            Self {
                coordinator,
                clock,
                notices,
                executor,
                offering: OfferingId::new(),
            }
        }

        fn multisig(&self, signers: &[&str], required: u32) -> NewApprovalRequest {
            NewApprovalRequest {
                subject: ApprovalSubject::TreasuryWithdrawal {
                    offering_id: self.offering,
                    amount: Decimal::from(1_000),
                    recipient: UserId::from("vendor"),
                    purpose: "maintenance".into(),
                },
                signers: signers.iter().map(|s| (UserId::from(*s), 1)).collect(),
                policy: ThresholdPolicy::Signatures { required },
                deadline: Some(self.clock.now() + Duration::days(7)),
                created_by: UserId::from(signers[0]),
            }
        }

        fn calls(&self) -> usize {
            self.executor.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_k_minus_one_pending_k_executes_once() {
        let h = TestHarness::new();
        let id = h
            .coordinator
            .submit(h.multisig(&["s1", "s2", "s3", "s4"], 3))
            .unwrap()
            .id;

        for signer in ["s1", "s2"] {
            let r = h.coordinator.approve(id, &UserId::from(signer)).await.unwrap();
            assert_eq!(r.status, ApprovalStatus::Pending);
        }
        assert_eq!(h.calls(), 0);

        let r = h.coordinator.approve(id, &UserId::from("s3")).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Executed);
        assert_eq!(r.approvers.len(), 3);
        assert_eq!(h.calls(), 1);

        // Late signer cannot re-trigger execution
        let err = h
            .coordinator
            .approve(id, &UserId::from("s4"))
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::RequestClosed("executed".into()));
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test]
    async fn test_owner_and_admin_treasury_withdrawal() {
        let clock = Arc::new(ManualTimeSource::at_epoch());
        let notices = Arc::new(RecordingNotificationSink::new());
        let payouts = Arc::new(FakePayoutGateway::new());
        let coordinator = ApprovalCoordinator::new(notices.clone(), clock.clone());
        coordinator.register_executor(
            SubjectKind::TreasuryWithdrawal,
            Arc::new(TreasuryExecutor::new(payouts.clone(), "NGN")),
        );

        let owner = UserId::from("owner");
        let admin = UserId::from("admin");
        let contractor = UserId::from("contractor");
        let request = withdrawal_request(WithdrawalParams {
            offering_id: OfferingId::new(),
            amount: Decimal::from(75_000),
            recipient: contractor.clone(),
            purpose: "roof replacement".into(),
            owner: owner.clone(),
            admins: vec![admin.clone()],
            required_approvals: Some(2),
            deadline: None,
        })
        .unwrap();
        let id = coordinator.submit(request).unwrap().id;
        assert_eq!(notices.count(NotificationKind::ApprovalRequested), 2);

        let r = coordinator.approve(id, &owner).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Pending);
        assert_eq!(payouts.call_count(), 0);

        let r = coordinator.approve(id, &admin).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Executed);
        assert_eq!(payouts.call_count(), 1);
        assert_eq!(payouts.total_paid_to(&contractor), Decimal::from(75_000));
        assert_eq!(r.execution_result.as_deref(), Some(format!("PO-TRW-{}", id).as_str()));
        assert_eq!(notices.count(NotificationKind::ApprovalExecuted), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_and_duplicate_approval() {
        let h = TestHarness::new();
        let id = h.coordinator.submit(h.multisig(&["a", "b"], 2)).unwrap().id;

        assert_eq!(
            h.coordinator
                .approve(id, &UserId::from("mallory"))
                .await
                .unwrap_err(),
            SettlementError::Unauthorized
        );
        h.coordinator.approve(id, &UserId::from("a")).await.unwrap();
        assert_eq!(
            h.coordinator
                .approve(id, &UserId::from("a"))
                .await
                .unwrap_err(),
            SettlementError::AlreadyApproved
        );
        assert_eq!(h.coordinator.get(id).unwrap().approvers.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_final_approvals_execute_once() {
        let h = TestHarness::new();
        let id = h
            .coordinator
            .submit(h.multisig(&["a", "b", "c"], 2))
            .unwrap()
            .id;
        h.coordinator.approve(id, &UserId::from("a")).await.unwrap();

        let (b, c) = (UserId::from("b"), UserId::from("c"));
        let (rb, rc) = tokio::join!(h.coordinator.approve(id, &b), h.coordinator.approve(id, &c));

        // Exactly one of the two crossed the threshold
        assert!(rb.is_ok() || rc.is_ok());
        assert_eq!(h.calls(), 1);
        let final_state = h.coordinator.get(id).unwrap();
        assert_eq!(final_state.status, ApprovalStatus::Executed);
        assert_eq!(final_state.approvers.len(), 2);
    }

    #[tokio::test]
    async fn test_single_veto_rejects() {
        let h = TestHarness::new();
        let id = h
            .coordinator
            .submit(h.multisig(&["a", "b", "c"], 2))
            .unwrap()
            .id;
        h.coordinator.approve(id, &UserId::from("a")).await.unwrap();

        let r = h.coordinator.reject(id, &UserId::from("c")).unwrap();
        assert_eq!(r.status, ApprovalStatus::Rejected);
        assert_eq!(r.rejected_by, Some(UserId::from("c")));

        let err = h
            .coordinator
            .approve(id, &UserId::from("b"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "REQUEST_CLOSED");
        assert_eq!(h.calls(), 0);
        assert_eq!(h.notices.count(NotificationKind::ApprovalRejected), 1);
    }

    #[tokio::test]
    async fn test_expired_request_refuses_approvals() {
        let h = TestHarness::new();
        let id = h.coordinator.submit(h.multisig(&["a", "b"], 2)).unwrap().id;
        h.coordinator.approve(id, &UserId::from("a")).await.unwrap();

        h.clock.advance(Duration::days(7));
        let err = h
            .coordinator
            .approve(id, &UserId::from("b"))
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::RequestClosed("expired".into()));
        assert_eq!(h.coordinator.get(id).unwrap().status, ApprovalStatus::Expired);
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_lapsed_requests() {
        let h = TestHarness::new();
        let lapsed = h.coordinator.submit(h.multisig(&["a", "b"], 2)).unwrap().id;
        let mut long = h.multisig(&["a", "b"], 2);
        long.deadline = Some(h.clock.now() + Duration::days(30));
        let open = h.coordinator.submit(long).unwrap().id;

        h.clock.advance(Duration::days(8));
        let report = h.coordinator.sweep(h.clock.now()).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.finalized, 0);
        assert_eq!(h.coordinator.get(lapsed).unwrap().status, ApprovalStatus::Expired);
        assert_eq!(h.coordinator.get(open).unwrap().status, ApprovalStatus::Pending);

        // Second sweep finds nothing
        assert_eq!(h.coordinator.sweep(h.clock.now()).await.expired, 0);
    }

    #[tokio::test]
    async fn test_failed_execution_stays_approved_until_retry() {
        let h = TestHarness::new();
        h.executor.failing.store(true, Ordering::SeqCst);
        let id = h.coordinator.submit(h.multisig(&["a", "b"], 2)).unwrap().id;

        h.coordinator.approve(id, &UserId::from("a")).await.unwrap();
        let r = h.coordinator.approve(id, &UserId::from("b")).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Approved);
        assert_eq!(r.execution_attempts, 1);
        assert!(r.last_execution_error.is_some());

        h.executor.failing.store(false, Ordering::SeqCst);
        let r = h.coordinator.retry_execution(id).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Executed);
        assert_eq!(r.execution_attempts, 2);
        assert_eq!(h.calls(), 2);

        let err = h.coordinator.retry_execution(id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_dropped_execution_can_be_retried() {
        let h = TestHarness::new();
        h.executor.hanging.store(true, Ordering::SeqCst);
        let id = h.coordinator.submit(h.multisig(&["a", "b"], 2)).unwrap().id;
        h.coordinator.approve(id, &UserId::from("a")).await.unwrap();

        // Final signer's request is dropped while the executor is running
        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            h.coordinator.approve(id, &UserId::from("b")),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(h.calls(), 1);

        let r = h.coordinator.get(id).unwrap();
        assert_eq!(r.status, ApprovalStatus::Approved);
        assert!(!r.executing);
        assert_eq!(r.last_execution_error.as_deref(), Some("execution interrupted"));

        h.executor.hanging.store(false, Ordering::SeqCst);
        let r = h.coordinator.retry_execution(id).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Executed);
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_executor_leaves_request_approved() {
        let clock = Arc::new(ManualTimeSource::at_epoch());
        let coordinator =
            ApprovalCoordinator::new(Arc::new(RecordingNotificationSink::new()), clock.clone());
        let h = TestHarness::new();
        let id = coordinator.submit(h.multisig(&["a"], 1)).unwrap().id;

        let r = coordinator.approve(id, &UserId::from("a")).await.unwrap();
        assert_eq!(r.status, ApprovalStatus::Approved);
        assert!(r.last_execution_error.unwrap().contains("no executor"));
    }

    struct VoteHarness {
        coordinator: ApprovalCoordinator,
        clock: Arc<ManualTimeSource>,
        ledger: Arc<FakeLedgerService>,
        holdings: HoldingStore,
        offering: OfferingId,
    }

    impl VoteHarness {
        fn new(balances: &[(&str, u64)]) -> Self {
            let clock = Arc::new(ManualTimeSource::at_epoch());
            let ledger = Arc::new(FakeLedgerService::new());
            let coordinator =
                ApprovalCoordinator::new(Arc::new(RecordingNotificationSink::new()), clock.clone());
            coordinator.register_executor(
                SubjectKind::GovernanceProposal,
                Arc::new(ProposalExecutor::new(ledger.clone(), "0.0.2002")),
            );
            let holdings = HoldingStore::new();
            let offering = OfferingId::new();
            for (user, tokens) in balances {
                holdings.apply_purchase(
                    &UserId::from(*user),
                    offering,
                    *tokens,
                    Decimal::from(*tokens * 100),
                    clock.now(),
                );
            }
            Self {
                coordinator,
                clock,
                ledger,
                holdings,
                offering,
            }
        }

        fn propose(&self, quorum: i64, threshold: i64) -> crate::core_types::ApprovalId {
            let request = proposal_request(
                ProposalParams {
                    offering_id: self.offering,
                    title: "Refinance mortgage".into(),
                    description: "Move to a fixed rate".into(),
                    proposer: UserId::from("owner"),
                    quorum_required: Decimal::new(quorum, 2),
                    approval_threshold: Decimal::new(threshold, 2),
                    voting_ends_at: self.clock.now() + Duration::days(3),
                },
                &self.holdings,
                1_000,
                self.clock.now(),
            )
            .unwrap();
            self.coordinator.submit(request).unwrap().id
        }

        fn vote(&self, id: crate::core_types::ApprovalId, voter: &str, choice: VoteChoice) {
            self.coordinator
                .cast_vote(id, &UserId::from(voter), choice)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_vote_fails_on_approval_rate() {
        let v = VoteHarness::new(&[("alice", 400), ("bob", 200), ("carol", 100)]);
        let id = v.propose(50, 60);

        v.vote(id, "alice", VoteChoice::For);
        v.vote(id, "bob", VoteChoice::Against);
        v.vote(id, "carol", VoteChoice::Abstain);

        // Not yet closed
        assert_eq!(
            v.coordinator.finalize(id).await.unwrap_err().code(),
            "INVALID_STATE_TRANSITION"
        );

        v.clock.advance(Duration::days(3));
        let r = v.coordinator.finalize(id).await.unwrap();
        let tally = r.tally.clone().unwrap();
        assert_eq!(tally.total_cast, 700);
        assert_eq!(tally.turnout, Decimal::new(7, 1));
        // 400 / 700
        assert!(tally.approval_rate < Decimal::new(60, 2));
        assert!(!tally.passed);
        assert_eq!(r.status, ApprovalStatus::Rejected);
        assert!(v.ledger.audit_messages().is_empty());
    }

    #[tokio::test]
    async fn test_quorum_vote_executes_when_thresholds_met() {
        let v = VoteHarness::new(&[("alice", 400), ("bob", 200), ("carol", 100)]);
        let id = v.propose(50, 60);
        v.vote(id, "alice", VoteChoice::For);
        v.vote(id, "bob", VoteChoice::For);
        v.vote(id, "carol", VoteChoice::Against);

        v.clock.advance(Duration::days(4));
        let report = v.coordinator.sweep(v.clock.now()).await;
        assert_eq!(report.finalized, 1);

        let r = v.coordinator.get(id).unwrap();
        assert_eq!(r.status, ApprovalStatus::Executed);
        assert!(r.tally.as_ref().unwrap().passed);
        assert_eq!(v.ledger.audit_messages().len(), 1);

        // Tallied once
        let again = v.coordinator.finalize(id).await.unwrap();
        assert_eq!(again.status, ApprovalStatus::Executed);
        assert_eq!(v.ledger.audit_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_quorum_not_reached() {
        let v = VoteHarness::new(&[("alice", 100), ("bob", 50)]);
        let id = v.propose(20, 50);
        v.vote(id, "alice", VoteChoice::For);

        v.clock.advance(Duration::days(3));
        let r = v.coordinator.finalize(id).await.unwrap();
        // 100 / 1000 turnout
        assert_eq!(r.tally.unwrap().turnout, Decimal::new(1, 1));
        assert_eq!(r.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_vote_rules() {
        let v = VoteHarness::new(&[("alice", 100), ("bob", 50)]);
        let id = v.propose(10, 50);

        v.vote(id, "alice", VoteChoice::For);
        assert_eq!(
            v.coordinator
                .cast_vote(id, &UserId::from("alice"), VoteChoice::Against)
                .unwrap_err(),
            SettlementError::DuplicateVote
        );
        assert_eq!(
            v.coordinator
                .cast_vote(id, &UserId::from("stranger"), VoteChoice::For)
                .unwrap_err(),
            SettlementError::Unauthorized
        );
        // Weight comes from the snapshot
        assert_eq!(v.coordinator.get(id).unwrap().ballots[0].weight, 100);

        // Signer approvals do not apply to votes
        assert_eq!(
            v.coordinator
                .approve(id, &UserId::from("bob"))
                .await
                .unwrap_err()
                .code(),
            "VALIDATION_ERROR"
        );

        v.clock.advance(Duration::days(3));
        assert_eq!(
            v.coordinator
                .cast_vote(id, &UserId::from("bob"), VoteChoice::For)
                .unwrap_err(),
            SettlementError::RequestClosed("voting has ended".into())
        );
    }

    #[tokio::test]
    async fn test_votes_are_not_expired_by_reads() {
        let v = VoteHarness::new(&[("alice", 100)]);
        let id = v.propose(10, 50);
        v.clock.advance(Duration::days(10));
        assert_eq!(v.coordinator.get(id).unwrap().status, ApprovalStatus::Pending);
        assert_eq!(v.coordinator.list_pending().len(), 1);
    }
}
