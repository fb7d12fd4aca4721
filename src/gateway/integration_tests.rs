//! Handler-level tests: extractors, ownership checks, error mapping and the
//! payment webhook, driven against an engine wired with fakes.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use axum::{
        Json,
        body::Bytes,
        extract::{FromRequestParts, Path, State},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
    };
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::approval::ApprovalStatus;
    use crate::clock::ManualTimeSource;
    use crate::collaborators::fake::{
        FakeLedgerService, FakePaymentProcessor, FakePayoutGateway, RecordingNotificationSink,
    };
    use crate::collaborators::paystack::sign_webhook_body;
    use crate::config::SettlementConfig;
    use crate::core_types::{OfferingId, UserId};
    use crate::distribution::DistributionStatus;
    use crate::engine::{Collaborators, SettlementEngine};
    use crate::gateway::handlers::{approval, distribution, investment, offering, webhook};
    use crate::gateway::state::{AppState, Caller, SIGNATURE_HEADER, USER_HEADER};
    use crate::gateway::types::{ApiError, ApiResult, error_codes};
    use crate::investment::{Investment, InvestmentState};
    use crate::ledger::MemorySupplyLedger;

    const SECRET: &str = "whsec_test";

    struct GatewayHarness {
        state: Arc<AppState>,
        payments: Arc<FakePaymentProcessor>,
        payouts: Arc<FakePayoutGateway>,
    }

    impl GatewayHarness {
        fn new() -> Self {
            let payments = Arc::new(FakePaymentProcessor::new("NGN"));
            let payouts = Arc::new(FakePayoutGateway::new());
            let engine = SettlementEngine::new(
                Arc::new(MemorySupplyLedger::new()),
                Collaborators {
                    payments: payments.clone(),
                    ledger_service: Arc::new(FakeLedgerService::new()),
                    payouts: payouts.clone(),
                    notifier: Arc::new(RecordingNotificationSink::new()),
                },
                Arc::new(ManualTimeSource::at_epoch()),
                SettlementConfig::default(),
            );
            let state = Arc::new(AppState::new(
                Arc::new(engine),
                Some(SECRET.to_string()),
                None,
            ));
            Self {
                state,
                payments,
                payouts,
            }
        }

        fn state(&self) -> State<Arc<AppState>> {
            State(self.state.clone())
        }

        async fn offering(&self, owner: &str, supply: u64) -> OfferingId {
            let req = serde_json::from_value(json!({
                "name": "Banana Island Tower",
                "token_id": "0.0.4242",
                "total_supply": supply,
                "price_per_token": "100",
                "min_investment": "100",
                "window_start": "2024-12-01T00:00:00Z",
                "window_end": "2025-12-31T00:00:00Z",
            }))
            .unwrap();
            data(offering::register_offering(self.state(), caller(owner), Json(req)).await).id
        }

        async fn invest(&self, investor: &str, offering_id: OfferingId, amount: &str) -> Investment {
            let req = serde_json::from_value(json!({
                "offering_id": offering_id,
                "amount": amount,
                "payment_method": "card",
                "email": format!("{}@example.com", investor),
            }))
            .unwrap();
            data(investment::place_investment(self.state(), caller(investor), Json(req)).await)
        }
    }

    fn caller(user: &str) -> Caller {
        Caller(UserId::from(user))
    }

    fn data<T>(result: ApiResult<T>) -> T {
        match result {
            Ok(Json(body)) => {
                assert_eq!(body.code, error_codes::SUCCESS);
                body.data.unwrap()
            }
            Err(e) => panic!("handler failed: {:?}", e),
        }
    }

    fn error<T: std::fmt::Debug>(result: ApiResult<T>) -> ApiError {
        result.expect_err("handler should fail")
    }

    fn signed(body: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign_webhook_body(secret, body)).unwrap(),
        );
        headers
    }

    // ========================================================================
    // Caller extractor
    // ========================================================================

    #[tokio::test]
    async fn test_caller_reads_user_header() {
        let (mut parts, _) = Request::builder()
            .header(USER_HEADER, " alice ")
            .body(())
            .unwrap()
            .into_parts();
        let Caller(user) = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, UserId::from("alice"));
    }

    #[tokio::test]
    async fn test_caller_missing_header_is_401() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let err = Caller::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, error_codes::MISSING_AUTH);
    }

    // ========================================================================
    // Offerings & investments
    // ========================================================================

    #[tokio::test]
    async fn test_place_investment_reserves_supply() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;

        let inv = h.invest("alice", offering_id, "60000").await;
        assert_eq!(inv.state, InvestmentState::AwaitingPayment);
        assert_eq!(inv.tokens_requested, 600);

        let availability =
            data(offering::get_availability(h.state(), Path(offering_id)).await);
        assert_eq!(availability.tokens_reserved, 600);
        assert_eq!(availability.available, 400);
    }

    #[tokio::test]
    async fn test_oversubscription_maps_to_insufficient_supply() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        h.invest("alice", offering_id, "60000").await;

        let req = serde_json::from_value(json!({
            "offering_id": offering_id,
            "amount": "50000",
            "payment_method": "card",
            "email": "bob@example.com",
        }))
        .unwrap();
        let err = error(investment::place_investment(h.state(), caller("bob"), Json(req)).await);
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::INSUFFICIENT_SUPPLY);
    }

    #[tokio::test]
    async fn test_other_investors_records_are_hidden() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        let inv = h.invest("alice", offering_id, "10000").await;

        let err = error(investment::get_investment(h.state(), caller("mallory"), Path(inv.id)).await);
        assert_eq!(err.code, error_codes::NOT_FOUND);

        let own = data(investment::get_investment(h.state(), caller("alice"), Path(inv.id)).await);
        assert_eq!(own.id, inv.id);
    }

    #[tokio::test]
    async fn test_refund_is_owner_only() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        let inv = h.invest("alice", offering_id, "10000").await;
        let body = json!({ "reference": inv.payment_reference });
        data(
            investment::confirm_payment(
                h.state(),
                caller("alice"),
                Path(inv.id),
                Json(serde_json::from_value(body).unwrap()),
            )
            .await,
        );

        let reason = || Json(serde_json::from_value(json!({ "reason": "chargeback" })).unwrap());
        let err = error(
            investment::refund_investment(h.state(), caller("alice"), Path(inv.id), reason()).await,
        );
        assert_eq!(err.code, error_codes::UNAUTHORIZED);

        let refunded = data(
            investment::refund_investment(h.state(), caller("owner"), Path(inv.id), reason()).await,
        );
        assert_eq!(refunded.state, InvestmentState::Refunded);
    }

    // ========================================================================
    // Payment webhook
    // ========================================================================

    #[tokio::test]
    async fn test_webhook_confirms_investment() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        let inv = h.invest("alice", offering_id, "60000").await;

        let body = serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": { "reference": inv.payment_reference, "amount": 6_000_000 },
        }))
        .unwrap();
        let headers = signed(&body, SECRET);

        let ack = data(webhook::payment_webhook(h.state(), headers.clone(), Bytes::from(body.clone())).await);
        assert!(ack.handled);
        assert_eq!(ack.investment_state.as_deref(), Some("confirmed"));

        // Redelivery is harmless
        let again = data(webhook::payment_webhook(h.state(), headers, Bytes::from(body)).await);
        assert_eq!(again.investment_state.as_deref(), Some("confirmed"));
        let holdings = data(investment::list_holdings(h.state(), caller("alice")).await);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].balance, 600);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let h = GatewayHarness::new();
        let body = br#"{"event":"charge.success","data":{"reference":"INV-x"}}"#.to_vec();

        let err = error(
            webhook::payment_webhook(h.state(), signed(&body, "wrong"), Bytes::from(body.clone()))
                .await,
        );
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, error_codes::INVALID_SIGNATURE);

        let err = error(webhook::payment_webhook(h.state(), HeaderMap::new(), Bytes::from(body)).await);
        assert_eq!(err.code, error_codes::INVALID_SIGNATURE);
    }

    #[tokio::test]
    async fn test_webhook_ignores_other_events() {
        let h = GatewayHarness::new();
        let body = br#"{"event":"transfer.success","data":{"reference":"TRW-1"}}"#.to_vec();
        let ack = data(
            webhook::payment_webhook(h.state(), signed(&body, SECRET), Bytes::from(body)).await,
        );
        assert!(!ack.handled);
    }

    #[tokio::test]
    async fn test_webhook_transient_failure_asks_for_redelivery() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        let inv = h.invest("alice", offering_id, "10000").await;
        h.payments.set_unavailable(true);

        let body = serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": { "reference": inv.payment_reference },
        }))
        .unwrap();
        let result =
            webhook::payment_webhook(h.state(), signed(&body, SECRET), Bytes::from(body)).await;
        match result {
            Ok(Json(body)) => {
                // Transient verify failures leave the investment untouched
                let ack = body.data.unwrap();
                assert_ne!(ack.investment_state.as_deref(), Some("confirmed"));
            }
            Err(e) => assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE),
        }
    }

    #[tokio::test]
    async fn test_webhook_refused_without_secret() {
        let h = GatewayHarness::new();
        let state = Arc::new(AppState::new(h.state.engine.clone(), None, None));
        let body = br#"{"event":"charge.success","data":{"reference":"INV-x"}}"#.to_vec();
        let err = error(
            webhook::payment_webhook(State(state), signed(&body, SECRET), Bytes::from(body)).await,
        );
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    // ========================================================================
    // Distributions
    // ========================================================================

    #[tokio::test]
    async fn test_distribution_lifecycle_over_handlers() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        for (investor, amount) in [("alice", "60000"), ("bob", "40000")] {
            let inv = h.invest(investor, offering_id, amount).await;
            let body = json!({ "reference": inv.payment_reference });
            data(
                investment::confirm_payment(
                    h.state(),
                    caller(investor),
                    Path(inv.id),
                    Json(serde_json::from_value(body).unwrap()),
                )
                .await,
            );
        }

        let create = || {
            Json(
                serde_json::from_value(json!({
                    "offering_id": offering_id,
                    "per_token_amount": "10",
                }))
                .unwrap(),
            )
        };
        let err = error(distribution::create_distribution(h.state(), caller("alice"), create()).await);
        assert_eq!(err.code, error_codes::UNAUTHORIZED);

        let dist =
            data(distribution::create_distribution(h.state(), caller("owner"), create()).await);
        assert_eq!(dist.total_amount, Decimal::from(10_000));
        assert_eq!(dist.total_tax, Decimal::from(1_000));

        let done =
            data(distribution::process_payments(h.state(), caller("owner"), Path(dist.id)).await);
        assert_eq!(done.status, DistributionStatus::Completed);
        assert_eq!(done.successful_payments, 2);
        assert_eq!(h.payouts.total_paid_to(&UserId::from("alice")), Decimal::from(5_400));

        let rows = data(distribution::get_payments(h.state(), caller("owner"), Path(dist.id)).await);
        assert_eq!(rows.len(), 2);
    }

    // ========================================================================
    // Approvals
    // ========================================================================

    #[tokio::test]
    async fn test_withdrawal_needs_both_signatures() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        let body = json!({
            "offering_id": offering_id,
            "amount": "250000",
            "recipient": "contractor",
            "purpose": "roof repairs",
            "admins": ["admin"],
        });

        let err = error(
            approval::submit_withdrawal(
                h.state(),
                caller("admin"),
                Json(serde_json::from_value(body.clone()).unwrap()),
            )
            .await,
        );
        assert_eq!(err.code, error_codes::UNAUTHORIZED);

        let request = data(
            approval::submit_withdrawal(
                h.state(),
                caller("owner"),
                Json(serde_json::from_value(body).unwrap()),
            )
            .await,
        );
        assert_eq!(request.status, ApprovalStatus::Pending);

        let err = error(approval::approve(h.state(), caller("stranger"), Path(request.id)).await);
        assert_eq!(err.code, error_codes::UNAUTHORIZED);

        let first = data(approval::approve(h.state(), caller("owner"), Path(request.id)).await);
        assert_eq!(first.status, ApprovalStatus::Pending);
        let err = error(approval::approve(h.state(), caller("owner"), Path(request.id)).await);
        assert_eq!(err.code, error_codes::ALREADY_APPROVED);

        let done = data(approval::approve(h.state(), caller("admin"), Path(request.id)).await);
        assert_eq!(done.status, ApprovalStatus::Executed);
        assert_eq!(
            h.payouts.total_paid_to(&UserId::from("contractor")),
            Decimal::from(250_000)
        );

        let err = error(approval::get_approval(h.state(), caller("stranger"), Path(request.id)).await);
        assert_eq!(err.code, error_codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_proposal_votes_over_handlers() {
        let h = GatewayHarness::new();
        let offering_id = h.offering("owner", 1000).await;
        let inv = h.invest("alice", offering_id, "80000").await;
        data(
            investment::confirm_payment(
                h.state(),
                caller("alice"),
                Path(inv.id),
                Json(serde_json::from_value(json!({ "reference": inv.payment_reference })).unwrap()),
            )
            .await,
        );

        let proposal = data(
            approval::submit_proposal(
                h.state(),
                caller("alice"),
                Json(
                    serde_json::from_value(json!({
                        "offering_id": offering_id,
                        "title": "Repaint facade",
                        "quorum_required": "0.5",
                        "approval_threshold": "0.5",
                        "voting_ends_at": "2025-01-08T00:00:00Z",
                    }))
                    .unwrap(),
                ),
            )
            .await,
        );

        let vote = || Json(serde_json::from_value(json!({ "choice": "for" })).unwrap());
        let after = data(approval::cast_vote(h.state(), caller("alice"), Path(proposal.id), vote()).await);
        assert_eq!(after.ballots.len(), 1);

        let err = error(approval::cast_vote(h.state(), caller("alice"), Path(proposal.id), vote()).await);
        assert_eq!(err.code, error_codes::DUPLICATE_VOTE);

        // Multisig verbs do not apply to votes
        let err = error(approval::approve(h.state(), caller("alice"), Path(proposal.id)).await);
        assert_eq!(err.code, error_codes::INVALID_PARAMETER);

        // Voting window still open
        let err = error(approval::finalize(h.state(), Path(proposal.id)).await);
        assert_eq!(err.code, error_codes::INVALID_STATE);
    }
}
