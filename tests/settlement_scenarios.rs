//! End-to-end settlement scenarios through the public engine facade.
//!
//! Every scenario runs against the in-memory supply ledger, the deterministic
//! fake collaborators and a manually advanced clock.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use estate_settlement::approval::{ApprovalStatus, ProposalParams, VoteChoice, WithdrawalParams};
use estate_settlement::clock::{ManualTimeSource, TimeSource};
use estate_settlement::collaborators::fake::{
    FakeLedgerService, FakePaymentProcessor, FakePayoutGateway, RecordingNotificationSink,
};
use estate_settlement::config::SettlementConfig;
use estate_settlement::engine::{Collaborators, SettlementEngine};
use estate_settlement::error::SettlementError;
use estate_settlement::investment::{InvestmentState, PaymentMethod, PlaceInvestment};
use estate_settlement::ledger::{MemorySupplyLedger, OfferingStatus, OfferingTerms};
use estate_settlement::{OfferingId, UserId};

struct Scenario {
    engine: Arc<SettlementEngine>,
    clock: Arc<ManualTimeSource>,
    payments: Arc<FakePaymentProcessor>,
    ledger_service: Arc<FakeLedgerService>,
    payouts: Arc<FakePayoutGateway>,
}

impl Scenario {
    fn new() -> Self {
        let clock = Arc::new(ManualTimeSource::at_epoch());
        let payments = Arc::new(FakePaymentProcessor::new("NGN"));
        let ledger_service = Arc::new(FakeLedgerService::new());
        let payouts = Arc::new(FakePayoutGateway::new());
        let engine = SettlementEngine::new(
            Arc::new(MemorySupplyLedger::new()),
            Collaborators {
                payments: payments.clone(),
                ledger_service: ledger_service.clone(),
                payouts: payouts.clone(),
                notifier: Arc::new(RecordingNotificationSink::new()),
            },
            clock.clone(),
            SettlementConfig::default(),
        );
        Self {
            engine: Arc::new(engine),
            clock,
            payments,
            ledger_service,
            payouts,
        }
    }

    async fn offering(&self, total_supply: u64) -> OfferingId {
        let start = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        self.engine
            .register_offering(OfferingTerms {
                name: "Victoria Island Lofts".into(),
                owner_id: UserId::from("owner"),
                token_id: "0.0.4242".into(),
                total_supply,
                price_per_token: Decimal::from(100),
                min_investment: Decimal::from(100),
                max_investment: None,
                min_tokens_per_purchase: 1,
                max_tokens_per_purchase: None,
                window_start: start,
                window_end: start + Duration::days(365),
                status: OfferingStatus::Active,
            })
            .await
            .unwrap()
            .id
    }

    fn card(offering_id: OfferingId, investor: &str, tokens: u64) -> PlaceInvestment {
        PlaceInvestment {
            investor_id: UserId::from(investor),
            offering_id,
            amount: Decimal::from(tokens * 100),
            payment_method: PaymentMethod::Card,
            email: Some(format!("{}@example.com", investor)),
        }
    }

    /// Place and confirm; returns the allocated token count
    async fn buy(&self, offering_id: OfferingId, investor: &str, tokens: u64) -> u64 {
        let inv = self
            .engine
            .place_investment(Self::card(offering_id, investor, tokens))
            .await
            .unwrap();
        self.engine
            .confirm_payment(inv.id, &inv.payment_reference)
            .await
            .unwrap()
            .tokens_allocated
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_reservations_never_oversell() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let engine = s.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .place_investment(Scenario::card(offering_id, &format!("investor-{}", i), 30))
                .await
        }));
    }

    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(SettlementError::InsufficientSupply { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    // 33 * 30 = 990 fits, the 34th hold would need 1020
    assert_eq!(placed, 33);
    let availability = s.engine.get_offering_availability(offering_id).await.unwrap();
    assert_eq!(availability.tokens_reserved, 990);
    assert!(availability.tokens_sold + availability.tokens_reserved <= availability.total_supply);
}

#[tokio::test]
async fn confirming_twice_allocates_once() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;
    let inv = s
        .engine
        .place_investment(Scenario::card(offering_id, "alice", 600))
        .await
        .unwrap();

    let first = s.engine.confirm_payment(inv.id, &inv.payment_reference).await.unwrap();
    let second = s.engine.confirm_payment(inv.id, &inv.payment_reference).await.unwrap();
    assert_eq!(first.state, InvestmentState::Confirmed);
    assert_eq!(second.state, InvestmentState::Confirmed);

    let offering = s.engine.get_offering(offering_id).await.unwrap();
    assert_eq!(offering.tokens_sold, 600);
    assert_eq!(offering.investor_count, 1);
    assert_eq!(s.ledger_service.transfer_count(), 1);
    assert_eq!(s.engine.holdings_for(&UserId::from("alice"))[0].balance, 600);
}

#[tokio::test]
async fn expired_hold_frees_supply_for_next_investor() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;

    let a = s
        .engine
        .place_investment(Scenario::card(offering_id, "alice", 600))
        .await
        .unwrap();
    let err = s
        .engine
        .place_investment(Scenario::card(offering_id, "bob", 500))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InsufficientSupply {
            requested: 500,
            available: 400
        }
    ));

    s.clock.advance(Duration::seconds(901));
    let report = s.engine.expiry_sweeper().sweep_once().await;
    assert_eq!(report.investments_expired, 1);
    assert_eq!(s.engine.get_investment(a.id).unwrap().state, InvestmentState::Failed);

    let b = s
        .engine
        .place_investment(Scenario::card(offering_id, "bob", 500))
        .await
        .unwrap();
    assert_eq!(b.tokens_requested, 500);

    // Alice's late payment is refused
    let late = s.engine.confirm_payment(a.id, &a.payment_reference).await;
    assert!(late.map(|inv| inv.state != InvestmentState::Confirmed).unwrap_or(true));
    assert_eq!(s.engine.get_offering(offering_id).await.unwrap().tokens_sold, 0);
}

#[tokio::test]
async fn dividend_splits_into_net_and_withholding() {
    let s = Scenario::new();
    let offering_id = s.offering(10_000).await;
    for i in 0..50 {
        assert_eq!(s.buy(offering_id, &format!("holder-{}", i), 200).await, 200);
    }

    let dist = s
        .engine
        .create_distribution(offering_id, Decimal::ONE, None)
        .await
        .unwrap();
    assert_eq!(dist.total_recipients, 50);
    assert_eq!(dist.total_amount, Decimal::from(10_000));
    assert_eq!(dist.total_tax, Decimal::from(1_000));
    assert_eq!(dist.total_net, Decimal::from(9_000));

    let done = s.engine.process_payments(dist.id).await.unwrap();
    assert_eq!(done.successful_payments, 50);

    let rows = s.engine.distribution_payments(dist.id).unwrap();
    let net: Decimal = rows.iter().map(|r| r.net_amount).sum();
    let tax: Decimal = rows.iter().map(|r| r.tax_withheld).sum();
    assert_eq!(net + tax, dist.total_amount);
    assert_eq!(s.payouts.payment_count(), 50);
    assert_eq!(s.payouts.total_paid_to(&UserId::from("holder-7")), Decimal::from(180));
}

#[tokio::test]
async fn treasury_withdrawal_executes_on_last_signature() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;
    let request = s
        .engine
        .submit_withdrawal(WithdrawalParams {
            offering_id,
            amount: Decimal::from(500_000),
            recipient: UserId::from("facility-manager"),
            purpose: "annual maintenance".into(),
            owner: UserId::from("owner"),
            admins: vec![UserId::from("admin-1"), UserId::from("admin-2")],
            required_approvals: Some(2),
            deadline: None,
        })
        .await
        .unwrap();

    let pending = s.engine.approve(request.id, &UserId::from("admin-1")).await.unwrap();
    assert_eq!(pending.status, ApprovalStatus::Pending);
    assert_eq!(s.payouts.payment_count(), 0);

    let executed = s.engine.approve(request.id, &UserId::from("owner")).await.unwrap();
    assert_eq!(executed.status, ApprovalStatus::Executed);
    assert_eq!(s.payouts.payment_count(), 1);
    assert_eq!(
        s.payouts.total_paid_to(&UserId::from("facility-manager")),
        Decimal::from(500_000)
    );

    let late = s.engine.approve(request.id, &UserId::from("admin-2")).await;
    assert!(matches!(late, Err(SettlementError::RequestClosed(_))));
    assert_eq!(s.payouts.payment_count(), 1);
}

#[tokio::test]
async fn unsigned_withdrawal_expires_at_deadline() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;
    let request = s
        .engine
        .submit_withdrawal(WithdrawalParams {
            offering_id,
            amount: Decimal::from(1_000),
            recipient: UserId::from("vendor"),
            purpose: "signage".into(),
            owner: UserId::from("owner"),
            admins: vec![UserId::from("admin")],
            required_approvals: None,
            deadline: Some(s.clock.now() + Duration::hours(24)),
        })
        .await
        .unwrap();
    s.engine.approve(request.id, &UserId::from("owner")).await.unwrap();

    s.clock.advance(Duration::hours(25));
    let report = s.engine.expiry_sweeper().sweep_once().await;
    assert_eq!(report.approvals.expired, 1);

    let expired = s.engine.get_approval(request.id).unwrap();
    assert_eq!(expired.status, ApprovalStatus::Expired);
    let err = s.engine.approve(request.id, &UserId::from("admin")).await.unwrap_err();
    assert!(matches!(err, SettlementError::RequestClosed(_)));
    assert_eq!(s.payouts.payment_count(), 0);
}

#[tokio::test]
async fn governance_vote_passes_and_is_recorded() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;
    s.buy(offering_id, "alice", 500).await;
    s.buy(offering_id, "bob", 300).await;
    s.buy(offering_id, "carol", 200).await;
    let audits_before = s.ledger_service.audit_messages().len();

    let proposal = s
        .engine
        .submit_proposal(ProposalParams {
            offering_id,
            title: "Convert ground floor to retail".into(),
            description: "Lease to a pharmacy chain".into(),
            proposer: UserId::from("carol"),
            quorum_required: Decimal::new(5, 1),
            approval_threshold: Decimal::new(5, 1),
            voting_ends_at: s.clock.now() + Duration::days(7),
        })
        .await
        .unwrap();

    s.engine
        .cast_vote(proposal.id, &UserId::from("alice"), VoteChoice::For)
        .unwrap();
    s.engine
        .cast_vote(proposal.id, &UserId::from("bob"), VoteChoice::Against)
        .unwrap();
    let err = s
        .engine
        .cast_vote(proposal.id, &UserId::from("mallory"), VoteChoice::For)
        .unwrap_err();
    assert_eq!(err, SettlementError::Unauthorized);

    s.clock.advance(Duration::days(7));
    let report = s.engine.expiry_sweeper().sweep_once().await;
    assert_eq!(report.approvals.finalized, 1);

    let finalized = s.engine.get_approval(proposal.id).unwrap();
    assert_eq!(finalized.status, ApprovalStatus::Executed);
    let tally = finalized.tally.unwrap();
    assert_eq!(tally.votes_for, 500);
    assert_eq!(tally.votes_against, 300);
    assert!(tally.passed);
    assert_eq!(s.ledger_service.audit_messages().len(), audits_before + 1);
}

#[tokio::test]
async fn processor_outage_leaves_investment_pending() {
    let s = Scenario::new();
    let offering_id = s.offering(1000).await;
    let inv = s
        .engine
        .place_investment(Scenario::card(offering_id, "alice", 100))
        .await
        .unwrap();

    s.payments.set_unavailable(true);
    let _ = s.engine.confirm_payment(inv.id, &inv.payment_reference).await;
    assert_eq!(
        s.engine.get_investment(inv.id).unwrap().state,
        InvestmentState::AwaitingPayment
    );

    s.payments.set_unavailable(false);
    let confirmed = s
        .engine
        .confirm_payment_by_reference(&inv.payment_reference)
        .await
        .unwrap();
    assert_eq!(confirmed.state, InvestmentState::Confirmed);
}
