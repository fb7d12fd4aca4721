//! Settlement Engine
//!
//! Wires the supply ledger, reservations, investment state machine,
//! dividend engine and approval coordinator behind one facade. This is the
//! surface the HTTP gateway and the binary talk to.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::approval::{
    ApprovalCoordinator, ApprovalRequest, NewApprovalRequest, ProposalExecutor, ProposalParams,
    SubjectKind, TreasuryExecutor, VoteChoice, WithdrawalParams, proposal_request,
    withdrawal_request,
};
use crate::clock::TimeSource;
use crate::collaborators::{LedgerService, NotificationSink, PaymentProcessor, PayoutGateway};
use crate::config::SettlementConfig;
use crate::core_types::{
    ApprovalId, DistributionId, InvestmentId, Money, OfferingId, TokenAmount, UserId,
};
use crate::distribution::{
    DistributionEngine, DistributionStore, DividendDistribution, DividendPayment,
};
use crate::error::SettlementError;
use crate::investment::{
    DeliveryWorkerConfig, HoldingStore, Investment, InvestmentService, InvestmentStore,
    PlaceInvestment, TokenDeliveryWorker, TokenHolding,
};
use crate::ledger::{Availability, Offering, OfferingStatus, OfferingTerms, SupplyLedger};
use crate::reservation::ReservationManager;
use crate::sweeper::{ExpirySweeper, SweeperConfig};

/// External systems the engine calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub payments: Arc<dyn PaymentProcessor>,
    pub ledger_service: Arc<dyn LedgerService>,
    pub payouts: Arc<dyn PayoutGateway>,
    pub notifier: Arc<dyn NotificationSink>,
}

pub struct SettlementEngine {
    supply: Arc<dyn SupplyLedger>,
    holdings: Arc<HoldingStore>,
    investments: Arc<InvestmentService>,
    distributions: Arc<DistributionEngine>,
    approvals: Arc<ApprovalCoordinator>,
    clock: Arc<dyn TimeSource>,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        supply: Arc<dyn SupplyLedger>,
        collaborators: Collaborators,
        clock: Arc<dyn TimeSource>,
        config: SettlementConfig,
    ) -> Self {
        let holdings = Arc::new(HoldingStore::new());
        let reservations = Arc::new(ReservationManager::new(
            supply.clone(),
            clock.clone(),
            config.reservation_hold(),
        ));

        let investments = Arc::new(InvestmentService::new(
            reservations,
            Arc::new(InvestmentStore::new()),
            holdings.clone(),
            collaborators.payments.clone(),
            collaborators.ledger_service.clone(),
            collaborators.notifier.clone(),
            clock.clone(),
            config.investment_settings(),
        ));

        let distributions = Arc::new(DistributionEngine::new(
            Arc::new(DistributionStore::new()),
            holdings.clone(),
            supply.clone(),
            collaborators.payouts.clone(),
            collaborators.ledger_service.clone(),
            collaborators.notifier.clone(),
            clock.clone(),
            config.distribution_settings(),
        ));

        let approvals = Arc::new(ApprovalCoordinator::new(
            collaborators.notifier.clone(),
            clock.clone(),
        ));
        approvals.register_executor(
            SubjectKind::TreasuryWithdrawal,
            Arc::new(TreasuryExecutor::new(
                collaborators.payouts.clone(),
                config.currency.clone(),
            )),
        );
        approvals.register_executor(
            SubjectKind::GovernanceProposal,
            Arc::new(ProposalExecutor::new(
                collaborators.ledger_service.clone(),
                config.audit_topic_id.clone(),
            )),
        );

        info!(
            hold_secs = config.reservation_hold_secs,
            withholding_rate = %config.withholding_rate,
            currency = %config.currency,
            "Settlement engine initialized"
        );

        Self {
            supply,
            holdings,
            investments,
            distributions,
            approvals,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn investments(&self) -> &Arc<InvestmentService> {
        &self.investments
    }

    pub fn approvals(&self) -> &Arc<ApprovalCoordinator> {
        &self.approvals
    }

    pub fn delivery_worker(&self) -> TokenDeliveryWorker {
        TokenDeliveryWorker::new(
            self.investments.clone(),
            self.clock.clone(),
            DeliveryWorkerConfig {
                scan_interval: Duration::from_secs(self.config.delivery_scan_interval_secs.max(1)),
                ..DeliveryWorkerConfig::default()
            },
        )
    }

    pub fn expiry_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.investments.clone(),
            self.approvals.clone(),
            self.clock.clone(),
            SweeperConfig {
                interval: self.config.sweep_interval(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Offerings
    // ------------------------------------------------------------------

    pub async fn register_offering(&self, terms: OfferingTerms) -> Result<Offering, SettlementError> {
        self.supply.register(terms, self.clock.now()).await
    }

    pub async fn get_offering(&self, id: OfferingId) -> Result<Offering, SettlementError> {
        self.supply.get(id).await
    }

    pub async fn list_offerings(&self) -> Result<Vec<Offering>, SettlementError> {
        self.supply.list().await
    }

    pub async fn get_offering_availability(
        &self,
        id: OfferingId,
    ) -> Result<Availability, SettlementError> {
        self.supply.availability(id).await
    }

    pub async fn transition_offering(
        &self,
        id: OfferingId,
        next: OfferingStatus,
    ) -> Result<Offering, SettlementError> {
        self.supply.transition(id, next).await
    }

    // ------------------------------------------------------------------
    // Investments
    // ------------------------------------------------------------------

    pub async fn place_investment(
        &self,
        req: PlaceInvestment,
    ) -> Result<Investment, SettlementError> {
        self.investments.place_investment(req).await
    }

    pub async fn confirm_payment(
        &self,
        id: InvestmentId,
        reference: &str,
    ) -> Result<Investment, SettlementError> {
        self.investments.confirm_payment(id, reference).await
    }

    /// Confirm from a processor notification that only carries the reference
    pub async fn confirm_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Investment, SettlementError> {
        let id = self
            .investments
            .store()
            .find_by_reference(reference)
            .ok_or_else(|| SettlementError::NotFound(format!("payment reference {}", reference)))?;
        self.investments.confirm_payment(id, reference).await
    }

    pub fn get_investment(&self, id: InvestmentId) -> Result<Investment, SettlementError> {
        self.investments.get(id)
    }

    pub fn investments_for(&self, investor: &UserId) -> Vec<Investment> {
        self.investments.store().list_by_investor(investor)
    }

    pub async fn cancel_investment(
        &self,
        id: InvestmentId,
        investor: &UserId,
    ) -> Result<Investment, SettlementError> {
        self.investments.cancel_investment(id, investor).await
    }

    pub async fn refund_investment(
        &self,
        id: InvestmentId,
        reason: &str,
    ) -> Result<Investment, SettlementError> {
        self.investments.refund_investment(id, reason).await
    }

    pub fn holdings_for(&self, user: &UserId) -> Vec<TokenHolding> {
        self.holdings.for_user(user)
    }

    // ------------------------------------------------------------------
    // Dividends
    // ------------------------------------------------------------------

    pub async fn create_distribution(
        &self,
        offering_id: OfferingId,
        per_token_amount: Money,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<DividendDistribution, SettlementError> {
        self.distributions
            .create_distribution(offering_id, per_token_amount, as_of)
            .await
    }

    pub async fn process_payments(
        &self,
        id: DistributionId,
    ) -> Result<DividendDistribution, SettlementError> {
        self.distributions.process_payments(id).await
    }

    pub async fn retry_failed_payments(
        &self,
        id: DistributionId,
    ) -> Result<DividendDistribution, SettlementError> {
        self.distributions.retry_failed(id).await
    }

    pub fn get_distribution(
        &self,
        id: DistributionId,
    ) -> Result<DividendDistribution, SettlementError> {
        self.distributions.get(id)
    }

    pub fn distribution_payments(
        &self,
        id: DistributionId,
    ) -> Result<Vec<DividendPayment>, SettlementError> {
        self.distributions.payments(id)
    }

    pub fn abandon_distribution(
        &self,
        id: DistributionId,
    ) -> Result<DividendDistribution, SettlementError> {
        self.distributions.abandon(id)
    }

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    pub fn submit_approval(
        &self,
        request: NewApprovalRequest,
    ) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.submit(request)
    }

    /// Treasury withdrawal signed by the offering owner and the given admins
    pub async fn submit_withdrawal(
        &self,
        params: WithdrawalParams,
    ) -> Result<ApprovalRequest, SettlementError> {
        let offering = self.supply.get(params.offering_id).await?;
        if params.owner != offering.owner_id {
            return Err(SettlementError::Unauthorized);
        }
        self.approvals.submit(withdrawal_request(params)?)
    }

    /// Governance proposal voted on by current holders, weighted by balance
    pub async fn submit_proposal(
        &self,
        params: ProposalParams,
    ) -> Result<ApprovalRequest, SettlementError> {
        let offering = self.supply.get(params.offering_id).await?;
        let is_holder = self
            .holdings
            .get(&params.proposer, params.offering_id)
            .is_some_and(|h| h.balance > 0);
        if params.proposer != offering.owner_id && !is_holder {
            return Err(SettlementError::Unauthorized);
        }
        let total_supply: TokenAmount = offering.total_supply;
        let request = proposal_request(params, &self.holdings, total_supply, self.clock.now())?;
        self.approvals.submit(request)
    }

    pub async fn approve(
        &self,
        id: ApprovalId,
        signer: &UserId,
    ) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.approve(id, signer).await
    }

    pub fn reject(&self, id: ApprovalId, signer: &UserId) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.reject(id, signer)
    }

    pub fn cast_vote(
        &self,
        id: ApprovalId,
        voter: &UserId,
        choice: VoteChoice,
    ) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.cast_vote(id, voter, choice)
    }

    pub async fn finalize_proposal(
        &self,
        id: ApprovalId,
    ) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.finalize(id).await
    }

    pub async fn retry_execution(
        &self,
        id: ApprovalId,
    ) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.retry_execution(id).await
    }

    pub fn get_approval(&self, id: ApprovalId) -> Result<ApprovalRequest, SettlementError> {
        self.approvals.get(id)
    }
}
