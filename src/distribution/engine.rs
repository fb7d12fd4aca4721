//! Dividend Distribution Engine
//!
//! Snapshots holders, computes withholding, and pays each holder through
//! the payout rail with bounded concurrency and a per-row timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};

use super::store::DistributionStore;
use super::types::{
    DistributionStatus, DividendDistribution, DividendPayment, PaymentRowStatus, PayoutOutcome,
};
use crate::clock::TimeSource;
use crate::collaborators::{LedgerService, NotificationKind, NotificationSink, PayoutGateway};
use crate::core_types::{DistributionId, Money, OfferingId, PaymentId};
use crate::error::SettlementError;
use crate::investment::HoldingStore;
use crate::ledger::SupplyLedger;
use crate::money::split_withholding;

#[derive(Debug, Clone)]
pub struct DistributionSettings {
    /// Fraction of gross withheld as tax (0.10 = 10%)
    pub withholding_rate: Decimal,
    pub currency: String,
    pub currency_decimals: u32,
    pub payout_timeout: Duration,
    pub payout_concurrency: usize,
    pub audit_topic_id: String,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            withholding_rate: Decimal::new(10, 2),
            currency: "NGN".to_string(),
            currency_decimals: 2,
            payout_timeout: Duration::from_secs(30),
            payout_concurrency: 16,
            audit_topic_id: "0.0.2002".to_string(),
        }
    }
}

pub struct DistributionEngine {
    store: Arc<DistributionStore>,
    holdings: Arc<HoldingStore>,
    supply: Arc<dyn SupplyLedger>,
    payouts: Arc<dyn PayoutGateway>,
    ledger_service: Arc<dyn LedgerService>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn TimeSource>,
    settings: DistributionSettings,
}

impl DistributionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DistributionStore>,
        holdings: Arc<HoldingStore>,
        supply: Arc<dyn SupplyLedger>,
        payouts: Arc<dyn PayoutGateway>,
        ledger_service: Arc<dyn LedgerService>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn TimeSource>,
        settings: DistributionSettings,
    ) -> Self {
        Self {
            store,
            holdings,
            supply,
            payouts,
            ledger_service,
            notifier,
            clock,
            settings,
        }
    }

    pub fn get(&self, id: DistributionId) -> Result<DividendDistribution, SettlementError> {
        self.store.get(id)
    }

    pub fn payments(&self, id: DistributionId) -> Result<Vec<DividendPayment>, SettlementError> {
        self.store.payments(id)
    }

    pub fn list_by_offering(&self, offering: OfferingId) -> Vec<DividendDistribution> {
        self.store.list_by_offering(offering)
    }

    /// Snapshot holders and create the distribution with one payment row
    /// per holder.
    ///
    /// `as_of` defaults to now. Rows are written with the distribution in a
    /// single insert.
    pub async fn create_distribution(
        &self,
        offering_id: OfferingId,
        per_token_amount: Money,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<DividendDistribution, SettlementError> {
        if per_token_amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(
                "per_token_amount must be positive".into(),
            ));
        }
        if per_token_amount.normalize().scale() > self.settings.currency_decimals {
            return Err(SettlementError::Validation(format!(
                "per_token_amount has more than {} decimals",
                self.settings.currency_decimals
            )));
        }

        // Existence check
        self.supply.get(offering_id).await?;

        let now = self.clock.now();
        let as_of = as_of.unwrap_or(now);
        let holders = self.holdings.snapshot(offering_id, as_of);
        if holders.is_empty() {
            return Err(SettlementError::Validation(
                "offering has no token holders at the snapshot date".into(),
            ));
        }

        let id = DistributionId::new();
        let mut payments = Vec::with_capacity(holders.len());
        let (mut total, mut total_tax, mut total_net) = (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);

        for (recipient, balance) in holders {
            let gross = Decimal::from(balance) * per_token_amount;
            let split = split_withholding(
                gross,
                self.settings.withholding_rate,
                self.settings.currency_decimals,
            )?;
            total += split.gross;
            total_tax += split.tax;
            total_net += split.net;

            payments.push(DividendPayment {
                id: PaymentId::new(),
                distribution_id: id,
                recipient_id: recipient,
                tokens_held_at_snapshot: balance,
                gross_amount: split.gross,
                tax_withheld: split.tax,
                net_amount: split.net,
                status: PaymentRowStatus::Pending,
                attempts: 0,
                last_error: None,
                transaction_reference: None,
                paid_at: None,
            });
        }

        let distribution = DividendDistribution {
            id,
            offering_id,
            per_token_amount,
            withholding_rate: self.settings.withholding_rate,
            currency: self.settings.currency.clone(),
            total_amount: total,
            total_tax,
            total_net,
            distribution_date: as_of,
            status: DistributionStatus::Pending,
            total_recipients: payments.len() as u64,
            successful_payments: 0,
            failed_payments: 0,
            created_at: now,
            completed_at: None,
        };
        self.store.insert(distribution.clone(), payments);

        info!(
            distribution_id = %id,
            offering_id = %offering_id,
            recipients = distribution.total_recipients,
            total = %total,
            tax = %total_tax,
            net = %total_net,
            "Dividend distribution created"
        );
        Ok(distribution)
    }

    /// Pay every outstanding row.
    ///
    /// A pending distribution pays its pending rows; calling again on a
    /// completed distribution retries its failed rows. A slow or failing
    /// recipient never holds up the others. The distribution always ends
    /// `Completed`; check `failed_payments` for rows needing another run.
    ///
    /// Each row's outcome is stored as soon as its payout returns. If the
    /// run is dropped midway the claim is released, so paid rows stay paid
    /// and the remaining rows go to the next run under the same payout
    /// reference.
    pub async fn process_payments(
        &self,
        id: DistributionId,
    ) -> Result<DividendDistribution, SettlementError> {
        let (rows, resume) = self.store.claim(id)?;
        let mut claim = ClaimGuard {
            store: &self.store,
            id,
            resume,
            armed: true,
        };
        let distribution = self.store.get(id)?;
        info!(distribution_id = %id, rows = rows.len(), "Processing dividend payments");

        let concurrency = self.settings.payout_concurrency.max(1);
        stream::iter(rows)
            .map(|row| {
                let distribution = &distribution;
                async move {
                    let outcome = self.pay_row(&row).await;
                    self.record_row(distribution, &row, &outcome);
                }
            })
            .buffer_unordered(concurrency)
            .for_each(|()| async {})
            .await;

        let completed = self.store.complete(id, self.clock.now())?;
        claim.armed = false;
        info!(
            distribution_id = %id,
            successful = completed.successful_payments,
            failed = completed.failed_payments,
            "Dividend distribution processed"
        );
        self.record_audit(&completed).await;
        Ok(completed)
    }

    /// Retry failed rows of a completed distribution
    pub async fn retry_failed(
        &self,
        id: DistributionId,
    ) -> Result<DividendDistribution, SettlementError> {
        let current = self.store.get(id)?;
        if current.status != DistributionStatus::Completed {
            return Err(SettlementError::InvalidStateTransition(format!(
                "cannot retry a {} distribution",
                current.status
            )));
        }
        self.process_payments(id).await
    }

    /// Operator marks the distribution failed; unpaid rows are not paid
    pub fn abandon(&self, id: DistributionId) -> Result<DividendDistribution, SettlementError> {
        let abandoned = self.store.abandon(id)?;
        warn!(distribution_id = %id, "Dividend distribution abandoned");
        Ok(abandoned)
    }

    async fn pay_row(&self, row: &DividendPayment) -> PayoutOutcome {
        if row.net_amount <= Decimal::ZERO {
            // Fully withheld
            return PayoutOutcome::Paid {
                reference: "NO-PAYOUT".to_string(),
                settled: true,
            };
        }

        let reference = row.payout_reference();
        let call = self.payouts.pay(
            &row.recipient_id,
            row.net_amount,
            &self.settings.currency,
            &reference,
        );
        match tokio::time::timeout(self.settings.payout_timeout, call).await {
            Ok(Ok(receipt)) => {
                debug!(payment_id = %row.id, reference = %receipt.reference, "Dividend paid");
                PayoutOutcome::Paid {
                    reference: receipt.reference,
                    settled: receipt.settled,
                }
            }
            Ok(Err(e)) => {
                warn!(payment_id = %row.id, recipient = %row.recipient_id, error = %e, "Dividend payout failed");
                PayoutOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    payment_id = %row.id,
                    recipient = %row.recipient_id,
                    timeout_ms = self.settings.payout_timeout.as_millis() as u64,
                    "Dividend payout timed out"
                );
                PayoutOutcome::Failed(format!(
                    "{} timed out after {}ms",
                    self.payouts.name(),
                    self.settings.payout_timeout.as_millis()
                ))
            }
        }
    }

    fn record_row(
        &self,
        distribution: &DividendDistribution,
        row: &DividendPayment,
        outcome: &PayoutOutcome,
    ) {
        match self
            .store
            .record_outcome(distribution.id, row.id, outcome, self.clock.now())
        {
            Ok(updated) => self.after_row(distribution, &updated),
            Err(e) => warn!(payment_id = %row.id, error = %e, "Failed to record payout"),
        }
    }

    fn after_row(&self, distribution: &DividendDistribution, row: &DividendPayment) {
        let payload = json!({
            "distribution_id": distribution.id.to_string(),
            "offering_id": distribution.offering_id.to_string(),
            "gross": row.gross_amount.to_string(),
            "tax": row.tax_withheld.to_string(),
            "net": row.net_amount.to_string(),
        });
        if row.status.is_paid() {
            self.holdings
                .record_dividend(&row.recipient_id, distribution.offering_id, row.net_amount);
            self.notifier
                .notify(&row.recipient_id, NotificationKind::DividendPaid, payload);
        } else {
            self.notifier
                .notify(&row.recipient_id, NotificationKind::DividendFailed, payload);
        }
    }

    async fn record_audit(&self, distribution: &DividendDistribution) {
        let message = json!({
            "type": "dividend_distribution",
            "distribution_id": distribution.id.to_string(),
            "offering_id": distribution.offering_id.to_string(),
            "per_token_amount": distribution.per_token_amount.to_string(),
            "total_amount": distribution.total_amount.to_string(),
            "total_tax": distribution.total_tax.to_string(),
            "successful_payments": distribution.successful_payments,
            "failed_payments": distribution.failed_payments,
        });
        if let Err(e) = self
            .ledger_service
            .record_audit_message(&self.settings.audit_topic_id, &message)
            .await
        {
            warn!(distribution_id = %distribution.id, error = %e, "Audit message not recorded");
        }
    }
}

/// Releases a distribution claim when a run is dropped before completing
struct ClaimGuard<'a> {
    store: &'a DistributionStore,
    id: DistributionId,
    resume: DistributionStatus,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.store.release_claim(self.id, self.resume) {
            warn!(
                distribution_id = %self.id,
                status = %self.resume,
                "Dividend run interrupted, claim released"
            );
        }
    }
}
