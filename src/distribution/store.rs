//! In-memory distribution store
//!
//! A distribution and all of its payment rows live in one map entry, so
//! creation is a single atomic insert and every row update adjusts the
//! parent counters under the same entry lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::types::{
    DistributionStatus, DividendDistribution, DividendPayment, PaymentRowStatus, PayoutOutcome,
};
use crate::core_types::{DistributionId, OfferingId, PaymentId};
use crate::error::SettlementError;

#[derive(Debug, Clone)]
struct DistributionEntry {
    distribution: DividendDistribution,
    payments: Vec<DividendPayment>,
}

#[derive(Default)]
pub struct DistributionStore {
    entries: DashMap<DistributionId, DistributionEntry>,
}

impl DistributionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: DistributionId) -> SettlementError {
        SettlementError::NotFound(format!("distribution {}", id))
    }

    /// Insert a distribution together with every payment row
    pub fn insert(&self, distribution: DividendDistribution, payments: Vec<DividendPayment>) {
        self.entries.insert(
            distribution.id,
            DistributionEntry {
                distribution,
                payments,
            },
        );
    }

    pub fn get(&self, id: DistributionId) -> Result<DividendDistribution, SettlementError> {
        self.entries
            .get(&id)
            .map(|e| e.distribution.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    pub fn payments(&self, id: DistributionId) -> Result<Vec<DividendPayment>, SettlementError> {
        self.entries
            .get(&id)
            .map(|e| e.payments.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    pub fn list_by_offering(&self, offering: OfferingId) -> Vec<DividendDistribution> {
        let mut list: Vec<DividendDistribution> = self
            .entries
            .iter()
            .filter(|e| e.distribution.offering_id == offering)
            .map(|e| e.distribution.clone())
            .collect();
        list.sort_by_key(|d| d.id);
        list
    }

    /// Claim a distribution for processing.
    ///
    /// Returns the rows to pay (pending rows on a first run, failed rows on
    /// a retry of a completed distribution) and the status to restore if
    /// the run is interrupted.
    pub fn claim(
        &self,
        id: DistributionId,
    ) -> Result<(Vec<DividendPayment>, DistributionStatus), SettlementError> {
        let mut entry = self.entries.get_mut(&id).ok_or_else(|| Self::not_found(id))?;

        let resume = entry.distribution.status;
        let target = match resume {
            DistributionStatus::Pending => PaymentRowStatus::Pending,
            DistributionStatus::Completed => PaymentRowStatus::Failed,
            DistributionStatus::Processing => return Err(SettlementError::DistributionBusy),
            DistributionStatus::Failed => {
                return Err(SettlementError::InvalidStateTransition(
                    "distribution was abandoned".into(),
                ));
            }
        };

        let rows: Vec<DividendPayment> = entry
            .payments
            .iter()
            .filter(|p| p.status == target)
            .cloned()
            .collect();
        entry.distribution.status = DistributionStatus::Processing;
        Ok((rows, resume))
    }

    /// Undo a claim whose run ended before `complete`.
    ///
    /// Rows already recorded keep their outcome; the rest are picked up by
    /// the next run.
    pub fn release_claim(&self, id: DistributionId, resume: DistributionStatus) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut entry) if entry.distribution.status == DistributionStatus::Processing => {
                entry.distribution.status = resume;
                true
            }
            _ => false,
        }
    }

    /// Record one payout attempt; counters only ever increase
    pub(crate) fn record_outcome(
        &self,
        id: DistributionId,
        payment_id: PaymentId,
        outcome: &PayoutOutcome,
        now: DateTime<Utc>,
    ) -> Result<DividendPayment, SettlementError> {
        let mut entry = self.entries.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        let entry = &mut *entry;

        let row = entry
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| SettlementError::NotFound(format!("dividend payment {}", payment_id)))?;

        row.attempts += 1;
        match outcome {
            PayoutOutcome::Paid { reference, settled } => {
                row.status = if *settled {
                    PaymentRowStatus::Received
                } else {
                    PaymentRowStatus::Sent
                };
                row.transaction_reference = Some(reference.clone());
                row.last_error = None;
                row.paid_at = Some(now);
                entry.distribution.successful_payments += 1;
            }
            PayoutOutcome::Failed(reason) => {
                row.status = PaymentRowStatus::Failed;
                row.last_error = Some(reason.clone());
                entry.distribution.failed_payments += 1;
            }
        }
        Ok(row.clone())
    }

    /// Finish a processing run
    pub fn complete(
        &self,
        id: DistributionId,
        now: DateTime<Utc>,
    ) -> Result<DividendDistribution, SettlementError> {
        let mut entry = self.entries.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        entry.distribution.status = DistributionStatus::Completed;
        entry.distribution.completed_at = Some(now);
        Ok(entry.distribution.clone())
    }

    /// Operator gives up on a distribution: outstanding rows fail
    pub fn abandon(&self, id: DistributionId) -> Result<DividendDistribution, SettlementError> {
        let mut entry = self.entries.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        let entry = &mut *entry;

        match entry.distribution.status {
            DistributionStatus::Processing => return Err(SettlementError::DistributionBusy),
            DistributionStatus::Failed => return Ok(entry.distribution.clone()),
            DistributionStatus::Pending | DistributionStatus::Completed => {}
        }

        for row in entry
            .payments
            .iter_mut()
            .filter(|p| p.status == PaymentRowStatus::Pending)
        {
            row.status = PaymentRowStatus::Failed;
            row.last_error = Some("distribution abandoned".into());
        }
        entry.distribution.status = DistributionStatus::Failed;
        Ok(entry.distribution.clone())
    }
}
