//! In-memory investment records

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::state::{RefundStatus, TokenTransferStatus};
use super::types::Investment;
use crate::core_types::{InvestmentId, OfferingId, UserId};
use crate::error::SettlementError;

/// Investment records indexed by ID and by payment reference, plus one
/// async mutex per investment to serialize confirmation redeliveries,
/// deliveries and refunds. Idle mutexes are pruned by the delivery worker.
#[derive(Default)]
pub struct InvestmentStore {
    records: DashMap<InvestmentId, Investment>,
    by_reference: DashMap<String, InvestmentId>,
    locks: DashMap<InvestmentId, Arc<tokio::sync::Mutex<()>>>,
}

impl InvestmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, investment: Investment) {
        self.by_reference
            .insert(investment.payment_reference.clone(), investment.id);
        self.records.insert(investment.id, investment);
    }

    pub fn get(&self, id: InvestmentId) -> Result<Investment, SettlementError> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| SettlementError::NotFound(format!("investment {}", id)))
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<InvestmentId> {
        self.by_reference.get(reference).map(|id| *id)
    }

    /// Apply `f` under the record's row lock and return the result
    pub fn update(
        &self,
        id: InvestmentId,
        f: impl FnOnce(&mut Investment),
    ) -> Result<Investment, SettlementError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("investment {}", id)))?;
        f(record.value_mut());
        Ok(record.clone())
    }

    /// Per-investment async lock
    pub fn lock(&self, id: InvestmentId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Drop locks nobody holds or waits on. `lock` recreates them on demand,
    /// and a caller always clones under the shard lock before awaiting.
    pub fn prune_idle_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn list_by_investor(&self, investor: &UserId) -> Vec<Investment> {
        let mut list: Vec<Investment> = self
            .records
            .iter()
            .filter(|r| &r.investor_id == investor)
            .map(|r| r.clone())
            .collect();
        list.sort_by_key(|i| i.id);
        list
    }

    pub fn list_by_offering(&self, offering: OfferingId) -> Vec<Investment> {
        let mut list: Vec<Investment> = self
            .records
            .iter()
            .filter(|r| r.offering_id == offering)
            .map(|r| r.clone())
            .collect();
        list.sort_by_key(|i| i.id);
        list
    }

    /// Confirmed investments whose token delivery is due for a retry
    pub fn due_for_delivery(&self, now: DateTime<Utc>, limit: usize) -> Vec<InvestmentId> {
        self.records
            .iter()
            .filter(|r| {
                r.token_transfer_status == TokenTransferStatus::Pending
                    && r.delivery.next_attempt_at.is_none_or(|at| at <= now)
            })
            .map(|r| r.id)
            .take(limit)
            .collect()
    }

    /// Investments with a scheduled refund that is due
    pub fn due_for_refund(&self, now: DateTime<Utc>, limit: usize) -> Vec<InvestmentId> {
        self.records
            .iter()
            .filter(|r| {
                r.refund.as_ref().is_some_and(|refund| {
                    refund.status == RefundStatus::Scheduled
                        && refund.next_attempt_at.is_none_or(|at| at <= now)
                })
            })
            .map(|r| r.id)
            .take(limit)
            .collect()
    }
}
