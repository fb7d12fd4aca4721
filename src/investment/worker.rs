//! Delivery Worker
//!
//! Background worker that retries token transfers and refunds left pending
//! by the request path.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::service::InvestmentService;
use super::state::{RefundStatus, TokenTransferStatus};
use crate::clock::TimeSource;

/// Configuration for the delivery worker
#[derive(Debug, Clone)]
pub struct DeliveryWorkerConfig {
    /// How often to scan for due retries
    pub scan_interval: Duration,
    /// Maximum investments to process per scan
    pub batch_size: usize,
}

impl Default for DeliveryWorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

/// Result of one scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryScan {
    pub delivered: usize,
    pub refunded: usize,
    pub still_pending: usize,
    pub parked: usize,
}

pub struct TokenDeliveryWorker {
    service: Arc<InvestmentService>,
    clock: Arc<dyn TimeSource>,
    config: DeliveryWorkerConfig,
}

impl TokenDeliveryWorker {
    pub fn new(
        service: Arc<InvestmentService>,
        clock: Arc<dyn TimeSource>,
        config: DeliveryWorkerConfig,
    ) -> Self {
        Self {
            service,
            clock,
            config,
        }
    }

    /// Run the delivery worker loop
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting token delivery worker"
        );

        loop {
            let scan = self.scan_and_retry().await;
            if scan.parked > 0 {
                error!(
                    parked = scan.parked,
                    "Deliveries or refunds exhausted their retries and need an operator"
                );
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan cycle
    pub async fn scan_and_retry(&self) -> DeliveryScan {
        let now = self.clock.now();
        let store = self.service.store();
        let mut scan = DeliveryScan::default();

        let due = store.due_for_delivery(now, self.config.batch_size);
        if !due.is_empty() {
            debug!(count = due.len(), "Retrying token deliveries");
        }
        for id in due {
            match self.service.retry_delivery(id).await {
                TokenTransferStatus::Completed => scan.delivered += 1,
                TokenTransferStatus::Failed => scan.parked += 1,
                _ => scan.still_pending += 1,
            }
        }

        for id in store.due_for_refund(now, self.config.batch_size) {
            match self.service.retry_refund(id).await {
                Some(RefundStatus::Completed) => scan.refunded += 1,
                Some(RefundStatus::Failed) => scan.parked += 1,
                _ => scan.still_pending += 1,
            }
        }

        let pruned = store.prune_idle_locks();
        if pruned > 0 {
            debug!(pruned, "Idle investment locks dropped");
        }

        if scan.delivered + scan.refunded > 0 {
            info!(
                delivered = scan.delivered,
                refunded = scan.refunded,
                "Delivery scan completed"
            );
        }
        scan
    }
}
