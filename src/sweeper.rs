//! Expiry Sweeper
//!
//! Periodic pass over lapsed reservations and approval deadlines. Expiry is
//! also applied lazily on access; the sweep bounds how long abandoned holds
//! keep supply out of circulation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalCoordinator, ApprovalSweep};
use crate::clock::TimeSource;
use crate::investment::InvestmentService;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub investments_expired: usize,
    pub approvals: ApprovalSweep,
}

pub struct ExpirySweeper {
    investments: Arc<InvestmentService>,
    approvals: Arc<ApprovalCoordinator>,
    clock: Arc<dyn TimeSource>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        investments: Arc<InvestmentService>,
        approvals: Arc<ApprovalCoordinator>,
        clock: Arc<dyn TimeSource>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            investments,
            approvals,
            clock,
            config,
        }
    }

    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting expiry sweeper"
        );
        loop {
            self.sweep_once().await;
            tokio::time::sleep(self.config.interval).await;
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let investments_expired = self.investments.expire_overdue(now).await;
        let approvals = self.approvals.sweep(now).await;

        let report = SweepReport {
            investments_expired,
            approvals,
        };
        if report.investments_expired > 0 {
            warn!(
                count = report.investments_expired,
                "Investments failed on reservation expiry"
            );
        } else {
            debug!("Expiry sweep found nothing due");
        }
        report
    }
}
