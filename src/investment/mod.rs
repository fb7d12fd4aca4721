//! Investment State Machine
//!
//! Investment lifecycle from placement through payment confirmation, token
//! delivery and (administrative) refund.
//!
//! # Design
//!
//! - Persist-before-call: every state change is stored before the next
//!   collaborator call, so a crash or failure leaves a resumable record.
//! - Confirmation is serialized per investment and idempotent.
//! - Ledger delivery is best effort; [`TokenDeliveryWorker`] retries it.

pub mod holdings;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;


pub use holdings::{HoldingStore, TokenHolding};
pub use service::{InvestmentService, InvestmentSettings};
pub use state::{InvestmentState, PaymentStatus, RefundStatus, TokenTransferStatus};
pub use store::InvestmentStore;
pub use types::{Investment, PaymentMethod, PlaceInvestment};
pub use worker::{DeliveryScan, DeliveryWorkerConfig, TokenDeliveryWorker};
