//! Dividend Distribution
//!
//! Dividend runs for an offering: holder snapshot, withholding, payout.
//!
//! # Invariants
//!
//! - `Σ net + Σ tax == total_amount` exactly
//! - `successful_payments` and `failed_payments` only increase
//! - a row is never paid twice: the payout reference is fixed per row

pub mod engine;
pub mod store;
pub mod types;


pub use engine::{DistributionEngine, DistributionSettings};
pub use store::DistributionStore;
pub use types::{DistributionStatus, DividendDistribution, DividendPayment, PaymentRowStatus};
