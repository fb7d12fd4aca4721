//! Estate Settlement - Investment Settlement & Distribution Engine
//!
//! Settlement core for fractional real-estate offerings: sells a fixed token
//! supply against card/bank payments, delivers tokens on the ledger, pays
//! dividends to holders and gates treasury withdrawals and governance
//! proposals behind approvals.
//!
//! # Modules
//!
//! - [`core_types`] - IDs, money and token amount aliases
//! - [`money`] - Decimal/minor-unit conversion, token pricing, withholding
//! - [`ledger`] - Offering registry and supply accounting (memory or Postgres)
//! - [`reservation`] - Time-bounded supply holds
//! - [`investment`] - Investment state machine, holdings, token delivery worker
//! - [`distribution`] - Dividend snapshots and payouts
//! - [`approval`] - Multisig treasury approvals and holder-weighted votes
//! - [`collaborators`] - Payment processor, token ledger, payout rail, notices
//! - [`engine`] - Facade wiring everything together
//! - [`sweeper`] - Periodic expiry of holds, payments and approvals
//! - [`gateway`] - HTTP API and payment webhook

// Core types - must be first!
pub mod core_types;

pub mod clock;
pub mod error;
pub mod money;

// Settlement components
pub mod approval;
pub mod distribution;
pub mod investment;
pub mod ledger;
pub mod reservation;

pub mod collaborators;
pub mod engine;
pub mod sweeper;

// Service plumbing
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use core_types::{
    ApprovalId, DistributionId, InvestmentId, Money, OfferingId, ReservationId, TokenAmount,
    UserId,
};
pub use engine::{Collaborators, SettlementEngine};
pub use error::SettlementError;
