//! Reservation Manager
//!
//! Owns the lifecycle of supply holds: creation, confirmation, explicit
//! release and expiry. Every transition out of `Active` is a CAS on the
//! reservation record made *before* the ledger call, so a confirmation
//! racing the expiry sweep has exactly one winner.

pub mod manager;
pub mod types;

pub use manager::ReservationManager;
pub use types::{ReleaseReason, Reservation, ReservationState};
