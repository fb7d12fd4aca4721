//! Threshold policies
//!
//! The quorum/threshold primitive shared by multisig treasury approvals and
//! governance votes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Ballot, VoteChoice};
use crate::core_types::TokenAmount;
use crate::error::SettlementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// M-of-N: `required` distinct signer approvals
    Signatures { required: u32 },
    /// Weighted vote, tallied once at the deadline
    Quorum {
        /// Minimum `cast / total_supply`
        quorum_required: Decimal,
        /// Minimum `for / cast`
        approval_threshold: Decimal,
        total_supply: TokenAmount,
    },
}

impl ThresholdPolicy {
    pub fn is_vote(&self) -> bool {
        matches!(self, ThresholdPolicy::Quorum { .. })
    }

    /// Validate against the signer set size
    pub fn validate(&self, signer_count: usize) -> Result<(), SettlementError> {
        match self {
            ThresholdPolicy::Signatures { required } => {
                if *required == 0 {
                    return Err(SettlementError::Validation(
                        "required approvals must be at least 1".into(),
                    ));
                }
                if *required as usize > signer_count {
                    return Err(SettlementError::Validation(format!(
                        "{} approvals required but only {} signers",
                        required, signer_count
                    )));
                }
            }
            ThresholdPolicy::Quorum {
                quorum_required,
                approval_threshold,
                total_supply,
            } => {
                let unit = |v: &Decimal| *v > Decimal::ZERO && *v <= Decimal::ONE;
                if !unit(quorum_required) || !unit(approval_threshold) {
                    return Err(SettlementError::Validation(
                        "quorum and approval threshold must be in (0, 1]".into(),
                    ));
                }
                if *total_supply == 0 {
                    return Err(SettlementError::Validation(
                        "total supply must be positive".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Tally weighted ballots against a `Quorum` policy. Multisig requests
    /// are decided by approvals and have no tally.
    pub fn tally(&self, ballots: &[Ballot]) -> Option<Tally> {
        let ThresholdPolicy::Quorum {
            quorum_required,
            approval_threshold,
            total_supply,
        } = self
        else {
            return None;
        };

        let mut tally = Tally::default();
        for ballot in ballots {
            let w = ballot.weight;
            match ballot.choice {
                VoteChoice::For => tally.votes_for += w,
                VoteChoice::Against => tally.votes_against += w,
                VoteChoice::Abstain => tally.votes_abstain += w,
            }
        }
        tally.total_cast = tally.votes_for + tally.votes_against + tally.votes_abstain;
        tally.turnout = ratio(tally.total_cast, *total_supply);
        tally.approval_rate = ratio(tally.votes_for, tally.total_cast);
        tally.passed = tally.total_cast > 0
            && tally.turnout >= *quorum_required
            && tally.approval_rate >= *approval_threshold;
        Some(tally)
    }
}

fn ratio(num: u64, den: u64) -> Decimal {
    if den == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(num) / Decimal::from(den)
}

/// Final vote count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub votes_for: u64,
    pub votes_against: u64,
    pub votes_abstain: u64,
    pub total_cast: u64,
    pub turnout: Decimal,
    pub approval_rate: Decimal,
    pub passed: bool,
}
