//! Offering record and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{Money, OfferingId, TokenAmount, UserId};

/// Offering lifecycle status
///
/// Transitions are monotonic along
/// `Draft → Upcoming → Active → Closed → Minting → Completed`;
/// `Failed` is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferingStatus {
    Draft,
    Upcoming,
    Active,
    Closed,
    Minting,
    Completed,
    Failed,
}

impl OfferingStatus {
    /// Position on the forward path (Failed sits outside it)
    fn rank(&self) -> u8 {
        match self {
            OfferingStatus::Draft => 0,
            OfferingStatus::Upcoming => 1,
            OfferingStatus::Active => 2,
            OfferingStatus::Closed => 3,
            OfferingStatus::Minting => 4,
            OfferingStatus::Completed => 5,
            OfferingStatus::Failed => u8::MAX,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OfferingStatus::Completed | OfferingStatus::Failed)
    }

    /// Check whether `next` is a legal forward move from `self`
    pub fn can_transition_to(&self, next: OfferingStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == OfferingStatus::Failed || next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OfferingStatus::Draft => "draft",
            OfferingStatus::Upcoming => "upcoming",
            OfferingStatus::Active => "active",
            OfferingStatus::Closed => "closed",
            OfferingStatus::Minting => "minting",
            OfferingStatus::Completed => "completed",
            OfferingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(OfferingStatus::Draft),
            "upcoming" => Some(OfferingStatus::Upcoming),
            "active" => Some(OfferingStatus::Active),
            "closed" => Some(OfferingStatus::Closed),
            "minting" => Some(OfferingStatus::Minting),
            "completed" => Some(OfferingStatus::Completed),
            "failed" => Some(OfferingStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for OfferingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terms an offering is registered with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingTerms {
    pub name: String,
    /// Property owner; always part of the offering's treasury signer set
    pub owner_id: UserId,
    /// Ledger token the offering sells
    pub token_id: String,
    pub total_supply: TokenAmount,
    pub price_per_token: Money,
    pub min_investment: Money,
    #[serde(default)]
    pub max_investment: Option<Money>,
    #[serde(default = "default_min_tokens")]
    pub min_tokens_per_purchase: TokenAmount,
    #[serde(default)]
    pub max_tokens_per_purchase: Option<TokenAmount>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[serde(default = "default_initial_status")]
    pub status: OfferingStatus,
}

fn default_min_tokens() -> TokenAmount {
    1
}

fn default_initial_status() -> OfferingStatus {
    OfferingStatus::Active
}

/// A tokenized investment round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub name: String,
    pub owner_id: UserId,
    pub token_id: String,
    /// Fixed at creation
    pub total_supply: TokenAmount,
    /// Monotonic
    pub tokens_sold: TokenAmount,
    pub tokens_reserved: TokenAmount,
    pub price_per_token: Money,
    pub min_investment: Money,
    pub max_investment: Option<Money>,
    pub min_tokens_per_purchase: TokenAmount,
    pub max_tokens_per_purchase: Option<TokenAmount>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub investor_count: u64,
    pub status: OfferingStatus,
    pub created_at: DateTime<Utc>,
}

impl Offering {
    pub fn from_terms(id: OfferingId, terms: OfferingTerms, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: terms.name,
            owner_id: terms.owner_id,
            token_id: terms.token_id,
            total_supply: terms.total_supply,
            tokens_sold: 0,
            tokens_reserved: 0,
            price_per_token: terms.price_per_token,
            min_investment: terms.min_investment,
            max_investment: terms.max_investment,
            min_tokens_per_purchase: terms.min_tokens_per_purchase,
            max_tokens_per_purchase: terms.max_tokens_per_purchase,
            window_start: terms.window_start,
            window_end: terms.window_end,
            investor_count: 0,
            status: terms.status,
            created_at: now,
        }
    }

    /// Tokens neither sold nor held
    #[inline]
    pub fn available(&self) -> TokenAmount {
        self.total_supply
            .saturating_sub(self.tokens_sold)
            .saturating_sub(self.tokens_reserved)
    }

    /// Accepting new reservations at `now`
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferingStatus::Active && now >= self.window_start && now < self.window_end
    }

    /// Why the offering refuses reservations at `now`, if it does
    pub fn closed_reason(&self, now: DateTime<Utc>) -> Option<String> {
        if self.status != OfferingStatus::Active {
            return Some(format!("offering is {}", self.status));
        }
        if now < self.window_start {
            return Some("investment window has not opened".to_string());
        }
        if now >= self.window_end {
            return Some("investment window has ended".to_string());
        }
        None
    }

    pub fn is_sold_out(&self) -> bool {
        self.tokens_sold >= self.total_supply
    }
}

/// Point-in-time supply view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub offering_id: OfferingId,
    pub total_supply: TokenAmount,
    pub tokens_sold: TokenAmount,
    pub tokens_reserved: TokenAmount,
    pub available: TokenAmount,
    pub price_per_token: Money,
    pub investor_count: u64,
    pub status: OfferingStatus,
}

impl From<&Offering> for Availability {
    fn from(o: &Offering) -> Self {
        Self {
            offering_id: o.id,
            total_supply: o.total_supply,
            tokens_sold: o.tokens_sold,
            tokens_reserved: o.tokens_reserved,
            available: o.available(),
            price_per_token: o.price_per_token,
            investor_count: o.investor_count,
            status: o.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use OfferingStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Minting));
        assert!(Minting.can_transition_to(Completed));
        assert!(Active.can_transition_to(Failed));

        assert!(!Closed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Active));
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for s in ["draft", "upcoming", "active", "closed", "minting", "completed", "failed"] {
            assert_eq!(OfferingStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(OfferingStatus::parse("open").is_none());
    }
}
