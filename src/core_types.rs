//! Core types used throughout the settlement core
//!
//! Identifier newtypes and the scalar aliases every module shares.
//! Entity IDs are ULID-backed: sortable, coordination-free, 128-bit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Token quantity. Offerings issue whole tokens only.
pub type TokenAmount = u64;

/// Money amounts in major currency units (e.g. `60000.00`).
pub type Money = rust_decimal::Decimal;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique ID
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Offering ID - one tokenized investment round for one property
    OfferingId
);
ulid_id!(
    /// Investment ID - one purchase attempt by one investor
    InvestmentId
);
ulid_id!(
    /// Reservation ID - a time-boxed hold on offering supply
    ReservationId
);
ulid_id!(
    /// Dividend distribution ID - one payout event
    DistributionId
);
ulid_id!(
    /// Dividend payment row ID
    PaymentId
);
ulid_id!(
    /// Approval request ID (treasury withdrawals and governance proposals)
    ApprovalId
);

/// User ID as issued by the identity provider (opaque string).
///
/// Signers, investors and dividend recipients are all users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_sortable() {
        let a = InvestmentId::new();
        let b = InvestmentId::new();
        assert_ne!(a, b);
        assert!(b.inner() >= a.inner());
    }

    #[test]
    fn test_id_parse_display() {
        let id = OfferingId::new();
        let parsed: OfferingId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<OfferingId>().is_err());
    }

    #[test]
    fn test_user_id_serde_transparent() {
        let user = UserId::from("owner");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"owner\"");
    }
}
