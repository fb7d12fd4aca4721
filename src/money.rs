//! Money Conversion Module
//!
//! All arithmetic that turns money into tokens, tokens into money, or money
//! into processor minor units goes through this module.
//!
//! ## Design Principles
//! 1. Decimal only: no floating point anywhere on the money path
//! 2. Explicit Error Handling: no silent truncation when converting to minor units
//! 3. Token quantities are floored, never rounded up
//!
//! ## Usage
//! ```rust
//! use estate_settlement::money::{tokens_for_amount, to_minor_units};
//! use rust_decimal::Decimal;
//!
//! // 60000 at 100 per token buys 600 tokens
//! let tokens = tokens_for_amount(Decimal::from(60_000), Decimal::from(100)).unwrap();
//! assert_eq!(tokens, 600);
//!
//! // Processors take integer minor units
//! assert_eq!(to_minor_units(Decimal::new(150_050, 2), 2).unwrap(), 150_050);
//! ```

use rust_decimal::RoundingStrategy;
use rust_decimal::prelude::*;
use thiserror::Error;

use crate::core_types::{Money, TokenAmount};

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Price must be positive")]
    InvalidPrice,

    #[error("Amount too large, would overflow")]
    Overflow,
}

// ============================================================================
// Tokens ↔ Money
// ============================================================================

/// Number of whole tokens an amount buys: `floor(amount / price)`
pub fn tokens_for_amount(amount: Money, price: Money) -> Result<TokenAmount, MoneyError> {
    if amount <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }
    if price <= Decimal::ZERO {
        return Err(MoneyError::InvalidPrice);
    }

    let tokens = amount.checked_div(price).ok_or(MoneyError::Overflow)?.floor();
    tokens.to_u64().ok_or(MoneyError::Overflow)
}

/// Cost of `tokens` at `price`
pub fn cost_of(tokens: TokenAmount, price: Money) -> Result<Money, MoneyError> {
    Decimal::from(tokens)
        .checked_mul(price)
        .ok_or(MoneyError::Overflow)
}

// ============================================================================
// Major ↔ Minor units (payment processor boundary)
// ============================================================================

/// Convert a major-unit amount to processor minor units (e.g. 150.50 → 15050)
///
/// Rejects amounts with more fractional digits than the currency supports.
pub fn to_minor_units(amount: Money, decimals: u32) -> Result<u64, MoneyError> {
    if amount.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = amount.normalize();
    if normalized.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: decimals,
        });
    }

    let multiplier = Decimal::from(10u64.pow(decimals));
    amount
        .checked_mul(multiplier)
        .ok_or(MoneyError::Overflow)?
        .to_u64()
        .ok_or(MoneyError::Overflow)
}

/// Convert processor minor units back to a major-unit amount
pub fn from_minor_units(minor: u64, decimals: u32) -> Money {
    Decimal::from(minor) / Decimal::from(10u64.pow(decimals))
}

// ============================================================================
// Withholding
// ============================================================================

/// Gross/tax/net breakdown of one dividend payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithholdingSplit {
    pub gross: Money,
    pub tax: Money,
    pub net: Money,
}

/// Split a gross amount into withheld tax and net payment.
///
/// Tax is rounded half-away-from-zero to the currency's minor unit and the
/// net is derived by subtraction, so `net + tax == gross` always holds.
pub fn split_withholding(
    gross: Money,
    rate: Decimal,
    currency_decimals: u32,
) -> Result<WithholdingSplit, MoneyError> {
    if gross.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }
    if rate.is_sign_negative() || rate > Decimal::ONE {
        return Err(MoneyError::InvalidAmount);
    }

    let tax = gross
        .checked_mul(rate)
        .ok_or(MoneyError::Overflow)?
        .round_dp_with_strategy(currency_decimals, RoundingStrategy::MidpointAwayFromZero);
    let net = gross - tax;

    Ok(WithholdingSplit { gross, tax, net })
}

/// Weighted average purchase price of a holding (zero for an empty holding)
pub fn weighted_average_price(total_invested: Money, balance: TokenAmount) -> Money {
    if balance == 0 {
        return Decimal::ZERO;
    }
    total_invested / Decimal::from(balance)
}

/// Format a money amount with a fixed number of decimals
pub fn format_money(value: Money, decimals: u32) -> String {
    format!("{:.prec$}", value, prec = decimals as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_for_amount_floors() {
        assert_eq!(
            tokens_for_amount(Decimal::from(60_000), Decimal::from(100)).unwrap(),
            600
        );
        assert_eq!(
            tokens_for_amount(Decimal::from(1_099), Decimal::from(100)).unwrap(),
            10
        );
        assert_eq!(
            tokens_for_amount(Decimal::from(99), Decimal::from(100)).unwrap(),
            0
        );
    }

    #[test]
    fn test_tokens_for_amount_rejects_non_positive() {
        assert_eq!(
            tokens_for_amount(Decimal::ZERO, Decimal::from(100)),
            Err(MoneyError::InvalidAmount)
        );
        assert_eq!(
            tokens_for_amount(Decimal::from(100), Decimal::ZERO),
            Err(MoneyError::InvalidPrice)
        );
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(Decimal::from(60_000), 2).unwrap(), 6_000_000);
        assert_eq!(to_minor_units(Decimal::new(1005, 1), 2).unwrap(), 10_050);
        assert_eq!(
            to_minor_units(Decimal::new(1001, 3), 2),
            Err(MoneyError::PrecisionOverflow {
                provided: 3,
                max: 2
            })
        );
        assert_eq!(from_minor_units(10_050, 2), Decimal::new(1005, 1));
    }

    #[test]
    fn test_trailing_zeros_are_not_precision() {
        // 100.500 normalizes to 100.5
        assert_eq!(to_minor_units(Decimal::new(100_500, 3), 2).unwrap(), 10_050);
    }

    #[test]
    fn test_withholding_ten_percent() {
        let split = split_withholding(Decimal::from(10_000), Decimal::new(10, 2), 2).unwrap();
        assert_eq!(split.gross, Decimal::from(10_000));
        assert_eq!(split.tax, Decimal::from(1_000));
        assert_eq!(split.net, Decimal::from(9_000));
    }

    #[test]
    fn test_withholding_rounding_preserves_total() {
        // 0.05 * 0.10 = 0.005 -> rounds to 0.01
        let split = split_withholding(Decimal::new(5, 2), Decimal::new(10, 2), 2).unwrap();
        assert_eq!(split.tax, Decimal::new(1, 2));
        assert_eq!(split.net + split.tax, split.gross);
    }

    #[test]
    fn test_weighted_average_price() {
        // 600 @ 100 then 400 @ 110 => 104
        let invested = Decimal::from(60_000) + Decimal::from(44_000);
        assert_eq!(weighted_average_price(invested, 1_000), Decimal::from(104));
        assert_eq!(weighted_average_price(Decimal::ZERO, 0), Decimal::ZERO);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(Decimal::new(9_000, 0), 2), "9000.00");
    }
}
