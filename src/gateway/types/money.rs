//! Decimal inputs for the API boundary
//!
//! Amounts and ratios arrive as JSON strings so that no float ever touches
//! the money path. Both types share one format check; range rules that
//! depend on the offering (currency precision, minimums) stay in the
//! settlement services.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Most decimal places any API input may carry
pub const MAX_INPUT_SCALE: u32 = 8;

/// Parse a canonical non-negative decimal string.
///
/// Rejects `.5`, `5.`, `+5`, `-5`, `1e3`, empty strings and more than
/// [`MAX_INPUT_SCALE`] fractional digits.
fn parse_strict(s: &str) -> Result<Decimal, String> {
    if s.is_empty() {
        return Err("Amount cannot be empty".into());
    }
    if s.starts_with('.') {
        return Err("Invalid format: use 0.5 not .5".into());
    }
    if s.ends_with('.') {
        return Err("Invalid format: use 5.0 not 5.".into());
    }
    if s.contains(['e', 'E']) {
        return Err("Invalid format: scientific notation not allowed".into());
    }
    if s.starts_with('+') {
        return Err("Invalid format: + prefix not allowed".into());
    }

    let d = Decimal::from_str(s).map_err(|e| format!("Invalid decimal: {}", e))?;
    if d.is_sign_negative() {
        return Err("Amount cannot be negative".into());
    }
    if d.scale() > MAX_INPUT_SCALE {
        return Err(format!(
            "Too many decimal places: {} (max {})",
            d.scale(),
            MAX_INPUT_SCALE
        ));
    }
    Ok(d)
}

/// Format-validated non-negative decimal (investment amounts, prices,
/// per-token dividends, withdrawal amounts)
#[derive(Debug, Clone, Copy)]
pub struct StrictDecimal(Decimal);

impl StrictDecimal {
    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl std::ops::Deref for StrictDecimal {
    type Target = Decimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StrictDecimal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // JSON numbers would bypass the format checks
        let s = String::deserialize(deserializer)?;
        parse_strict(&s)
            .map(StrictDecimal)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for StrictDecimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

/// Fraction in `[0, 1]`: governance quorum and approval threshold
#[derive(Debug, Clone, Copy)]
pub struct StrictRatio(Decimal);

impl StrictRatio {
    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl<'de> Deserialize<'de> for StrictRatio {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let d = parse_strict(&s).map_err(serde::de::Error::custom)?;
        if d > Decimal::ONE {
            return Err(serde::de::Error::custom("Ratio must be between 0 and 1"));
        }
        Ok(StrictRatio(d))
    }
}
