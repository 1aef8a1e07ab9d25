/// Native-currency amounts for the settlement network.
///
/// Amounts are held in base units (wei-scale integers) to keep arithmetic
/// exact once converted. Listing prices arrive as `f64`, so the conversion
/// in [`Amount::from_tokens`] goes through floating point by contract.
use crate::errors::{MarketError, MarketResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of the network's native currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    /// The amount in base units (1 token = 1_000_000_000_000_000_000 base units)
    base_units: u128,
}

impl Amount {
    /// Number of decimal places for the native currency (18, like ETH)
    pub const DECIMALS: u8 = 18;
    /// Base units per whole token (10^18)
    pub const UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;
    /// Maximum token amount accepted from user input
    pub const MAX_TOKENS: u128 = 1_000_000_000; // 1 billion tokens
    /// Maximum amount in base units
    pub const MAX_BASE_UNITS: u128 = Self::MAX_TOKENS * Self::UNITS_PER_TOKEN;

    /// Create amount from base units
    pub fn from_base_units(base_units: u128) -> MarketResult<Self> {
        if base_units > Self::MAX_BASE_UNITS {
            return Err(MarketError::InvalidAmount("Amount too large".to_string()));
        }

        Ok(Amount { base_units })
    }

    /// Create amount from a decimal token value.
    ///
    /// Multiplies in `f64` and truncates, the same arithmetic the listing
    /// model uses for prices. Values that need more than ~15 significant
    /// digits do not survive the trip exactly; fractions below one base
    /// unit are dropped.
    pub fn from_tokens(tokens: f64) -> MarketResult<Self> {
        if !tokens.is_finite() {
            return Err(MarketError::InvalidAmount(
                "Invalid number format".to_string(),
            ));
        }
        if tokens < 0.0 {
            return Err(MarketError::InvalidAmount(
                "Amount cannot be negative".to_string(),
            ));
        }
        if tokens > Self::MAX_TOKENS as f64 {
            return Err(MarketError::InvalidAmount("Amount too large".to_string()));
        }
        // 10^27 is not representable in f64, and the product for the maximum
        // token amount rounds up past the cap. Pin the boundary to its exact
        // value.
        if tokens == Self::MAX_TOKENS as f64 {
            return Ok(Amount {
                base_units: Self::MAX_BASE_UNITS,
            });
        }

        let base_units = (tokens * Self::UNITS_PER_TOKEN as f64) as u128;
        Self::from_base_units(base_units)
    }

    /// Get base units
    pub fn base_units(&self) -> u128 {
        self.base_units
    }

    /// Get amount as tokens (may lose precision)
    pub fn as_tokens(&self) -> f64 {
        self.base_units as f64 / Self::UNITS_PER_TOKEN as f64
    }

    /// Hex quantity form used by provider RPC calls (`0x`-prefixed, no
    /// leading zeros).
    pub fn as_hex(&self) -> String {
        format!("{:#x}", self.base_units)
    }

    /// Get amount as string with full precision
    pub fn as_string(&self) -> String {
        let whole = self.base_units / Self::UNITS_PER_TOKEN;
        let fractional = self.base_units % Self::UNITS_PER_TOKEN;

        if fractional == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:018}", fractional)
                .trim_end_matches('0')
                .to_string();
            format!("{}.{}", whole, frac_str)
        }
    }

    /// Check if amount is zero
    pub fn is_zero(&self) -> bool {
        self.base_units == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}
