//! Type-safe price representation using decimal arithmetic.
//!
//! Catalog prices are stored in the currency's standard unit (dollars, not
//! cents). Payment providers expect integer amounts in the minor unit, so the
//! conversion lives here, on exact decimals, instead of in float math at the
//! call site.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors that can occur when converting a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is negative.
    #[error("price cannot be negative: {0}")]
    Negative(Decimal),
    /// The amount does not fit into an `i64` of minor units.
    #[error("price out of range: {0}")]
    Overflow(Decimal),
}

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Amount in the currency's minor unit (e.g., cents), rounded half away
    /// from zero.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Negative` for negative amounts and
    /// `PriceError::Overflow` if the result does not fit into an `i64`.
    pub fn to_minor_units(&self) -> Result<i64, PriceError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(PriceError::Negative(self.amount));
        }

        let scale = Decimal::from(10_i64.pow(self.currency_code.minor_unit_exponent()));
        let minor = self
            .amount
            .checked_mul(scale)
            .ok_or(PriceError::Overflow(self.amount))?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

        i64::try_from(minor).map_err(|_| PriceError::Overflow(self.amount))
    }

    /// Total of `quantity` units in minor units.
    ///
    /// The unit price is rounded first so the total always equals
    /// `unit_amount * quantity` as the payment provider computes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit price is invalid or the total overflows.
    pub fn line_total_minor_units(&self, quantity: u32) -> Result<i64, PriceError> {
        self.to_minor_units()?
            .checked_mul(i64::from(quantity))
            .ok_or(PriceError::Overflow(self.amount))
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Number of decimal places of the minor unit.
    #[must_use]
    pub const fn minor_unit_exponent(self) -> u32 {
        match self {
            Self::USD | Self::EUR | Self::GBP | Self::CAD | Self::AUD => 2,
        }
    }

    /// Upper-case ISO code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        }
    }

    /// Lower-case code, as payment provider APIs expect it.
    #[must_use]
    pub const fn provider_code(self) -> &'static str {
        match self {
            Self::USD => "usd",
            Self::EUR => "eur",
            Self::GBP => "gbp",
            Self::CAD => "cad",
            Self::AUD => "aud",
        }
    }
}

impl FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}
