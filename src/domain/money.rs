use crate::error::CommerceError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative monetary amount in the store currency.
///
/// Wraps `rust_decimal::Decimal` so that a negative price can never be
/// constructed, and so that rounding to provider precision happens in one
/// place.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, CommerceError> {
        if value >= Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(CommerceError::validation("Price must be non-negative"))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Converts into a second currency and rounds to two decimal places.
    pub fn convert(&self, rate: Decimal) -> Result<Self, CommerceError> {
        if rate <= Decimal::ZERO {
            return Err(CommerceError::provider("Exchange rate must be positive"));
        }
        Self::new(
            (self.0 * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Amount in the smallest currency unit (cents, kobo) as the providers expect.
    pub fn to_minor_units(&self) -> Result<i64, CommerceError> {
        let scaled = (self.0 * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        i64::try_from(scaled)
            .map_err(|_| CommerceError::validation("Price does not fit provider amount range"))
    }

    pub fn from_minor_units(units: i64) -> Result<Self, CommerceError> {
        Self::new(Decimal::new(units, 2))
    }
}

impl TryFrom<Decimal> for Price {
    type Error = CommerceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// ISO-4217 currency code, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, CommerceError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(CommerceError::validation(format!(
                "Invalid currency code: {}",
                code
            )))
        }
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl TryFrom<String> for Currency {
    type Error = CommerceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
