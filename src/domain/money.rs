//! Currency-tagged decimal amounts.

use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Fiat amounts cannot have more than 2 decimal places")]
    TooManyDecimals,

    #[error("Cannot {operation} {left} and {right}")]
    CurrencyMismatch {
        operation: &'static str,
        left: Currency,
        right: Currency,
    },

    #[error("Result cannot be negative")]
    NegativeResult,

    #[error("Multiplication factor cannot be negative")]
    NegativeFactor,

    #[error("Invalid decimal amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Kes,
    Btc,
    Usdt,
    Eth,
    Trx,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Kes => "KES",
            Currency::Btc => "BTC",
            Currency::Usdt => "USDT",
            Currency::Eth => "ETH",
            Currency::Trx => "TRX",
        }
    }

    pub fn is_fiat(&self) -> bool {
        matches!(self, Currency::Usd | Currency::Kes)
    }

    /// Number of decimal places an amount in this currency may carry.
    pub fn precision(&self) -> i64 {
        match self {
            Currency::Usd | Currency::Kes => 2,
            Currency::Usdt | Currency::Trx => 6,
            Currency::Btc => 8,
            Currency::Eth => 18,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "KES" => Ok(Currency::Kes),
            "BTC" => Ok(Currency::Btc),
            "USDT" => Ok(Currency::Usdt),
            "ETH" => Ok(Currency::Eth),
            "TRX" => Ok(Currency::Trx),
            _ => Err(MoneyError::UnsupportedCurrency(value.to_string())),
        }
    }
}

/// Number of digits after the decimal point once trailing zeros are dropped.
pub fn decimal_places(amount: &BigDecimal) -> i64 {
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    scale.max(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: BigDecimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: Currency) -> Result<Self, MoneyError> {
        if amount < BigDecimal::from(0) {
            return Err(MoneyError::NegativeAmount);
        }
        if currency.is_fiat() && decimal_places(&amount) > 2 {
            return Err(MoneyError::TooManyDecimals);
        }
        Ok(Self { amount, currency })
    }

    pub fn parse(amount: &str, currency: Currency) -> Result<Self, MoneyError> {
        let parsed = BigDecimal::from_str(amount.trim())
            .map_err(|_| MoneyError::InvalidAmount(amount.to_string()))?;
        Self::new(parsed, currency)
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: BigDecimal::from(0),
            currency,
        }
    }

    pub fn amount(&self) -> &BigDecimal {
        &self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount == BigDecimal::from(0)
    }

    fn ensure_same_currency(&self, other: &Money, operation: &'static str) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                operation,
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other, "add")?;
        Money::new(&self.amount + &other.amount, self.currency)
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other, "subtract")?;
        let result = &self.amount - &other.amount;
        if result < BigDecimal::from(0) {
            return Err(MoneyError::NegativeResult);
        }
        Money::new(result, self.currency)
    }

    pub fn multiply(&self, factor: &BigDecimal) -> Result<Money, MoneyError> {
        if *factor < BigDecimal::from(0) {
            return Err(MoneyError::NegativeFactor);
        }
        let mut result = &self.amount * factor;
        if self.currency.is_fiat() {
            result = result.with_scale_round(2, RoundingMode::HalfUp);
        }
        Money::new(result, self.currency)
    }

    /// Converts at `rate` (units of `target` per unit of `self`), rounding half-up
    /// to the target currency's precision.
    pub fn convert_to(&self, target: Currency, rate: &BigDecimal) -> Result<Money, MoneyError> {
        if *rate < BigDecimal::from(0) {
            return Err(MoneyError::NegativeFactor);
        }
        let scale = if target.is_fiat() { 2 } else { target.precision() };
        let converted = (&self.amount * rate).with_scale_round(scale, RoundingMode::HalfUp);
        Money::new(converted, target)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let places = if self.currency.is_fiat() { 2 } else { 8 };
        let rounded = self.amount.with_scale_round(places, RoundingMode::HalfUp);
        write!(f, "{} {}", rounded, self.currency)
    }
}
