//! Network fee estimation.
//!
//! Fees are flat per network and quoted in the network's native currency. The
//! schedule is a placeholder until live gas oracles are wired in; every value can be
//! overridden from the environment.

use bigdecimal::BigDecimal;
use std::str::FromStr;
use tracing::warn;

use crate::domain::{Currency, Money, Network, PaymentMethod};
use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    pub ethereum: BigDecimal,
    pub tron: BigDecimal,
    pub bitcoin: BigDecimal,
    pub mpesa: BigDecimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            ethereum: decimal("0.0005"),
            tron: BigDecimal::from(0),
            bitcoin: decimal("0.00001"),
            mpesa: BigDecimal::from(0),
        }
    }
}

fn decimal(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap_or_else(|_| BigDecimal::from(0))
}

impl FeeSchedule {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str, fallback: BigDecimal| match std::env::var(name) {
            Ok(raw) => match BigDecimal::from_str(raw.trim()) {
                Ok(value) if value >= BigDecimal::from(0) => value,
                _ => {
                    warn!(variable = name, value = %raw, "Ignoring invalid fee override");
                    fallback
                }
            },
            Err(_) => fallback,
        };

        Self {
            ethereum: read("FEE_ETHEREUM", defaults.ethereum),
            tron: read("FEE_TRON", defaults.tron),
            bitcoin: read("FEE_BITCOIN", defaults.bitcoin),
            mpesa: read("FEE_MPESA", defaults.mpesa),
        }
    }

    pub fn fee_for(&self, network: Network) -> &BigDecimal {
        match network {
            Network::Ethereum => &self.ethereum,
            Network::Tron => &self.tron,
            Network::Bitcoin => &self.bitcoin,
            Network::Mpesa => &self.mpesa,
        }
    }
}

/// Currency a network charges its fees in
pub fn fee_currency(network: Network) -> Currency {
    match network {
        Network::Ethereum => Currency::Eth,
        Network::Tron => Currency::Trx,
        Network::Bitcoin => Currency::Btc,
        Network::Mpesa => Currency::Kes,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeeEstimator {
    schedule: FeeSchedule,
}

impl FeeEstimator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Deterministic fee for sending `amount` over `network`
    pub fn estimate(&self, amount: &Money, network: Network) -> Result<Money, ValidationError> {
        if PaymentMethod::for_route(amount.currency(), network).is_none() {
            return Err(ValidationError::InvalidCurrency {
                currency: amount.currency().to_string(),
                reason: format!(
                    "{} is not supported on the {} network",
                    amount.currency(),
                    network
                ),
            });
        }

        Money::new(self.schedule.fee_for(network).clone(), fee_currency(network)).map_err(|e| {
            ValidationError::InvalidAmount {
                amount: self.schedule.fee_for(network).to_string(),
                reason: e.to_string(),
            }
        })
    }
}
