//! Payment request validation. Pure functions, no I/O.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::money::decimal_places;
use crate::domain::{Address, AddressError, Currency, Money, Network, PaymentMethod};
use crate::error::ValidationError;

pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Payment as submitted by a caller. Currency and network stay textual so that an
/// unsupported value is a validation error rather than a body parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub to_address: String,
    pub network: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Payer-facing reference; only meaningful for M-Pesa
    #[serde(default)]
    pub account_reference: Option<String>,
}

/// A request that passed every rule
#[derive(Debug, Clone)]
pub struct ValidatedPayment {
    pub user_id: Uuid,
    pub amount: Money,
    pub recipient: Address,
    pub method: PaymentMethod,
    pub description: Option<String>,
    pub account_reference: Option<String>,
}

/// Largest amount accepted per payment, in whole units of `currency`
pub fn max_amount(currency: Currency) -> BigDecimal {
    let max: u64 = match currency {
        Currency::Usd => 10_000,
        Currency::Kes => 1_000_000,
        Currency::Btc => 1,
        Currency::Usdt => 10_000,
        Currency::Eth => 100,
        Currency::Trx => 1_000_000,
    };
    BigDecimal::from(max)
}

#[derive(Debug, Clone, Default)]
pub struct PaymentValidator;

impl PaymentValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_amount(
        &self,
        amount: &BigDecimal,
        currency: Currency,
    ) -> Result<Money, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason,
        };

        let zero = BigDecimal::from(0);
        if *amount < zero {
            return Err(invalid("Payment amount cannot be negative".to_string()));
        }
        if *amount == zero {
            return Err(invalid("Payment amount cannot be zero".to_string()));
        }

        let max = max_amount(currency);
        if *amount > max {
            return Err(invalid(format!(
                "Amount exceeds maximum of {} {}",
                max, currency
            )));
        }

        if decimal_places(amount) > currency.precision() {
            return Err(invalid(format!(
                "{} amounts cannot have more than {} decimal places",
                currency,
                currency.precision()
            )));
        }

        Money::new(amount.clone(), currency).map_err(|e| invalid(e.to_string()))
    }

    pub fn validate_description(&self, description: Option<&str>) -> Result<(), ValidationError> {
        match description {
            Some(text) if text.chars().count() > MAX_DESCRIPTION_LEN => {
                Err(ValidationError::InvalidField {
                    field: "description".to_string(),
                    reason: format!(
                        "Description too long (max {} characters)",
                        MAX_DESCRIPTION_LEN
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Currency and network must name one of the supported payment routes
    pub fn validate_route(
        &self,
        currency: &str,
        network: &str,
    ) -> Result<(Currency, Network, PaymentMethod), ValidationError> {
        let parsed_currency =
            Currency::from_str(currency).map_err(|e| ValidationError::InvalidCurrency {
                currency: currency.to_string(),
                reason: e.to_string(),
            })?;
        let parsed_network = Network::from_str(network).map_err(|e| {
            ValidationError::InvalidField {
                field: "network".to_string(),
                reason: e.to_string(),
            }
        })?;

        let method = PaymentMethod::for_route(parsed_currency, parsed_network).ok_or_else(|| {
            ValidationError::InvalidCurrency {
                currency: parsed_currency.to_string(),
                reason: format!(
                    "{} is not supported on the {} network",
                    parsed_currency, parsed_network
                ),
            }
        })?;

        Ok((parsed_currency, parsed_network, method))
    }

    pub fn validate_address(
        &self,
        address: &str,
        network: Network,
    ) -> Result<Address, ValidationError> {
        Address::new(address, network).map_err(|e| {
            let reason = match e {
                AddressError::InvalidPhoneNumber => "Invalid Kenyan phone number".to_string(),
                other => other.to_string(),
            };
            ValidationError::InvalidAddress {
                address: address.to_string(),
                reason,
            }
        })
    }

    pub fn validate(&self, request: &PaymentRequest) -> Result<ValidatedPayment, ValidationError> {
        let (currency, network, method) = self.validate_route(&request.currency, &request.network)?;
        let amount = self.validate_amount(&request.amount, currency)?;
        self.validate_description(request.description.as_deref())?;
        let recipient = self.validate_address(&request.to_address, network)?;

        Ok(ValidatedPayment {
            user_id: request.user_id,
            amount,
            recipient,
            method,
            description: request
                .description
                .as_ref()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            account_reference: request.account_reference.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH_ADDRESS: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn request(amount: &str, currency: &str, network: &str, to: &str) -> PaymentRequest {
        PaymentRequest {
            user_id: Uuid::new_v4(),
            amount: dec(amount),
            currency: currency.to_string(),
            to_address: to.to_string(),
            network: network.to_string(),
            description: None,
            account_reference: None,
        }
    }

    #[test]
    fn test_amount_bounds_per_currency() {
        let validator = PaymentValidator::new();
        for (currency, max) in [
            (Currency::Usd, "10000"),
            (Currency::Kes, "1000000"),
            (Currency::Btc, "1"),
            (Currency::Usdt, "10000"),
            (Currency::Eth, "100"),
            (Currency::Trx, "1000000"),
        ] {
            assert!(validator.validate_amount(&dec(max), currency).is_ok());
            assert!(validator.validate_amount(&dec("0.01"), currency).is_ok());
            assert!(validator.validate_amount(&dec("0"), currency).is_err());
            let over = dec(max) + dec("0.01");
            assert!(validator.validate_amount(&over, currency).is_err());
        }
    }

    #[test]
    fn test_zero_amount_message() {
        let err = PaymentValidator::new()
            .validate_amount(&dec("0"), Currency::Usdt)
            .unwrap_err();
        match err {
            ValidationError::InvalidAmount { reason, .. } => {
                assert_eq!(reason, "Payment amount cannot be zero")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_precision_limits() {
        let validator = PaymentValidator::new();
        assert!(validator.validate_amount(&dec("1.123456"), Currency::Usdt).is_ok());
        assert!(validator.validate_amount(&dec("1.1234567"), Currency::Usdt).is_err());
        assert!(validator.validate_amount(&dec("0.00000001"), Currency::Btc).is_ok());
        assert!(validator.validate_amount(&dec("10.001"), Currency::Kes).is_err());
        // Trailing zeros do not count
        assert!(validator.validate_amount(&dec("10.5000"), Currency::Kes).is_ok());
    }

    #[test]
    fn test_description_length() {
        let validator = PaymentValidator::new();
        assert!(validator.validate_description(Some(&"a".repeat(500))).is_ok());
        assert!(validator.validate_description(Some(&"a".repeat(501))).is_err());
        assert!(validator.validate_description(None).is_ok());
    }

    #[test]
    fn test_routes() {
        let validator = PaymentValidator::new();
        assert_eq!(
            validator.validate_route("usdt", "ethereum").unwrap().2,
            PaymentMethod::UsdtEthereum
        );
        assert_eq!(
            validator.validate_route("KES", "mpesa").unwrap().2,
            PaymentMethod::Mpesa
        );
        assert!(matches!(
            validator.validate_route("BTC", "ethereum"),
            Err(ValidationError::InvalidCurrency { .. })
        ));
        assert!(matches!(
            validator.validate_route("DOGE", "ethereum"),
            Err(ValidationError::InvalidCurrency { .. })
        ));
        assert!(validator.validate_route("USDT", "solana").is_err());
    }

    #[test]
    fn test_full_request() {
        let validator = PaymentValidator::new();
        let ok = validator
            .validate(&request("100.50", "USDT", "ethereum", ETH_ADDRESS))
            .unwrap();
        assert_eq!(ok.method, PaymentMethod::UsdtEthereum);
        assert_eq!(ok.amount.amount(), &dec("100.50"));

        let bad_address = validator.validate(&request("1", "USDT", "ethereum", "0x123"));
        assert!(matches!(
            bad_address,
            Err(ValidationError::InvalidAddress { .. })
        ));

        let mpesa = validator
            .validate(&request("250", "KES", "mpesa", "0712345678"))
            .unwrap();
        assert_eq!(mpesa.recipient.as_str(), "+254712345678");
    }
}
