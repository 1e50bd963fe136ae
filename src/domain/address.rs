//! Recipient addresses and Kenyan phone numbers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Invalid {network} address")]
    InvalidAddress { network: Network },

    #[error("Invalid Kenyan phone number")]
    InvalidPhoneNumber,
}

/// Settlement network a recipient lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Tron,
    Bitcoin,
    Mpesa,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Tron => "tron",
            Network::Bitcoin => "bitcoin",
            Network::Mpesa => "mpesa",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ethereum" | "eth" | "erc20" => Ok(Network::Ethereum),
            "tron" | "trc20" => Ok(Network::Tron),
            "bitcoin" | "btc" => Ok(Network::Bitcoin),
            "mpesa" | "m-pesa" => Ok(Network::Mpesa),
            _ => Err(AddressError::UnsupportedNetwork(value.to_string())),
        }
    }
}

fn ethereum_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("valid ethereum regex"))
}

fn tron_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^T[A-Za-z1-9]{33}$").expect("valid tron regex"))
}

fn bitcoin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]{26,35}$").expect("valid bitcoin regex"))
}

fn kenyan_phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+254[17]\d{8}$").expect("valid phone regex"))
}

/// A validated recipient on a specific network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    value: String,
    network: Network,
}

impl Address {
    pub fn new(value: &str, network: Network) -> Result<Self, AddressError> {
        let value = value.trim();
        let valid = match network {
            Network::Ethereum => ethereum_pattern().is_match(value),
            Network::Tron => tron_pattern().is_match(value),
            Network::Bitcoin => bitcoin_pattern().is_match(value),
            Network::Mpesa => {
                let phone = PhoneNumber::parse(value)?;
                return Ok(Self {
                    value: phone.into_string(),
                    network,
                });
            }
        };

        if !valid {
            return Err(AddressError::InvalidAddress { network });
        }

        Ok(Self {
            value: value.to_string(),
            network,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// `0x1234...abcd` form used in logs.
    pub fn short(&self) -> String {
        shorten(&self.value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

pub fn shorten(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 10 {
        return value.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Kenyan mobile number normalised to `+254XXXXXXXXX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
            .collect();

        let normalized = if let Some(rest) = cleaned.strip_prefix("+254") {
            format!("+254{}", rest)
        } else if let Some(rest) = cleaned.strip_prefix("254") {
            format!("+254{}", rest)
        } else if let Some(rest) = cleaned.strip_prefix('0') {
            format!("+254{}", rest)
        } else {
            return Err(AddressError::InvalidPhoneNumber);
        };

        if !kenyan_phone_pattern().is_match(&normalized) {
            return Err(AddressError::InvalidPhoneNumber);
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits only, as the Daraja API expects (`2547XXXXXXXX`).
    pub fn msisdn(&self) -> &str {
        self.0.trim_start_matches('+')
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    #[test]
    fn validates_ethereum_addresses() {
        assert!(Address::new(ETH, Network::Ethereum).is_ok());
        assert!(Address::new("0x123", Network::Ethereum).is_err());
        assert!(Address::new(&ETH.replace("0x", "1x"), Network::Ethereum).is_err());
    }

    #[test]
    fn validates_tron_addresses() {
        assert!(Address::new("TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE", Network::Tron).is_ok());
        assert!(Address::new("XQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE", Network::Tron).is_err());
    }

    #[test]
    fn validates_bitcoin_address_length() {
        assert!(Address::new("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Bitcoin).is_ok());
        assert!(Address::new("1A1zP1eP5Q", Network::Bitcoin).is_err());
    }

    #[test]
    fn unknown_network_is_rejected() {
        assert_eq!(
            "solana".parse::<Network>().unwrap_err(),
            AddressError::UnsupportedNetwork("solana".to_string())
        );
    }

    #[test]
    fn short_form_keeps_head_and_tail() {
        let address = Address::new(ETH, Network::Ethereum).unwrap();
        assert_eq!(address.short(), "0x742d...f44e");
    }

    #[test]
    fn phone_numbers_are_normalised() {
        for raw in ["0712345678", "254712345678", "+254712345678", "0712 345 678"] {
            assert_eq!(PhoneNumber::parse(raw).unwrap().as_str(), "+254712345678");
        }
        assert_eq!(PhoneNumber::parse("0112345678").unwrap().msisdn(), "254112345678");
        assert!(PhoneNumber::parse("0812345678").is_err());
        assert!(PhoneNumber::parse("712345678").is_err());
    }

    #[test]
    fn mpesa_address_is_a_phone_number() {
        let address = Address::new("0712345678", Network::Mpesa).unwrap();
        assert_eq!(address.as_str(), "+254712345678");
        assert!(Address::new("not-a-phone", Network::Mpesa).is_err());
    }
}
