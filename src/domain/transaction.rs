//! Transaction record and its status state machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::address::Network;
use super::money::Currency;

pub const DEFAULT_REQUIRED_CONFIRMATIONS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Persisted, rail not yet called (or awaiting a manual settlement)
    Pending,
    /// Accepted by the rail, waiting for confirmation
    Processing,
    Confirmed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// Get all valid transitions from this status
    pub fn valid_transitions(&self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Processing,
                TransactionStatus::Confirmed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Processing => {
                &[TransactionStatus::Confirmed, TransactionStatus::Failed]
            }
            // Terminal states - no valid transitions
            TransactionStatus::Confirmed
            | TransactionStatus::Failed
            | TransactionStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Confirmed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "confirmed" => Ok(TransactionStatus::Confirmed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Deposit,
    Withdrawal,
    Settlement,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Settlement => "settlement",
            TransactionType::Refund => "refund",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "payment" => Ok(TransactionType::Payment),
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "settlement" => Ok(TransactionType::Settlement),
            "refund" => Ok(TransactionType::Refund),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Bitcoin,
    UsdtEthereum,
    UsdtTron,
    Mpesa,
}

impl PaymentMethod {
    /// Derive the method from what is being sent and where.
    pub fn for_route(currency: Currency, network: Network) -> Option<Self> {
        match (currency, network) {
            (Currency::Usdt, Network::Ethereum) => Some(PaymentMethod::UsdtEthereum),
            (Currency::Usdt, Network::Tron) => Some(PaymentMethod::UsdtTron),
            (Currency::Btc, Network::Bitcoin) => Some(PaymentMethod::Bitcoin),
            (Currency::Kes, Network::Mpesa) => Some(PaymentMethod::Mpesa),
            _ => None,
        }
    }

    pub fn network(&self) -> Network {
        match self {
            PaymentMethod::Bitcoin => Network::Bitcoin,
            PaymentMethod::UsdtEthereum => Network::Ethereum,
            PaymentMethod::UsdtTron => Network::Tron,
            PaymentMethod::Mpesa => Network::Mpesa,
        }
    }

    pub fn is_crypto(&self) -> bool {
        !matches!(self, PaymentMethod::Mpesa)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bitcoin => "bitcoin",
            PaymentMethod::UsdtEthereum => "usdt_ethereum",
            PaymentMethod::UsdtTron => "usdt_tron",
            PaymentMethod::Mpesa => "mpesa",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "bitcoin" => Ok(PaymentMethod::Bitcoin),
            "usdt_ethereum" => Ok(PaymentMethod::UsdtEthereum),
            "usdt_tron" => Ok(PaymentMethod::UsdtTron),
            "mpesa" => Ok(PaymentMethod::Mpesa),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub amount_crypto: Option<BigDecimal>,
    pub amount_kes: Option<BigDecimal>,
    pub currency: Currency,
    pub to_address: Option<String>,
    pub from_address: Option<String>,
    pub blockchain_hash: Option<String>,
    pub mpesa_checkout_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub network_fee: BigDecimal,
    pub confirmations: i32,
    pub required_confirmations: i32,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Amount in the currency the caller asked for.
    pub fn amount(&self) -> Option<&BigDecimal> {
        self.amount_crypto.as_ref().or(self.amount_kes.as_ref())
    }

    /// Reference assigned by the settlement rail, whichever kind it is.
    pub fn rail_reference(&self) -> Option<&str> {
        self.blockchain_hash
            .as_deref()
            .or(self.mpesa_checkout_request_id.as_deref())
    }
}

/// Fields needed to persist a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    pub amount_crypto: Option<BigDecimal>,
    pub amount_kes: Option<BigDecimal>,
    pub currency: Currency,
    pub to_address: Option<String>,
    pub from_address: Option<String>,
    pub network_fee: BigDecimal,
    pub required_confirmations: i32,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Columns written alongside a status change. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub blockchain_hash: Option<String>,
    pub mpesa_checkout_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub confirmations: Option<i32>,
    pub error_message: Option<String>,
}

impl StatusPatch {
    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}
