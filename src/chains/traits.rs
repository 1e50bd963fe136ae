use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Currency, PaymentMethod};

/// Settlement rail a payment is executed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RailKind {
    Ethereum,
    Tron,
    Bitcoin,
    Mpesa,
}

impl RailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailKind::Ethereum => "ethereum",
            RailKind::Tron => "tron",
            RailKind::Bitcoin => "bitcoin",
            RailKind::Mpesa => "mpesa",
        }
    }

    pub fn for_method(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::UsdtEthereum => RailKind::Ethereum,
            PaymentMethod::UsdtTron => RailKind::Tron,
            PaymentMethod::Bitcoin => RailKind::Bitcoin,
            PaymentMethod::Mpesa => RailKind::Mpesa,
        }
    }

    /// Chain rails report confirmations; M-Pesa settles through callbacks
    pub fn is_chain(&self) -> bool {
        !matches!(self, RailKind::Mpesa)
    }
}

impl std::fmt::Display for RailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the orchestrator asks a rail to move
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailTransfer {
    pub transaction_id: Uuid,
    /// Destination address or normalised phone number
    pub to: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub description: Option<String>,
    /// Payer-facing reference (M-Pesa AccountReference)
    pub account_reference: Option<String>,
}

/// Rail acknowledgement of a submitted transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailReceipt {
    /// Chain hash, or the CheckoutRequestID for M-Pesa
    pub reference: String,
    /// Human-readable note from the rail, if any
    pub message: Option<String>,
}

pub type RailResult<T> = Result<T, RailError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RailError {
    /// Destination rejected by the rail
    #[error("Invalid destination: {reason}")]
    InvalidDestination { reason: String },

    /// The rail refused the transfer outright
    #[error("Transfer rejected: {reason}")]
    Rejected { reason: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Rail unavailable: {message}")]
    Unavailable { message: String },
}

impl RailError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RailError::Network { .. }
                | RailError::Timeout { .. }
                | RailError::RateLimited
                | RailError::Unavailable { .. }
        )
    }
}

/// Health of one rail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailHealthStatus {
    pub is_healthy: bool,
    pub rail: String,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

/// Common interface of every external settlement rail.
///
/// Implementations own their chain or provider specifics; the orchestrator only
/// sees references and confirmation counts.
#[async_trait]
pub trait SettlementRail: Send + Sync {
    fn kind(&self) -> RailKind;

    /// Submit the transfer; returns the rail-assigned reference
    async fn send_transaction(&self, transfer: &RailTransfer) -> RailResult<RailReceipt>;

    /// Confirmations observed for a previously returned reference
    async fn get_confirmations(&self, reference: &str) -> RailResult<u32>;

    /// Expected time until the transfer is final
    fn estimated_confirmation_secs(&self) -> u64;

    async fn health_check(&self) -> RailResult<()> {
        Ok(())
    }
}

/// Rails available to the orchestrator, keyed by kind
#[derive(Clone, Default)]
pub struct RailRegistry {
    rails: HashMap<RailKind, Arc<dyn SettlementRail>>,
}

impl RailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rail` under its own kind, replacing any previous one
    pub fn with_rail(mut self, rail: Arc<dyn SettlementRail>) -> Self {
        self.rails.insert(rail.kind(), rail);
        self
    }

    pub fn get(&self, kind: RailKind) -> Option<Arc<dyn SettlementRail>> {
        self.rails.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<RailKind> {
        let mut kinds: Vec<RailKind> = self.rails.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Check every rail concurrently
    pub async fn health_check_all(&self) -> HashMap<String, RailHealthStatus> {
        let checks = self.rails.values().cloned().map(|rail| async move {
            let started = std::time::Instant::now();
            let result = rail.health_check().await;
            let status = RailHealthStatus {
                is_healthy: result.is_ok(),
                rail: rail.kind().to_string(),
                response_time_ms: started.elapsed().as_millis() as u64,
                error_message: result.err().map(|e| e.to_string()),
            };
            (rail.kind().to_string(), status)
        });

        futures::future::join_all(checks).await.into_iter().collect()
    }
}
