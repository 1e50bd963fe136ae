//! Placeholder chain rails.
//!
//! They never touch a network: the hash is derived from the transfer itself and the
//! confirmation count is fixed. Real chain clients implement [`SettlementRail`] and
//! are registered in their place.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::traits::{RailKind, RailReceipt, RailResult, RailTransfer, SettlementRail};
use crate::domain::address::shorten;
use crate::domain::DEFAULT_REQUIRED_CONFIRMATIONS;

/// Confirmation time reported to clients for simulated transfers
pub const SIMULATED_CONFIRMATION_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct SimulatedChainRail {
    kind: RailKind,
    confirmations: u32,
}

impl SimulatedChainRail {
    pub fn new(kind: RailKind) -> Self {
        Self {
            kind,
            confirmations: DEFAULT_REQUIRED_CONFIRMATIONS as u32,
        }
    }

    /// Report `confirmations` for every reference
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    fn hash_for(&self, transfer: &RailTransfer) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(transfer.transaction_id.as_bytes());
        hasher.update(transfer.to.as_bytes());
        hasher.update(transfer.amount.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());

        match self.kind {
            RailKind::Ethereum => format!("0x{}", digest),
            _ => digest,
        }
    }
}

#[async_trait]
impl SettlementRail for SimulatedChainRail {
    fn kind(&self) -> RailKind {
        self.kind
    }

    async fn send_transaction(&self, transfer: &RailTransfer) -> RailResult<RailReceipt> {
        let reference = self.hash_for(transfer);
        debug!(
            rail = %self.kind,
            transaction_id = %transfer.transaction_id,
            to = %shorten(&transfer.to),
            amount = %transfer.amount,
            "Simulated chain transfer"
        );
        Ok(RailReceipt {
            reference,
            message: None,
        })
    }

    async fn get_confirmations(&self, _reference: &str) -> RailResult<u32> {
        Ok(self.confirmations)
    }

    fn estimated_confirmation_secs(&self) -> u64 {
        SIMULATED_CONFIRMATION_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn transfer() -> RailTransfer {
        RailTransfer {
            transaction_id: Uuid::new_v4(),
            to: "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string(),
            amount: BigDecimal::from_str("100.50").unwrap(),
            currency: Currency::Usdt,
            description: None,
            account_reference: None,
        }
    }

    #[tokio::test]
    async fn ethereum_hash_is_prefixed_and_deterministic() {
        let rail = SimulatedChainRail::new(RailKind::Ethereum);
        let transfer = transfer();

        let first = rail.send_transaction(&transfer).await.unwrap();
        let second = rail.send_transaction(&transfer).await.unwrap();

        assert_eq!(first, second);
        assert!(first.reference.starts_with("0x"));
        assert_eq!(first.reference.len(), 66);
    }

    #[tokio::test]
    async fn tron_hash_has_no_prefix() {
        let rail = SimulatedChainRail::new(RailKind::Tron);
        let receipt = rail.send_transaction(&transfer()).await.unwrap();
        assert_eq!(receipt.reference.len(), 64);
    }

    #[tokio::test]
    async fn confirmations_are_constant() {
        let rail = SimulatedChainRail::new(RailKind::Bitcoin);
        assert_eq!(rail.get_confirmations("any").await.unwrap(), 3);

        let slow = SimulatedChainRail::new(RailKind::Bitcoin).with_confirmations(1);
        assert_eq!(slow.get_confirmations("any").await.unwrap(), 1);
    }
}
