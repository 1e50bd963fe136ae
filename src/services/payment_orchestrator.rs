//! Payment Orchestrator Service
//!
//! Drives a payment from request to settlement: idempotency claim, validation, fee
//! estimation, persistence, the rail call and the resulting status change. Every
//! status change after creation goes through the compare-and-set in
//! [`TransactionStore::transition`].

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::error::CacheError;
use crate::cache::keys::idempotency::RequestKey;
use crate::cache::{IdempotencyStatus, IdempotencyStore};
use crate::chains::{RailError, RailKind, RailRegistry, RailTransfer};
use crate::database::error::DatabaseError;
use crate::database::transaction_repository::TransactionStore;
use crate::domain::{
    NewTransaction, StatusPatch, Transaction, TransactionStatus, TransactionType,
    DEFAULT_REQUIRED_CONFIRMATIONS,
};
use crate::error::{
    AppError, AppErrorKind, DomainError, ExternalError, SecurityError, ValidationError,
};
use crate::services::fee_estimator::FeeEstimator;
use crate::services::validator::{PaymentRequest, PaymentValidator};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on a single rail call
    pub rail_timeout: Duration,
    /// Pending transactions older than this are failed by the monitor
    pub stale_pending_after: Duration,
    /// Processing transactions older than this are failed by the monitor
    pub stale_processing_after: Duration,
    /// Rows examined per status on each expiry pass
    pub expiry_batch_size: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rail_timeout: Duration::from_secs(30),
            stale_pending_after: Duration::from_secs(600),
            stale_processing_after: Duration::from_secs(3600),
            expiry_batch_size: 100,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let secs = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            rail_timeout: Duration::from_secs(secs("PAYMENT_RAIL_TIMEOUT_SECS", 30)),
            stale_pending_after: Duration::from_secs(secs("STALE_PENDING_SECS", 600)),
            stale_processing_after: Duration::from_secs(secs("STALE_PROCESSING_SECS", 3600)),
            expiry_batch_size: secs("EXPIRY_BATCH_SIZE", 100) as i64,
        }
    }
}

// ============================================================================
// Views & outcomes
// ============================================================================

/// What callers see after submitting a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionView {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub blockchain_hash: Option<String>,
    /// Seconds until the transfer is expected to be final
    pub estimated_confirmation_time: u64,
    pub gas_fee: BigDecimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
}

impl TransactionView {
    pub fn from_transaction(tx: &Transaction, estimated_confirmation_time: u64) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
            blockchain_hash: tx.blockchain_hash.clone(),
            estimated_confirmation_time,
            gas_fee: tx.network_fee.clone(),
            checkout_request_id: tx.mpesa_checkout_request_id.clone(),
        }
    }
}

/// Result of a status update request
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Applied(Transaction),
    /// Already in the requested state; nothing was written
    Unchanged(Transaction),
}

impl StatusUpdate {
    pub fn transaction(&self) -> &Transaction {
        match self {
            StatusUpdate::Applied(tx) | StatusUpdate::Unchanged(tx) => tx,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, StatusUpdate::Applied(_))
    }
}

/// Final word from a rail on a transfer it was handed
#[derive(Debug, Clone, PartialEq)]
pub enum RailOutcome {
    Confirmed { receipt_number: Option<String> },
    Failed { reason: String },
}

/// Counts from one expiry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub pending_failed: usize,
    pub processing_failed: usize,
}

impl ExpiryReport {
    pub fn total(&self) -> usize {
        self.pending_failed + self.processing_failed
    }
}

/// Stored under an idempotency key once a request has finished
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdempotencyRecord {
    fingerprint: String,
    #[serde(flatten)]
    outcome: StoredOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum StoredOutcome {
    Completed {
        view: TransactionView,
    },
    Rejected {
        transaction_id: Uuid,
        rail: RailKind,
        error: RailError,
    },
    /// The row exists but the request failed afterwards; replays report the stored row
    Interrupted {
        transaction_id: Uuid,
        rail: RailKind,
    },
}

/// What one execution left behind
struct Execution {
    result: OrchestratorResult<TransactionView>,
    /// Set once the row is written; the rail may have been called from then on
    persisted: Option<(Uuid, RailKind)>,
}

/// Attempts at the pending → processing write after the rail accepted a transfer
const PROCESSING_WRITE_ATTEMPTS: u32 = 3;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0:?}")]
    Validation(ValidationError),

    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Request with idempotency key {idempotency_key} is still in flight")]
    RequestInFlight { idempotency_key: String },

    #[error("Idempotency key {idempotency_key} was used for a different request")]
    IdempotencyKeyReused { idempotency_key: String },

    #[error("No rail configured for {rail}")]
    RailUnavailable { rail: RailKind },

    #[error("Rail {rail} failed for transaction {transaction_id}: {error}")]
    RailFailed {
        transaction_id: Uuid,
        rail: RailKind,
        error: RailError,
    },

    #[error("Transaction {transaction_id} belongs to another user")]
    NotOwner { transaction_id: Uuid },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Idempotency store error: {0}")]
    Idempotency(#[from] CacheError),
}

impl From<ValidationError> for OrchestratorError {
    fn from(err: ValidationError) -> Self {
        OrchestratorError::Validation(err)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::Validation(v) => AppErrorKind::Validation(v),
            OrchestratorError::TransactionNotFound { transaction_id } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound { transaction_id })
            }
            OrchestratorError::InvalidStateTransition { from, to } => {
                AppErrorKind::Domain(DomainError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
            OrchestratorError::RequestInFlight { idempotency_key } => {
                AppErrorKind::Domain(DomainError::DuplicateRequest { idempotency_key })
            }
            OrchestratorError::IdempotencyKeyReused { idempotency_key } => {
                AppErrorKind::Domain(DomainError::IdempotencyKeyReused { idempotency_key })
            }
            OrchestratorError::RailUnavailable { rail } => {
                AppErrorKind::External(ExternalError::RailUnavailable {
                    rail: rail.to_string(),
                })
            }
            OrchestratorError::RailFailed {
                transaction_id,
                rail,
                error,
            } => {
                return AppError::new(rail_error_kind(rail, error))
                    .with_context(format!("transaction_id={}", transaction_id));
            }
            OrchestratorError::NotOwner { .. } => {
                AppErrorKind::Security(SecurityError::Forbidden {
                    reason: "Not allowed to modify this transaction".to_string(),
                })
            }
            OrchestratorError::Storage(db) => return AppError::from(db),
            OrchestratorError::Idempotency(cache) => return AppError::from(cache),
        };
        AppError::new(kind)
    }
}

fn rail_error_kind(rail: RailKind, error: RailError) -> AppErrorKind {
    let retryable = error.is_retryable();
    match error {
        RailError::InvalidDestination { reason } | RailError::Rejected { reason } => {
            AppErrorKind::Domain(DomainError::PaymentRejected { reason })
        }
        RailError::Timeout { seconds } => AppErrorKind::External(ExternalError::Timeout {
            service: rail.to_string(),
            timeout_secs: seconds,
        }),
        RailError::RateLimited => AppErrorKind::External(ExternalError::RateLimit {
            service: rail.to_string(),
            retry_after: None,
        }),
        RailError::Network { message } | RailError::Unavailable { message } => {
            if rail.is_chain() {
                AppErrorKind::External(ExternalError::Blockchain {
                    message,
                    is_retryable: retryable,
                })
            } else {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: rail.to_string(),
                    message,
                    is_retryable: retryable,
                })
            }
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

fn not_found(id: impl ToString) -> OrchestratorError {
    OrchestratorError::TransactionNotFound {
        transaction_id: id.to_string(),
    }
}

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    validator: PaymentValidator,
    fee_estimator: FeeEstimator,
    transactions: Arc<dyn TransactionStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    rails: RailRegistry,
    config: OrchestratorConfig,
}

/// Where a keyed request stands after the claim
enum Claim {
    /// Caller owns the key under this store key
    Owned { store_key: String, fingerprint: String },
    /// A finished request left this view behind
    Replay(TransactionView),
}

impl PaymentOrchestrator {
    pub fn new(
        validator: PaymentValidator,
        fee_estimator: FeeEstimator,
        transactions: Arc<dyn TransactionStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        rails: RailRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            validator,
            fee_estimator,
            transactions,
            idempotency,
            rails,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn rails(&self) -> &RailRegistry {
        &self.rails
    }

    // =========================================================================
    // Payment submission
    // =========================================================================

    /// Submit a payment. With an idempotency key, a retried request returns the
    /// first request's outcome instead of paying twice.
    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        idempotency_key: Option<&str>,
    ) -> OrchestratorResult<TransactionView> {
        let idempotency_key = idempotency_key.map(str::trim).filter(|k| !k.is_empty());

        let (store_key, fingerprint) = match idempotency_key {
            Some(key) => match self.claim(&request, key).await? {
                Claim::Replay(view) => return Ok(view),
                Claim::Owned {
                    store_key,
                    fingerprint,
                } => (Some(store_key), fingerprint),
            },
            None => (None, String::new()),
        };

        let Execution { result, persisted } = self.execute(&request, idempotency_key).await;

        if let Some(store_key) = store_key {
            self.finish_claim(&store_key, fingerprint, &result, persisted)
                .await;
        }

        result
    }

    async fn claim(&self, request: &PaymentRequest, key: &str) -> OrchestratorResult<Claim> {
        let store_key = RequestKey::new(request.user_id, key).to_string();
        let fingerprint = request_fingerprint(request);

        match self.idempotency.begin(&store_key).await? {
            IdempotencyStatus::New => Ok(Claim::Owned {
                store_key,
                fingerprint,
            }),
            IdempotencyStatus::InFlight => {
                info!(idempotency_key = %key, "Rejecting concurrent duplicate request");
                Err(OrchestratorError::RequestInFlight {
                    idempotency_key: key.to_string(),
                })
            }
            IdempotencyStatus::Completed(stored) => {
                let record: IdempotencyRecord =
                    serde_json::from_value(stored).map_err(CacheError::from)?;
                if record.fingerprint != fingerprint {
                    warn!(idempotency_key = %key, "Idempotency key reused with a different body");
                    return Err(OrchestratorError::IdempotencyKeyReused {
                        idempotency_key: key.to_string(),
                    });
                }

                match record.outcome {
                    StoredOutcome::Completed { view } => {
                        info!(
                            idempotency_key = %key,
                            transaction_id = %view.transaction_id,
                            "Replaying stored payment result"
                        );
                        Ok(Claim::Replay(view))
                    }
                    StoredOutcome::Rejected {
                        transaction_id,
                        rail,
                        error,
                    } => Err(OrchestratorError::RailFailed {
                        transaction_id,
                        rail,
                        error,
                    }),
                    StoredOutcome::Interrupted {
                        transaction_id,
                        rail,
                    } => {
                        let tx = self.get_transaction(transaction_id).await?;
                        info!(
                            idempotency_key = %key,
                            transaction_id = %transaction_id,
                            status = %tx.status,
                            "Replaying interrupted payment from storage"
                        );
                        Ok(Claim::Replay(TransactionView::from_transaction(
                            &tx,
                            self.estimated_confirmation_secs(rail),
                        )))
                    }
                }
            }
        }
    }

    fn estimated_confirmation_secs(&self, rail: RailKind) -> u64 {
        self.rails
            .get(rail)
            .map(|r| r.estimated_confirmation_secs())
            .unwrap_or_default()
    }

    /// Store the outcome. The key is freed only when no row was written, since from
    /// then on the rail may already hold the transfer.
    async fn finish_claim(
        &self,
        store_key: &str,
        fingerprint: String,
        result: &OrchestratorResult<TransactionView>,
        persisted: Option<(Uuid, RailKind)>,
    ) {
        let outcome = match result {
            Ok(view) => Some(StoredOutcome::Completed { view: view.clone() }),
            Err(OrchestratorError::RailFailed {
                transaction_id,
                rail,
                error,
            }) => Some(StoredOutcome::Rejected {
                transaction_id: *transaction_id,
                rail: *rail,
                error: error.clone(),
            }),
            Err(e) => match persisted {
                Some((transaction_id, rail)) => {
                    warn!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Payment failed after persisting; idempotency key stays bound to it"
                    );
                    Some(StoredOutcome::Interrupted {
                        transaction_id,
                        rail,
                    })
                }
                None => None,
            },
        };

        let stored = match outcome {
            Some(outcome) => {
                let record = IdempotencyRecord {
                    fingerprint,
                    outcome,
                };
                match serde_json::to_value(&record) {
                    Ok(value) => self.idempotency.set(store_key, value).await,
                    Err(e) => Err(CacheError::from(e)),
                }
            }
            None => self.idempotency.release(store_key).await,
        };

        if let Err(e) = stored {
            error!(key = %store_key, error = %e, "Failed to record idempotency outcome");
        }
    }

    async fn execute(&self, request: &PaymentRequest, idempotency_key: Option<&str>) -> Execution {
        let (tx, rail_kind, transfer) = match self.persist(request, idempotency_key).await {
            Ok(prepared) => prepared,
            Err(e) => {
                return Execution {
                    result: Err(e),
                    persisted: None,
                }
            }
        };

        Execution {
            persisted: Some((tx.id, rail_kind)),
            result: self.submit(&tx, rail_kind, &transfer).await,
        }
    }

    /// Validate, price and write the pending row. Nothing leaves the process here.
    async fn persist(
        &self,
        request: &PaymentRequest,
        idempotency_key: Option<&str>,
    ) -> OrchestratorResult<(Transaction, RailKind, RailTransfer)> {
        let payment = self.validator.validate(request)?;

        let rail_kind = RailKind::for_method(payment.method);
        if self.rails.get(rail_kind).is_none() {
            return Err(OrchestratorError::RailUnavailable { rail: rail_kind });
        }

        let fee = self
            .fee_estimator
            .estimate(&payment.amount, payment.recipient.network())?;

        let amount = payment.amount.amount().clone();
        let tx = self
            .transactions
            .create(NewTransaction {
                user_id: payment.user_id,
                transaction_type: TransactionType::Payment,
                payment_method: payment.method,
                amount_crypto: payment.method.is_crypto().then(|| amount.clone()),
                amount_kes: (!payment.method.is_crypto()).then(|| amount.clone()),
                currency: payment.amount.currency(),
                to_address: Some(payment.recipient.as_str().to_string()),
                from_address: None,
                network_fee: fee.amount().clone(),
                required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
                description: payment.description.clone(),
                idempotency_key: idempotency_key.map(str::to_string),
            })
            .await?;

        info!(
            transaction_id = %tx.id,
            user_id = %tx.user_id,
            rail = %rail_kind,
            amount = %amount,
            currency = %tx.currency,
            to = %payment.recipient.short(),
            "Payment persisted"
        );

        let transfer = RailTransfer {
            transaction_id: tx.id,
            to: payment.recipient.as_str().to_string(),
            amount,
            currency: payment.amount.currency(),
            description: payment.description,
            account_reference: payment.account_reference,
        };

        Ok((tx, rail_kind, transfer))
    }

    /// Hand the transfer to its rail and record the verdict on the stored row
    async fn submit(
        &self,
        tx: &Transaction,
        rail_kind: RailKind,
        transfer: &RailTransfer,
    ) -> OrchestratorResult<TransactionView> {
        let rail = self
            .rails
            .get(rail_kind)
            .ok_or(OrchestratorError::RailUnavailable { rail: rail_kind })?;

        let sent = match tokio::time::timeout(
            self.config.rail_timeout,
            rail.send_transaction(transfer),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RailError::Timeout {
                seconds: self.config.rail_timeout.as_secs(),
            }),
        };

        match sent {
            Ok(receipt) => {
                let patch = if rail_kind.is_chain() {
                    StatusPatch {
                        blockchain_hash: Some(receipt.reference.clone()),
                        ..Default::default()
                    }
                } else {
                    StatusPatch {
                        mpesa_checkout_request_id: Some(receipt.reference.clone()),
                        ..Default::default()
                    }
                };

                let updated = self.mark_processing(tx, &patch).await;

                info!(
                    transaction_id = %tx.id,
                    reference = %receipt.reference,
                    status = %updated.status,
                    "Payment submitted to rail"
                );

                Ok(TransactionView::from_transaction(
                    &updated,
                    rail.estimated_confirmation_secs(),
                ))
            }
            Err(rail_error) => {
                warn!(
                    transaction_id = %tx.id,
                    rail = %rail_kind,
                    error = %rail_error,
                    retryable = rail_error.is_retryable(),
                    "Rail rejected payment"
                );

                let failed = self
                    .transactions
                    .transition(
                        tx.id,
                        TransactionStatus::Pending,
                        TransactionStatus::Failed,
                        &StatusPatch::with_error(rail_error.to_string()),
                    )
                    .await;
                if let Err(e) = failed {
                    // The monitor fails it once it goes stale
                    error!(
                        transaction_id = %tx.id,
                        error = %e,
                        "Could not mark transaction failed"
                    );
                }

                Err(OrchestratorError::RailFailed {
                    transaction_id: tx.id,
                    rail: rail_kind,
                    error: rail_error,
                })
            }
        }
    }

    /// Record that the rail accepted the transfer. The rail cannot be asked to undo it,
    /// so a write that keeps failing still yields a processing view built from the
    /// receipt; the caller must not be told the payment failed.
    async fn mark_processing(&self, tx: &Transaction, patch: &StatusPatch) -> Transaction {
        for attempt in 1..=PROCESSING_WRITE_ATTEMPTS {
            let written = self
                .transactions
                .transition(
                    tx.id,
                    TransactionStatus::Pending,
                    TransactionStatus::Processing,
                    patch,
                )
                .await;

            match written {
                Ok(Some(updated)) => return updated,
                // Something else already moved it on; report what is stored
                Ok(None) => match self.transactions.get(tx.id).await {
                    Ok(Some(current)) => return current,
                    Ok(None) => break,
                    Err(e) => warn!(transaction_id = %tx.id, attempt, error = %e, "Reloading transaction failed"),
                },
                Err(e) => warn!(
                    transaction_id = %tx.id,
                    attempt,
                    error = %e,
                    "Recording processing status failed"
                ),
            }

            if attempt < PROCESSING_WRITE_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
        }

        error!(
            transaction_id = %tx.id,
            blockchain_hash = ?patch.blockchain_hash,
            checkout_request_id = ?patch.mpesa_checkout_request_id,
            "Rail accepted the transfer but its status could not be stored"
        );
        let mut accepted = tx.clone();
        accepted.status = TransactionStatus::Processing;
        accepted.blockchain_hash = patch.blockchain_hash.clone().or(accepted.blockchain_hash);
        accepted.mpesa_checkout_request_id = patch
            .mpesa_checkout_request_id
            .clone()
            .or(accepted.mpesa_checkout_request_id);
        accepted
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_transaction(&self, id: Uuid) -> OrchestratorResult<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn list_user_transactions(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> OrchestratorResult<Vec<Transaction>> {
        let limit = limit.unwrap_or(50);
        if !(1..=100).contains(&limit) {
            return Err(OrchestratorError::Validation(ValidationError::OutOfRange {
                field: "limit".to_string(),
                min: Some("1".to_string()),
                max: Some("100".to_string()),
            }));
        }
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(OrchestratorError::Validation(ValidationError::OutOfRange {
                field: "offset".to_string(),
                min: Some("0".to_string()),
                max: None,
            }));
        }

        Ok(self
            .transactions
            .list_for_user(user_id, limit, offset)
            .await?)
    }

    // =========================================================================
    // Status changes
    // =========================================================================

    /// Move a transaction to `target`. Asking for the state it is already in is a no-op.
    pub async fn update_status(
        &self,
        id: Uuid,
        target: TransactionStatus,
        patch: StatusPatch,
    ) -> OrchestratorResult<StatusUpdate> {
        // A lost compare-and-set means the row moved; re-read and decide again
        for _ in 0..3 {
            let current = self.get_transaction(id).await?;
            if current.status == target {
                return Ok(StatusUpdate::Unchanged(current));
            }
            if !current.status.can_transition_to(target) {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: current.status,
                    to: target,
                });
            }

            if let Some(updated) = self
                .transactions
                .transition(id, current.status, target, &patch)
                .await?
            {
                info!(
                    transaction_id = %id,
                    from_state = %current.status,
                    to_state = %target,
                    "Transaction state transitioned"
                );
                return Ok(StatusUpdate::Applied(updated));
            }
            debug!(transaction_id = %id, "Concurrent status change, retrying");
        }

        let current = self.get_transaction(id).await?;
        Err(OrchestratorError::InvalidStateTransition {
            from: current.status,
            to: target,
        })
    }

    /// Apply the rail's verdict on the transaction holding `reference`. Verdicts for
    /// transactions that already settled are acknowledged without changes.
    pub async fn apply_mpesa_callback(
        &self,
        reference: &str,
        outcome: RailOutcome,
    ) -> OrchestratorResult<StatusUpdate> {
        let tx = self
            .transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| not_found(reference))?;

        if tx.status.is_terminal() {
            info!(
                transaction_id = %tx.id,
                status = %tx.status,
                "Ignoring rail outcome for settled transaction"
            );
            return Ok(StatusUpdate::Unchanged(tx));
        }

        let (target, patch) = match outcome {
            RailOutcome::Confirmed { receipt_number } => (
                TransactionStatus::Confirmed,
                StatusPatch {
                    mpesa_receipt_number: receipt_number,
                    ..Default::default()
                },
            ),
            RailOutcome::Failed { reason } => {
                (TransactionStatus::Failed, StatusPatch::with_error(reason))
            }
        };

        match self.update_status(tx.id, target, patch).await {
            // Lost a race with another terminal update
            Err(OrchestratorError::InvalidStateTransition { .. }) => {
                Ok(StatusUpdate::Unchanged(self.get_transaction(tx.id).await?))
            }
            other => other,
        }
    }

    /// Poll the chain for a processing transaction and confirm it once enough
    /// confirmations are in
    pub async fn refresh_confirmations(&self, id: Uuid) -> OrchestratorResult<Transaction> {
        let tx = self.get_transaction(id).await?;
        if tx.status != TransactionStatus::Processing {
            return Ok(tx);
        }

        let kind = RailKind::for_method(tx.payment_method);
        let reference = match (&tx.blockchain_hash, kind.is_chain()) {
            (Some(hash), true) => hash.clone(),
            _ => return Ok(tx),
        };
        let rail = self
            .rails
            .get(kind)
            .ok_or(OrchestratorError::RailUnavailable { rail: kind })?;

        let polled =
            match tokio::time::timeout(self.config.rail_timeout, rail.get_confirmations(&reference))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RailError::Timeout {
                    seconds: self.config.rail_timeout.as_secs(),
                }),
            };
        let confirmations = polled.map_err(|error| OrchestratorError::RailFailed {
            transaction_id: id,
            rail: kind,
            error,
        })?;
        let confirmations = i32::try_from(confirmations).unwrap_or(i32::MAX);

        if confirmations >= tx.required_confirmations {
            let patch = StatusPatch {
                confirmations: Some(confirmations),
                ..Default::default()
            };
            return match self
                .update_status(id, TransactionStatus::Confirmed, patch)
                .await
            {
                Ok(update) => Ok(update.transaction().clone()),
                Err(OrchestratorError::InvalidStateTransition { .. }) => {
                    self.get_transaction(id).await
                }
                Err(e) => Err(e),
            };
        }

        if confirmations != tx.confirmations {
            if let Some(updated) = self
                .transactions
                .record_confirmations(id, confirmations)
                .await?
            {
                return Ok(updated);
            }
        }
        Ok(tx)
    }

    /// Cancel a pending transaction on behalf of its owner
    pub async fn cancel_transaction(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> OrchestratorResult<Transaction> {
        let tx = self.get_transaction(id).await?;
        if tx.user_id != user_id {
            return Err(OrchestratorError::NotOwner { transaction_id: id });
        }
        if tx.status != TransactionStatus::Pending {
            return Err(OrchestratorError::InvalidStateTransition {
                from: tx.status,
                to: TransactionStatus::Cancelled,
            });
        }

        match self
            .transactions
            .transition(
                id,
                TransactionStatus::Pending,
                TransactionStatus::Cancelled,
                &StatusPatch::default(),
            )
            .await?
        {
            Some(cancelled) => {
                info!(transaction_id = %id, user_id = %user_id, "Transaction cancelled");
                Ok(cancelled)
            }
            None => {
                let current = self.get_transaction(id).await?;
                Err(OrchestratorError::InvalidStateTransition {
                    from: current.status,
                    to: TransactionStatus::Cancelled,
                })
            }
        }
    }

    /// Fail pending and processing transactions that stopped moving
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> OrchestratorResult<ExpiryReport> {
        let mut report = ExpiryReport::default();

        let passes = [
            (
                TransactionStatus::Pending,
                self.config.stale_pending_after,
                "Transaction expired before reaching the rail",
            ),
            (
                TransactionStatus::Processing,
                self.config.stale_processing_after,
                "Transaction was not confirmed in time",
            ),
        ];

        for (status, threshold, reason) in passes {
            let threshold = chrono::Duration::from_std(threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
            let cutoff = now - threshold;
            let stale = self
                .transactions
                .find_stale(status, cutoff, self.config.expiry_batch_size)
                .await?;

            for tx in stale {
                let failed = self
                    .transactions
                    .transition(
                        tx.id,
                        status,
                        TransactionStatus::Failed,
                        &StatusPatch::with_error(reason),
                    )
                    .await?;
                if failed.is_some() {
                    warn!(
                        transaction_id = %tx.id,
                        previous_status = %status,
                        last_update = %tx.updated_at,
                        "Stale transaction failed"
                    );
                    match status {
                        TransactionStatus::Pending => report.pending_failed += 1,
                        _ => report.processing_failed += 1,
                    }
                }
            }
        }

        Ok(report)
    }
}

/// SHA-256 over the normalised request, used to detect key reuse
fn request_fingerprint(request: &PaymentRequest) -> String {
    let mut hasher = Sha256::new();
    for part in [
        request.user_id.to_string(),
        request.amount.normalized().to_string(),
        request.currency.trim().to_uppercase(),
        request.to_address.trim().to_string(),
        request.network.trim().to_lowercase(),
        request.description.clone().unwrap_or_default(),
        request.account_reference.clone().unwrap_or_default(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryIdempotencyStore;
    use crate::chains::{RailReceipt, RailResult, SettlementRail, SimulatedChainRail};
    use crate::database::memory::InMemoryTransactionStore;
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ETH_ADDRESS: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    struct FailingRail {
        error: RailError,
    }

    #[async_trait]
    impl SettlementRail for FailingRail {
        fn kind(&self) -> RailKind {
            RailKind::Ethereum
        }
        async fn send_transaction(&self, _transfer: &RailTransfer) -> RailResult<RailReceipt> {
            Err(self.error.clone())
        }
        async fn get_confirmations(&self, _reference: &str) -> RailResult<u32> {
            Ok(0)
        }
        fn estimated_confirmation_secs(&self) -> u64 {
            60
        }
    }

    struct SlowRail;

    #[async_trait]
    impl SettlementRail for SlowRail {
        fn kind(&self) -> RailKind {
            RailKind::Ethereum
        }
        async fn send_transaction(&self, _transfer: &RailTransfer) -> RailResult<RailReceipt> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RailReceipt {
                reference: "late".to_string(),
                message: None,
            })
        }
        async fn get_confirmations(&self, _reference: &str) -> RailResult<u32> {
            Ok(0)
        }
        fn estimated_confirmation_secs(&self) -> u64 {
            60
        }
    }

    /// Counts sends so tests can assert at-most-once behaviour
    struct CountingRail {
        inner: SimulatedChainRail,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl SettlementRail for CountingRail {
        fn kind(&self) -> RailKind {
            self.inner.kind()
        }
        async fn send_transaction(&self, transfer: &RailTransfer) -> RailResult<RailReceipt> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.inner.send_transaction(transfer).await
        }
        async fn get_confirmations(&self, reference: &str) -> RailResult<u32> {
            self.inner.get_confirmations(reference).await
        }
        fn estimated_confirmation_secs(&self) -> u64 {
            self.inner.estimated_confirmation_secs()
        }
    }

    fn orchestrator_with(
        rails: RailRegistry,
        config: OrchestratorConfig,
    ) -> (PaymentOrchestrator, Arc<InMemoryTransactionStore>) {
        let store = Arc::new(InMemoryTransactionStore::new());
        let orchestrator = PaymentOrchestrator::new(
            PaymentValidator::new(),
            FeeEstimator::default(),
            store.clone(),
            Arc::new(InMemoryIdempotencyStore::default()),
            rails,
            config,
        );
        (orchestrator, store)
    }

    fn orchestrator() -> (PaymentOrchestrator, Arc<InMemoryTransactionStore>) {
        orchestrator_with(
            RailRegistry::new()
                .with_rail(Arc::new(SimulatedChainRail::new(RailKind::Ethereum)))
                .with_rail(Arc::new(SimulatedChainRail::new(RailKind::Tron))),
            OrchestratorConfig::default(),
        )
    }

    fn usdt_request(user_id: Uuid, amount: &str) -> PaymentRequest {
        PaymentRequest {
            user_id,
            amount: BigDecimal::from_str(amount).unwrap(),
            currency: "USDT".to_string(),
            to_address: ETH_ADDRESS.to_string(),
            network: "ethereum".to_string(),
            description: Some("Invoice 42".to_string()),
            account_reference: None,
        }
    }

    #[tokio::test]
    async fn test_payment_moves_to_processing_with_placeholder_fee() {
        let (orchestrator, store) = orchestrator();
        let view = orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "100.50"), None)
            .await
            .unwrap();

        assert_eq!(view.status, TransactionStatus::Processing);
        assert_eq!(view.gas_fee, BigDecimal::from_str("0.0005").unwrap());
        assert!(view.blockchain_hash.as_deref().unwrap().starts_with("0x"));
        assert_eq!(view.estimated_confirmation_time, 300);
        assert!(view.checkout_request_id.is_none());

        let stored = orchestrator.get_transaction(view.transaction_id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
        assert!(stored.processed_at.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_key_is_processed_once() {
        let counting = Arc::new(CountingRail {
            inner: SimulatedChainRail::new(RailKind::Ethereum),
            sends: AtomicUsize::new(0),
        });
        let (orchestrator, store) = orchestrator_with(
            RailRegistry::new().with_rail(counting.clone()),
            OrchestratorConfig::default(),
        );
        let user = Uuid::new_v4();

        let first = orchestrator
            .process_payment(usdt_request(user, "10"), Some("key-1"))
            .await
            .unwrap();
        let second = orchestrator
            .process_payment(usdt_request(user, "10"), Some("key-1"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
        assert_eq!(counting.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reused_key_with_different_body_is_rejected() {
        let (orchestrator, _) = orchestrator();
        let user = Uuid::new_v4();
        orchestrator
            .process_payment(usdt_request(user, "10"), Some("key-2"))
            .await
            .unwrap();

        let err = orchestrator
            .process_payment(usdt_request(user, "11"), Some("key-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::IdempotencyKeyReused { .. }));
        assert_eq!(AppError::from(err).status_code(), 422);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_user() {
        let (orchestrator, store) = orchestrator();
        orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), Some("shared"))
            .await
            .unwrap();
        orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), Some("shared"))
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_validation_failure_persists_nothing_and_frees_key() {
        let (orchestrator, store) = orchestrator();
        let user = Uuid::new_v4();

        let err = orchestrator
            .process_payment(usdt_request(user, "0"), Some("key-3"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(store.is_empty().await);

        // Same key is usable once the request is fixed
        orchestrator
            .process_payment(usdt_request(user, "5"), Some("key-3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_rail_is_unavailable() {
        let (orchestrator, store) = orchestrator();
        let request = PaymentRequest {
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("0.01").unwrap(),
            currency: "BTC".to_string(),
            to_address: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string(),
            network: "bitcoin".to_string(),
            description: None,
            account_reference: None,
        };

        let err = orchestrator.process_payment(request, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RailUnavailable { .. }));
        let app = AppError::from(err);
        assert_eq!(app.status_code(), 503);
        assert!(app.is_retryable());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_rail_rejection_fails_transaction_and_replays() {
        let (orchestrator, _) = orchestrator_with(
            RailRegistry::new().with_rail(Arc::new(FailingRail {
                error: RailError::Rejected {
                    reason: "insufficient funds".to_string(),
                },
            })),
            OrchestratorConfig::default(),
        );
        let user = Uuid::new_v4();

        let err = orchestrator
            .process_payment(usdt_request(user, "10"), Some("key-4"))
            .await
            .unwrap_err();
        let transaction_id = match &err {
            OrchestratorError::RailFailed { transaction_id, .. } => *transaction_id,
            other => panic!("unexpected: {:?}", other),
        };
        let failed = orchestrator.get_transaction(transaction_id).await.unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert!(failed.error_message.unwrap().contains("insufficient funds"));
        assert_eq!(AppError::from(err).status_code(), 400);

        let replay = orchestrator
            .process_payment(usdt_request(user, "10"), Some("key-4"))
            .await
            .unwrap_err();
        assert!(matches!(
            replay,
            OrchestratorError::RailFailed { transaction_id: id, .. } if id == transaction_id
        ));
    }

    #[tokio::test]
    async fn test_rail_timeout_is_retryable_and_fails_transaction() {
        let (orchestrator, store) = orchestrator_with(
            RailRegistry::new().with_rail(Arc::new(SlowRail)),
            OrchestratorConfig {
                rail_timeout: Duration::from_millis(20),
                ..OrchestratorConfig::default()
            },
        );

        let user = Uuid::new_v4();

        let err = orchestrator
            .process_payment(usdt_request(user, "10"), None)
            .await
            .unwrap_err();
        let app = AppError::from(err);
        assert_eq!(app.status_code(), 504);
        assert!(app.is_retryable());

        let stored = store.list_for_user(user, 10, 0).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_update_status_is_idempotent_and_terminal_is_final() {
        let (orchestrator, _) = orchestrator();
        let view = orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), None)
            .await
            .unwrap();
        let id = view.transaction_id;

        let applied = orchestrator
            .update_status(id, TransactionStatus::Confirmed, StatusPatch::default())
            .await
            .unwrap();
        assert!(applied.was_applied());
        assert!(applied.transaction().confirmed_at.is_some());

        let again = orchestrator
            .update_status(id, TransactionStatus::Confirmed, StatusPatch::default())
            .await
            .unwrap();
        assert!(!again.was_applied());

        let err = orchestrator
            .update_status(id, TransactionStatus::Failed, StatusPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
        assert_eq!(AppError::from(err).status_code(), 409);
    }

    #[tokio::test]
    async fn test_refresh_confirmations_confirms_when_threshold_met() {
        let (orchestrator, _) = orchestrator();
        let view = orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), None)
            .await
            .unwrap();

        let refreshed = orchestrator
            .refresh_confirmations(view.transaction_id)
            .await
            .unwrap();
        assert_eq!(refreshed.status, TransactionStatus::Confirmed);
        assert_eq!(refreshed.confirmations, 3);
    }

    #[tokio::test]
    async fn test_refresh_confirmations_records_progress() {
        let (orchestrator, _) = orchestrator_with(
            RailRegistry::new()
                .with_rail(Arc::new(SimulatedChainRail::new(RailKind::Ethereum).with_confirmations(1))),
            OrchestratorConfig::default(),
        );
        let view = orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), None)
            .await
            .unwrap();

        let refreshed = orchestrator
            .refresh_confirmations(view.transaction_id)
            .await
            .unwrap();
        assert_eq!(refreshed.status, TransactionStatus::Processing);
        assert_eq!(refreshed.confirmations, 1);
    }

    #[tokio::test]
    async fn test_cancel_requires_owner_and_pending() {
        let (orchestrator, store) = orchestrator();
        let owner = Uuid::new_v4();
        let pending = store
            .create(NewTransaction {
                user_id: owner,
                transaction_type: TransactionType::Payment,
                payment_method: crate::domain::PaymentMethod::UsdtEthereum,
                amount_crypto: Some(BigDecimal::from(5)),
                amount_kes: None,
                currency: crate::domain::Currency::Usdt,
                to_address: Some(ETH_ADDRESS.to_string()),
                from_address: None,
                network_fee: BigDecimal::from(0),
                required_confirmations: 3,
                description: None,
                idempotency_key: None,
            })
            .await
            .unwrap();

        let err = orchestrator
            .cancel_transaction(pending.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(AppError::from(err).status_code(), 403);

        let cancelled = orchestrator
            .cancel_transaction(pending.id, owner)
            .await
            .unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);

        let err = orchestrator
            .cancel_transaction(pending.id, owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_expire_stale_fails_old_transactions() {
        let (orchestrator, store) = orchestrator();
        let view = orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), None)
            .await
            .unwrap();
        let fresh = orchestrator
            .process_payment(usdt_request(Uuid::new_v4(), "10"), None)
            .await
            .unwrap();

        store
            .backdate(view.transaction_id, Utc::now() - chrono::Duration::hours(2))
            .await;

        let report = orchestrator.expire_stale(Utc::now()).await.unwrap();
        assert_eq!(report.processing_failed, 1);
        assert_eq!(report.pending_failed, 0);

        let expired = orchestrator.get_transaction(view.transaction_id).await.unwrap();
        assert_eq!(expired.status, TransactionStatus::Failed);
        let untouched = orchestrator.get_transaction(fresh.transaction_id).await.unwrap();
        assert_eq!(untouched.status, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn test_list_limits() {
        let (orchestrator, _) = orchestrator();
        let user = Uuid::new_v4();
        for _ in 0..3 {
            orchestrator
                .process_payment(usdt_request(user, "1"), None)
                .await
                .unwrap();
        }

        assert_eq!(
            orchestrator
                .list_user_transactions(user, Some(2), None)
                .await
                .unwrap()
                .len(),
            2
        );
        assert!(orchestrator
            .list_user_transactions(user, Some(0), None)
            .await
            .is_err());
        assert!(orchestrator
            .list_user_transactions(user, Some(101), None)
            .await
            .is_err());
        assert!(orchestrator
            .list_user_transactions(user, None, Some(-1))
            .await
            .is_err());
    }

    #[test]
    fn test_fingerprint_ignores_amount_formatting() {
        let user = Uuid::new_v4();
        let a = usdt_request(user, "10.50");
        let b = usdt_request(user, "10.5");
        let c = usdt_request(user, "10.51");
        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
        assert_ne!(request_fingerprint(&a), request_fingerprint(&c));
    }

    /// Transaction store whose first `fail_transitions` status writes error out
    struct FlakyStore {
        inner: InMemoryTransactionStore,
        fail_transitions: AtomicUsize,
    }

    impl FlakyStore {
        fn failing(times: usize) -> Self {
            Self {
                inner: InMemoryTransactionStore::new(),
                fail_transitions: AtomicUsize::new(times),
            }
        }
    }

    #[async_trait]
    impl TransactionStore for FlakyStore {
        async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
            self.inner.create(new).await
        }
        async fn get(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
            self.inner.get(id).await
        }
        async fn find_by_reference(
            &self,
            reference: &str,
        ) -> Result<Option<Transaction>, DatabaseError> {
            self.inner.find_by_reference(reference).await
        }
        async fn list_for_user(
            &self,
            user_id: Uuid,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Transaction>, DatabaseError> {
            self.inner.list_for_user(user_id, limit, offset).await
        }
        async fn transition(
            &self,
            id: Uuid,
            from: TransactionStatus,
            to: TransactionStatus,
            patch: &StatusPatch,
        ) -> Result<Option<Transaction>, DatabaseError> {
            let remaining = self.fail_transitions.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_transitions.store(remaining - 1, Ordering::SeqCst);
                return Err(DatabaseError::new(
                    crate::database::error::DatabaseErrorKind::ConnectionError {
                        message: "connection reset".to_string(),
                    },
                ));
            }
            self.inner.transition(id, from, to, patch).await
        }
        async fn record_confirmations(
            &self,
            id: Uuid,
            confirmations: i32,
        ) -> Result<Option<Transaction>, DatabaseError> {
            self.inner.record_confirmations(id, confirmations).await
        }
        async fn find_stale(
            &self,
            status: TransactionStatus,
            updated_before: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Transaction>, DatabaseError> {
            self.inner.find_stale(status, updated_before, limit).await
        }
    }

    fn orchestrator_over(
        store: Arc<FlakyStore>,
        rail: Arc<CountingRail>,
    ) -> PaymentOrchestrator {
        PaymentOrchestrator::new(
            PaymentValidator::new(),
            FeeEstimator::default(),
            store,
            Arc::new(InMemoryIdempotencyStore::default()),
            RailRegistry::new().with_rail(rail),
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_status_write_failure_after_send_does_not_resend() {
        let store = Arc::new(FlakyStore::failing(1));
        let counting = Arc::new(CountingRail {
            inner: SimulatedChainRail::new(RailKind::Ethereum),
            sends: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator_over(store.clone(), counting.clone());
        let user = Uuid::new_v4();

        let first = orchestrator
            .process_payment(usdt_request(user, "10"), Some("k"))
            .await
            .unwrap();
        let second = orchestrator
            .process_payment(usdt_request(user, "10"), Some("k"))
            .await
            .unwrap();

        assert_eq!(counting.sends.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.len().await, 1);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(first.status, TransactionStatus::Processing);

        let stored = orchestrator.get_transaction(first.transaction_id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
        assert_eq!(stored.blockchain_hash, first.blockchain_hash);
    }

    #[tokio::test]
    async fn test_unrecorded_send_still_reports_reference_and_keeps_key() {
        let store = Arc::new(FlakyStore::failing(usize::MAX));
        let counting = Arc::new(CountingRail {
            inner: SimulatedChainRail::new(RailKind::Ethereum),
            sends: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator_over(store.clone(), counting.clone());
        let user = Uuid::new_v4();

        let first = orchestrator
            .process_payment(usdt_request(user, "10"), Some("k"))
            .await
            .unwrap();
        assert_eq!(first.status, TransactionStatus::Processing);
        assert!(first.blockchain_hash.is_some());

        let second = orchestrator
            .process_payment(usdt_request(user, "10"), Some("k"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(counting.sends.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.len().await, 1);
    }
}
