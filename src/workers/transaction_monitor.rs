use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chains::RailKind;
use crate::database::transaction_repository::TransactionStore;
use crate::domain::TransactionStatus;
use crate::services::payment_orchestrator::{ExpiryReport, OrchestratorError, PaymentOrchestrator};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures that abort a whole cycle. Per-transaction errors are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::error::DatabaseError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransactionMonitorConfig {
    /// How often the worker wakes up
    pub poll_interval: Duration,
    /// Processing transactions polled per cycle
    pub batch_size: i64,
    /// Confirmation polls in flight at once
    pub concurrency: usize,
}

impl Default for TransactionMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            batch_size: 200,
            concurrency: 8,
        }
    }
}

impl TransactionMonitorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("TX_MONITOR_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("TX_MONITOR_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(cfg.batch_size);
        cfg.concurrency = std::env::var("TX_MONITOR_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(cfg.concurrency);
        cfg
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub expired: ExpiryReport,
    pub polled: usize,
    pub confirmed: usize,
    pub poll_errors: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct TransactionMonitorWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    transactions: Arc<dyn TransactionStore>,
    config: TransactionMonitorConfig,
}

impl TransactionMonitorWorker {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        transactions: Arc<dyn TransactionStore>,
        config: TransactionMonitorConfig,
    ) -> Self {
        Self {
            orchestrator,
            transactions,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "transaction monitor worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("transaction monitor worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) if report.expired.total() > 0 || report.confirmed > 0 => {
                            info!(
                                expired_pending = report.expired.pending_failed,
                                expired_processing = report.expired.processing_failed,
                                polled = report.polled,
                                confirmed = report.confirmed,
                                poll_errors = report.poll_errors,
                                "transaction monitor cycle finished"
                            );
                        }
                        Ok(report) => debug!(polled = report.polled, "transaction monitor cycle idle"),
                        Err(e) => warn!(error = %e, "transaction monitor cycle failed"),
                    }
                }
            }
        }

        info!("transaction monitor worker stopped");
    }

    /// Fail stale transactions, then poll confirmations for processing chain transfers
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, MonitorError> {
        let mut report = CycleReport {
            expired: self.orchestrator.expire_stale(now).await?,
            ..Default::default()
        };

        // Everything last touched before the end of this cycle's tick
        let cutoff = now + chrono::Duration::seconds(1);
        let processing = self
            .transactions
            .find_stale(TransactionStatus::Processing, cutoff, self.config.batch_size)
            .await?;

        let candidates: Vec<_> = processing
            .into_iter()
            .filter(|tx| {
                RailKind::for_method(tx.payment_method).is_chain() && tx.blockchain_hash.is_some()
            })
            .collect();
        report.polled = candidates.len();

        let mut outcomes = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.config.concurrency.max(1)) {
            let polls = batch.iter().map(|tx| {
                let id = tx.id;
                async move { (id, self.orchestrator.refresh_confirmations(id).await) }
            });
            outcomes.extend(join_all(polls).await);
        }

        for (id, outcome) in outcomes {
            match outcome {
                Ok(tx) if tx.status == TransactionStatus::Confirmed => {
                    info!(
                        transaction_id = %id,
                        confirmations = tx.confirmations,
                        "transaction confirmed on chain"
                    );
                    report.confirmed += 1;
                }
                Ok(tx) => debug!(
                    transaction_id = %id,
                    confirmations = tx.confirmations,
                    required = tx.required_confirmations,
                    "awaiting confirmations"
                ),
                Err(e) => {
                    report.poll_errors += 1;
                    warn!(transaction_id = %id, error = %e, "confirmation poll failed");
                }
            }
        }

        Ok(report)
    }
}
