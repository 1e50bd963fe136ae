//! Services module for payment business logic

pub mod fee_estimator;
pub mod payment_orchestrator;
pub mod validator;
pub mod webhook_processor;

pub use fee_estimator::{FeeEstimator, FeeSchedule};
pub use payment_orchestrator::{
    ExpiryReport, OrchestratorConfig, OrchestratorError, OrchestratorResult, PaymentOrchestrator,
    RailOutcome, StatusUpdate, TransactionView,
};
pub use validator::{PaymentRequest, PaymentValidator, ValidatedPayment};
pub use webhook_processor::{WebhookAck, WebhookKind, WebhookProcessor, WebhookProcessorError};
