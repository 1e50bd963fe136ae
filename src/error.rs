//! Unified error handling for the payment gateway
//!
//! This module provides a single error type with HTTP status mapping,
//! user-facing messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "DUPLICATE_REQUEST")]
    DuplicateRequest,
    #[serde(rename = "IDEMPOTENCY_KEY_REUSED")]
    IdempotencyKeyReused,
    #[serde(rename = "PAYMENT_REJECTED")]
    PaymentRejected,
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,

    // Security errors (401, 403)
    #[serde(rename = "AUTHENTICATION_REQUIRED")]
    AuthenticationRequired,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "STALE_REQUEST")]
    StaleRequest,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "BLOCKCHAIN_ERROR")]
    BlockchainError,
    #[serde(rename = "RAIL_UNAVAILABLE")]
    RailUnavailable,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Transaction with given ID doesn't exist
    TransactionNotFound { transaction_id: String },
    /// User with given ID doesn't exist
    UserNotFound { user_id: String },
    /// Status change that would move a transaction backwards or out of a terminal state
    InvalidStateTransition { from: String, to: String },
    /// The same idempotency key is still being processed
    DuplicateRequest { idempotency_key: String },
    /// Idempotency key already used for a different request body
    IdempotencyKeyReused { idempotency_key: String },
    /// The rail refused the payment (not retryable)
    PaymentRejected { reason: String },
    /// Wallet balance doesn't cover the amount
    InsufficientBalance { available: String, required: String },
}

/// Authentication, authorization and webhook authenticity failures
#[derive(Debug, Clone)]
pub enum SecurityError {
    /// Missing, malformed or expired credentials
    Unauthenticated { reason: String },
    /// Authenticated but not allowed to perform the operation
    Forbidden { reason: String },
    /// Webhook HMAC does not match the payload
    InvalidSignature,
    /// Webhook timestamp missing or outside the tolerance window
    StaleRequest { reason: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Idempotency store unavailable
    Cache { message: String },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (M-Pesa, blockchain rails)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Mobile-money provider error
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Blockchain rail error
    Blockchain { message: String, is_retryable: bool },
    /// No rail is configured for the payment method
    RailUnavailable { rail: String },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Address not valid for its network
    InvalidAddress { address: String, reason: String },
    /// Unsupported currency or currency/network pair
    InvalidCurrency { currency: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    /// Any other field-level problem
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Security(SecurityError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Security(SecurityError::Unauthenticated {
            reason: reason.into(),
        }))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Security(SecurityError::Forbidden {
            reason: reason.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::UserNotFound { .. } => 404,
                DomainError::InvalidStateTransition { .. } => 409, // Conflict
                DomainError::DuplicateRequest { .. } => 409,
                DomainError::IdempotencyKeyReused { .. } => 422, // Unprocessable Entity
                DomainError::PaymentRejected { .. } => 400,
                DomainError::InsufficientBalance { .. } => 400,
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::Unauthenticated { .. } => 401,
                SecurityError::Forbidden { .. } => 403,
                SecurityError::InvalidSignature => 401,
                SecurityError::StaleRequest { .. } => 401,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::Blockchain { .. } => 502,
                ExternalError::RailUnavailable { .. } => 503,
                ExternalError::RateLimit { .. } => 429, // Too Many Requests
                ExternalError::Timeout { .. } => 504,   // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::DuplicateRequest { .. } => ErrorCode::DuplicateRequest,
                DomainError::IdempotencyKeyReused { .. } => ErrorCode::IdempotencyKeyReused,
                DomainError::PaymentRejected { .. } => ErrorCode::PaymentRejected,
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::Unauthenticated { .. } => ErrorCode::AuthenticationRequired,
                SecurityError::Forbidden { .. } => ErrorCode::Forbidden,
                SecurityError::InvalidSignature => ErrorCode::InvalidSignature,
                SecurityError::StaleRequest { .. } => ErrorCode::StaleRequest,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Blockchain { .. } => ErrorCode::BlockchainError,
                ExternalError::RailUnavailable { .. } => ErrorCode::RailUnavailable,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => "Transaction not found".to_string(),
                DomainError::UserNotFound { .. } => "User not found".to_string(),
                DomainError::InvalidStateTransition { from, to } => {
                    format!("Transaction cannot move from {} to {}", from, to)
                }
                DomainError::DuplicateRequest { .. } => {
                    "A request with this idempotency key is already being processed".to_string()
                }
                DomainError::IdempotencyKeyReused { .. } => {
                    "Idempotency key was already used for a different request".to_string()
                }
                DomainError::PaymentRejected { reason } => format!("Payment failed: {}", reason),
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient balance. Available: {}, Required: {}",
                    available, required
                ),
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::Unauthenticated { .. } => {
                    "Could not validate credentials".to_string()
                }
                SecurityError::Forbidden { reason } => reason.clone(),
                SecurityError::InvalidSignature => "Invalid webhook signature".to_string(),
                SecurityError::StaleRequest { .. } => "Invalid or expired timestamp".to_string(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Blockchain { is_retryable, .. } => {
                    if *is_retryable {
                        "Blockchain network is busy. Please try again in a moment".to_string()
                    } else {
                        "Blockchain operation failed. Please contact support".to_string()
                    }
                }
                ExternalError::RailUnavailable { rail } => {
                    format!("Payments over {} are currently unavailable", rail)
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAddress { address, reason } => {
                    format!("Invalid address '{}': {}", address, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { reason, .. } => reason.clone(),
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::InvalidField { reason, .. } => reason.clone(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::DuplicateRequest { .. }),
            AppErrorKind::Security(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Blockchain { is_retryable, .. } => *is_retryable,
                ExternalError::RailUnavailable { .. } => true,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<CacheError> in cache/error.rs,
// From<PaymentError> in payments/error.rs.

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
