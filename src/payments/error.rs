use thiserror::Error;

use crate::chains::RailError;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Errors raised while talking to the mobile-money provider
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Provider accepted the call but declined the request (non-zero ResponseCode)
    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Authentication with provider failed: {message}")]
    AuthenticationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::AuthenticationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::PaymentDeclinedError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::AuthenticationError { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }
}

/// Rails only see a narrowed view of provider failures
impl From<PaymentError> for RailError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError { message, .. } => {
                RailError::InvalidDestination { reason: message }
            }
            PaymentError::PaymentDeclinedError { message, .. } => {
                RailError::Rejected { reason: message }
            }
            PaymentError::NetworkError { message } => RailError::Network { message },
            PaymentError::RateLimitError { .. } => RailError::RateLimited,
            PaymentError::AuthenticationError { message } => RailError::Unavailable { message },
            PaymentError::ProviderError {
                message, retryable, ..
            } => {
                if retryable {
                    RailError::Unavailable { message }
                } else {
                    RailError::Rejected { reason: message }
                }
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, DomainError, ExternalError, ValidationError,
        };

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::PaymentDeclinedError { message, .. } => {
                AppErrorKind::Domain(DomainError::PaymentRejected { reason: message })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "mpesa".to_string(),
                retry_after: retry_after_seconds,
            }),
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "mpesa".to_string(),
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
    }

    #[test]
    fn declined_payment_becomes_rejected_rail_error() {
        let err = PaymentError::PaymentDeclinedError {
            message: "Insufficient balance".to_string(),
            provider_code: Some("1".to_string()),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            RailError::from(err.clone()),
            RailError::Rejected {
                reason: "Insufficient balance".to_string()
            }
        );
        assert_eq!(AppError::from(err).status_code(), 400);
    }

    #[test]
    fn provider_outage_is_retryable_bad_gateway() {
        let err = PaymentError::ProviderError {
            provider: "mpesa".to_string(),
            message: "HTTP 503".to_string(),
            provider_code: Some("503".to_string()),
            retryable: true,
        };
        assert!(matches!(RailError::from(err.clone()), RailError::Unavailable { .. }));
        let app = AppError::from(err);
        assert_eq!(app.status_code(), 502);
        assert!(app.is_retryable());
    }
}
