//! Inbound M-Pesa webhooks.
//!
//! Each delivery goes received → validated → processed, or stops at rejected. The
//! signature and timestamp are checked against the raw body before anything is parsed.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SecurityConfig;
use crate::error::{AppError, AppErrorKind, SecurityError, ValidationError};
use crate::payments::providers::mpesa::{process_callback, ResultEnvelope, StkCallbackEnvelope};
use crate::payments::utils::verify_hmac_sha256_hex;
use crate::services::payment_orchestrator::{
    OrchestratorError, PaymentOrchestrator, RailOutcome, StatusUpdate,
};
use crate::utils::sanitize::{mask_sensitive, sanitize_payload};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

const TIMEOUT_REASON: &str = "M-Pesa request timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Callback,
    Timeout,
    Result,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Callback => "callback",
            WebhookKind::Timeout => "timeout",
            WebhookKind::Result => "result",
        }
    }

    fn ack_message(&self) -> &'static str {
        match self {
            WebhookKind::Callback => "Callback received successfully",
            WebhookKind::Timeout => "Timeout received successfully",
            WebhookKind::Result => "Result received successfully",
        }
    }
}

/// Body Daraja expects back from a webhook endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl WebhookAck {
    fn accepted(kind: WebhookKind) -> Self {
        Self {
            result_code: 0,
            result_desc: kind.ack_message().to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Missing signature header")]
    MissingSignature,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Missing timestamp header")]
    MissingTimestamp,
    #[error("Unparseable timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Timestamp outside tolerance by {skew_secs}s")]
    StaleTimestamp { skew_secs: i64 },
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Unsafe payload: {0}")]
    UnsafePayload(String),
    #[error("Processing error: {0}")]
    Processing(#[from] OrchestratorError),
}

impl WebhookProcessorError {
    /// Authenticity failures, as opposed to bad content
    pub fn is_security_rejection(&self) -> bool {
        matches!(
            self,
            WebhookProcessorError::MissingSignature
                | WebhookProcessorError::InvalidSignature
                | WebhookProcessorError::MissingTimestamp
                | WebhookProcessorError::InvalidTimestamp(_)
                | WebhookProcessorError::StaleTimestamp { .. }
        )
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        let kind = match err {
            WebhookProcessorError::MissingSignature | WebhookProcessorError::InvalidSignature => {
                AppErrorKind::Security(SecurityError::InvalidSignature)
            }
            WebhookProcessorError::MissingTimestamp => {
                AppErrorKind::Security(SecurityError::StaleRequest {
                    reason: "missing timestamp".to_string(),
                })
            }
            WebhookProcessorError::InvalidTimestamp(raw) => {
                AppErrorKind::Security(SecurityError::StaleRequest {
                    reason: format!("unparseable timestamp {}", raw),
                })
            }
            WebhookProcessorError::StaleTimestamp { skew_secs } => {
                AppErrorKind::Security(SecurityError::StaleRequest {
                    reason: format!("skew of {}s", skew_secs),
                })
            }
            WebhookProcessorError::MalformedPayload(reason)
            | WebhookProcessorError::UnsafePayload(reason) => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason,
                })
            }
            WebhookProcessorError::Processing(inner) => return AppError::from(inner),
        };
        AppError::new(kind)
    }
}

/// Accepts RFC 3339, zone-less ISO-8601 (read as UTC) or unix seconds
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct WebhookProcessor {
    orchestrator: Arc<PaymentOrchestrator>,
    secret: String,
    tolerance_secs: i64,
}

impl WebhookProcessor {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, security: &SecurityConfig) -> Self {
        Self {
            orchestrator,
            secret: security.webhook_secret.clone(),
            tolerance_secs: security.webhook_tolerance_secs,
        }
    }

    pub fn verify_signature(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), WebhookProcessorError> {
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(WebhookProcessorError::MissingSignature)?;
        if verify_hmac_sha256_hex(body, &self.secret, signature) {
            Ok(())
        } else {
            Err(WebhookProcessorError::InvalidSignature)
        }
    }

    pub fn verify_timestamp(
        &self,
        timestamp: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookProcessorError> {
        let raw = timestamp
            .filter(|t| !t.trim().is_empty())
            .ok_or(WebhookProcessorError::MissingTimestamp)?;
        let sent_at = parse_timestamp(raw)
            .ok_or_else(|| WebhookProcessorError::InvalidTimestamp(raw.to_string()))?;

        let skew_secs = (now - sent_at).num_seconds().abs();
        if skew_secs > self.tolerance_secs {
            return Err(WebhookProcessorError::StaleTimestamp { skew_secs });
        }
        Ok(())
    }

    /// Validate and apply one delivery. Rejections are logged on the `security` target.
    pub async fn process(
        &self,
        kind: WebhookKind,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<WebhookAck, WebhookProcessorError> {
        let result = self.validate_and_apply(kind, signature, timestamp, body, now).await;

        if let Err(e) = &result {
            if e.is_security_rejection() {
                warn!(
                    target: "security",
                    webhook = kind.as_str(),
                    reason = %e,
                    "Webhook rejected"
                );
            } else if matches!(
                e,
                WebhookProcessorError::MalformedPayload(_) | WebhookProcessorError::UnsafePayload(_)
            ) {
                warn!(
                    target: "security",
                    webhook = kind.as_str(),
                    reason = %e,
                    "Webhook payload rejected"
                );
            }
        }
        result
    }

    async fn validate_and_apply(
        &self,
        kind: WebhookKind,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<WebhookAck, WebhookProcessorError> {
        self.verify_signature(body, signature)?;
        self.verify_timestamp(timestamp, now)?;

        let raw: JsonValue = serde_json::from_slice(body)
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;
        let payload = sanitize_payload(&raw)
            .map_err(|e| WebhookProcessorError::UnsafePayload(e.to_string()))?;
        debug!(webhook = kind.as_str(), payload = %mask_sensitive(&payload), "Webhook validated");

        let update = match kind {
            WebhookKind::Callback => self.apply_callback(&payload).await?,
            WebhookKind::Timeout => self.apply_timeout(&payload).await?,
            WebhookKind::Result => match self.apply_result(&payload).await? {
                Some(update) => update,
                None => return Ok(WebhookAck::accepted(kind)),
            },
        };

        let tx = update.transaction();
        info!(
            webhook = kind.as_str(),
            transaction_id = %tx.id,
            status = %tx.status,
            applied = update.was_applied(),
            "Webhook processed"
        );
        Ok(WebhookAck::accepted(kind))
    }

    async fn apply_callback(&self, payload: &JsonValue) -> Result<StatusUpdate, WebhookProcessorError> {
        let envelope: StkCallbackEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;
        let callback = envelope.body.stk_callback;

        let outcome = if process_callback(payload) {
            RailOutcome::Confirmed {
                receipt_number: callback.receipt_number(),
            }
        } else {
            RailOutcome::Failed {
                reason: if callback.result_desc.is_empty() {
                    format!("M-Pesa result code {}", callback.result_code)
                } else {
                    callback.result_desc.clone()
                },
            }
        };

        Ok(self
            .orchestrator
            .apply_mpesa_callback(&callback.checkout_request_id, outcome)
            .await?)
    }

    async fn apply_timeout(&self, payload: &JsonValue) -> Result<StatusUpdate, WebhookProcessorError> {
        let references = timeout_references(payload);
        if references.is_empty() {
            return Err(WebhookProcessorError::MalformedPayload(
                "no request reference in timeout notification".to_string(),
            ));
        }

        self.apply_first_match(
            &references,
            RailOutcome::Failed {
                reason: TIMEOUT_REASON.to_string(),
            },
        )
        .await
    }

    /// Result notifications name the request by conversation id. Payments here are
    /// only ever recorded under their checkout id or chain hash, so a result is applied
    /// when one of its ids equals such a reference and acknowledged without effect
    /// otherwise.
    async fn apply_result(
        &self,
        payload: &JsonValue,
    ) -> Result<Option<StatusUpdate>, WebhookProcessorError> {
        let envelope: ResultEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;
        let result = envelope.result;

        let references: Vec<String> = result.references().into_iter().map(str::to_string).collect();
        if references.is_empty() {
            return Err(WebhookProcessorError::MalformedPayload(
                "no conversation id in result".to_string(),
            ));
        }

        let outcome = if result.result_code == 0 {
            RailOutcome::Confirmed {
                receipt_number: result.transaction_id.clone(),
            }
        } else {
            RailOutcome::Failed {
                reason: result.result_desc.clone(),
            }
        };

        match self.apply_first_match(&references, outcome).await {
            Ok(update) => Ok(Some(update)),
            Err(WebhookProcessorError::Processing(OrchestratorError::TransactionNotFound {
                ..
            })) => {
                warn!(
                    references = ?references,
                    result_code = result.result_code,
                    "Result notification matches no stored payment; acknowledged only"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Try each reference in turn; the first that names a stored transaction wins
    async fn apply_first_match(
        &self,
        references: &[String],
        outcome: RailOutcome,
    ) -> Result<StatusUpdate, WebhookProcessorError> {
        let mut last_error = None;
        for reference in references {
            match self
                .orchestrator
                .apply_mpesa_callback(reference, outcome.clone())
                .await
            {
                Ok(update) => return Ok(update),
                Err(e @ OrchestratorError::TransactionNotFound { .. }) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error
            .map(WebhookProcessorError::from)
            .unwrap_or_else(|| {
                WebhookProcessorError::MalformedPayload("no request reference".to_string())
            }))
    }
}

/// Timeout notifications arrive in several shapes; collect every reference they carry
fn timeout_references(payload: &JsonValue) -> Vec<String> {
    let candidates = [
        payload.pointer("/Body/stkCallback/CheckoutRequestID"),
        payload.get("CheckoutRequestID"),
        payload.pointer("/Result/OriginatorConversationID"),
        payload.pointer("/Result/ConversationID"),
        payload.get("OriginatorConversationID"),
        payload.get("ConversationID"),
    ];

    let mut references: Vec<String> = Vec::new();
    for value in candidates.into_iter().flatten() {
        if let Some(reference) = value.as_str().filter(|r| !r.is_empty()) {
            if !references.iter().any(|r| r == reference) {
                references.push(reference.to_string());
            }
        }
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T15:00:00+03:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:00:00"), Some(expected));
        assert_eq!(
            parse_timestamp(&expected.timestamp().to_string()),
            Some(expected)
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_timeout_references_collects_all_shapes() {
        let payload = json!({
            "Result": {"OriginatorConversationID": "abc", "ConversationID": "def"},
            "CheckoutRequestID": "ws_1"
        });
        assert_eq!(timeout_references(&payload), vec!["ws_1", "abc", "def"]);
        assert!(timeout_references(&json!({"other": 1})).is_empty());
    }

    #[test]
    fn test_webhook_error_mapping() {
        assert_eq!(
            AppError::from(WebhookProcessorError::InvalidSignature).status_code(),
            401
        );
        assert_eq!(
            AppError::from(WebhookProcessorError::StaleTimestamp { skew_secs: 900 }).status_code(),
            401
        );
        assert_eq!(
            AppError::from(WebhookProcessorError::UnsafePayload("too long".to_string()))
                .status_code(),
            400
        );
        assert!(WebhookProcessorError::MissingTimestamp.is_security_rejection());
        assert!(!WebhookProcessorError::MalformedPayload("x".to_string()).is_security_rejection());
    }

    #[test]
    fn test_ack_shape() {
        let ack = serde_json::to_value(WebhookAck::accepted(WebhookKind::Callback)).unwrap();
        assert_eq!(ack["ResultCode"], 0);
        assert_eq!(ack["ResultDesc"], "Callback received successfully");
    }
}
