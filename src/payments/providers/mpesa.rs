//! Safaricom Daraja client: OAuth, STK push and callback payloads.

use crate::chains::{RailKind, RailReceipt, RailResult, RailTransfer, SettlementRail};
use crate::config::ConfigError;
use crate::domain::PhoneNumber;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::utils::{HttpAuth, PaymentHttpClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

/// Daraja limits AccountReference to 12 characters
pub const MAX_ACCOUNT_REFERENCE_LEN: usize = 12;
pub const MAX_TRANSACTION_DESC_LEN: usize = 100;

/// Refresh the cached token this long before Daraja says it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Daraja timestamps are in East Africa Time
const EAT_OFFSET_HOURS: i64 = 3;
/// Typical time between STK prompt and the customer's PIN entry
const STK_CONFIRMATION_SECS: u64 = 60;

#[derive(Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub timeout_url: Option<String>,
    pub result_url: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("shortcode", &self.shortcode)
            .field("callback_url", &self.callback_url)
            .field("base_url", &self.base_url)
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("passkey", &"<redacted>")
            .finish()
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))
        };

        Ok(Self {
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            shortcode: required("MPESA_SHORTCODE")?,
            passkey: required("MPESA_PASSKEY")?,
            callback_url: required("MPESA_CALLBACK_URL")?,
            timeout_url: std::env::var("MPESA_TIMEOUT_URL").ok(),
            result_url: std::env::var("MPESA_RESULT_URL").ok(),
            base_url: std::env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| SANDBOX_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: std::env::var("MPESA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_retries: std::env::var("MPESA_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Daraja sends this as a string ("3599")
    expires_in: JsonValue,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        let secs = match &self.expires_in {
            JsonValue::String(s) => s.parse().ok(),
            JsonValue::Number(n) => n.as_u64(),
            _ => None,
        };
        Duration::from_secs(secs.unwrap_or(3599))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

/// `{"Body": {"stkCallback": {...}}}` as posted to the callback URL
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<JsonValue>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    pub fn metadata(&self, name: &str) -> Option<&JsonValue> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    pub fn receipt_number(&self) -> Option<String> {
        match self.metadata("MpesaReceiptNumber")? {
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// `{"Result": {...}}` as posted to the result URL
#[derive(Debug, Clone, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "Result")]
    pub result: ResultBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBody {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: Option<String>,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
}

impl ResultBody {
    /// References a stored transaction may carry, most specific first
    pub fn references(&self) -> Vec<&str> {
        [&self.originator_conversation_id, &self.conversation_id]
            .into_iter()
            .filter_map(|r| r.as_deref())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// True iff the payload is an STK callback with `ResultCode == 0`
pub fn process_callback(payload: &JsonValue) -> bool {
    payload
        .get("Body")
        .and_then(|b| b.get("stkCallback"))
        .and_then(|c| c.get("ResultCode"))
        .and_then(|code| code.as_i64())
        == Some(0)
}

// ============================================================================
// Helpers
// ============================================================================

/// `base64(shortcode + passkey + timestamp)`
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// `%Y%m%d%H%M%S` in East Africa Time
pub fn daraja_timestamp(now: DateTime<Utc>) -> String {
    (now + chrono::Duration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// STK push only takes whole shillings; fractions are truncated
pub fn whole_shillings(amount: &BigDecimal) -> PaymentResult<String> {
    let whole = amount.with_scale(0);
    if whole < BigDecimal::from(1) {
        return Err(PaymentError::ValidationError {
            message: "M-Pesa amount must be at least 1 KES".to_string(),
            field: Some("amount".to_string()),
        });
    }
    Ok(whole.to_string())
}

// ============================================================================
// Client
// ============================================================================

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct MpesaClient {
    config: MpesaConfig,
    http: PaymentHttpClient,
    token: Mutex<Option<CachedToken>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "mpesa",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MpesaConfig {
        &self.config
    }

    /// OAuth token, fetched once and reused until shortly before expiry
    pub async fn access_token(&self) -> PaymentResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response: TokenResponse = self
            .http
            .request_json(
                reqwest::Method::GET,
                &url,
                Some(HttpAuth::Basic {
                    username: &self.config.consumer_key,
                    password: &self.config.consumer_secret,
                }),
                None,
            )
            .await
            .map_err(|e| match e {
                PaymentError::PaymentDeclinedError { message, .. }
                | PaymentError::ProviderError {
                    message,
                    retryable: false,
                    ..
                } => PaymentError::AuthenticationError { message },
                other => other,
            })?;

        let lifetime = response.lifetime();
        debug!(expires_in_secs = lifetime.as_secs(), "Obtained M-Pesa access token");

        let value = response.access_token.clone();
        *cached = Some(CachedToken {
            value: response.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(value)
    }

    pub fn build_stk_push(
        &self,
        phone: &PhoneNumber,
        amount: &BigDecimal,
        account_reference: &str,
        transaction_desc: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<StkPushRequest> {
        if account_reference.chars().count() > MAX_ACCOUNT_REFERENCE_LEN {
            return Err(PaymentError::ValidationError {
                message: format!(
                    "Account reference too long (max {} characters)",
                    MAX_ACCOUNT_REFERENCE_LEN
                ),
                field: Some("account_reference".to_string()),
            });
        }

        let timestamp = daraja_timestamp(now);
        Ok(StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: whole_shillings(amount)?,
            party_a: phone.msisdn().to_string(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone.msisdn().to_string(),
            callback_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc
                .chars()
                .take(MAX_TRANSACTION_DESC_LEN)
                .collect(),
        })
    }

    /// Prompt the customer's handset for payment
    pub async fn initiate_stk_push(
        &self,
        phone: &PhoneNumber,
        amount: &BigDecimal,
        account_reference: &str,
        transaction_desc: &str,
    ) -> PaymentResult<StkPushResponse> {
        let request =
            self.build_stk_push(phone, amount, account_reference, transaction_desc, Utc::now())?;
        let body = serde_json::to_value(&request).map_err(|e| PaymentError::ProviderError {
            provider: "mpesa".to_string(),
            message: format!("failed to encode STK push: {}", e),
            provider_code: None,
            retryable: false,
        })?;

        let token = self.access_token().await?;
        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        let response: StkPushResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &url,
                Some(HttpAuth::Bearer(&token)),
                Some(&body),
            )
            .await?;

        if response.response_code != "0" {
            warn!(
                code = %response.response_code,
                description = %response.response_description,
                "STK push declined"
            );
            return Err(PaymentError::PaymentDeclinedError {
                message: response.response_description,
                provider_code: Some(response.response_code),
            });
        }

        info!(
            checkout_request_id = %response.checkout_request_id,
            amount = %request.amount,
            "STK push accepted"
        );
        Ok(response)
    }
}

// ============================================================================
// Settlement rail
// ============================================================================

/// M-Pesa as a settlement rail. Finality arrives through the callback webhook, so
/// confirmations are never polled.
pub struct MpesaRail {
    client: MpesaClient,
}

impl MpesaRail {
    pub fn new(client: MpesaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SettlementRail for MpesaRail {
    fn kind(&self) -> RailKind {
        RailKind::Mpesa
    }

    async fn send_transaction(&self, transfer: &RailTransfer) -> RailResult<RailReceipt> {
        let phone = PhoneNumber::parse(&transfer.to).map_err(|e| {
            crate::chains::RailError::InvalidDestination {
                reason: e.to_string(),
            }
        })?;

        let account_reference = transfer.account_reference.clone().unwrap_or_else(|| {
            transfer
                .transaction_id
                .simple()
                .to_string()
                .chars()
                .take(MAX_ACCOUNT_REFERENCE_LEN)
                .collect()
        });
        let description = transfer
            .description
            .clone()
            .unwrap_or_else(|| "Payment".to_string());

        let response = self
            .client
            .initiate_stk_push(&phone, &transfer.amount, &account_reference, &description)
            .await?;

        Ok(RailReceipt {
            reference: response.checkout_request_id,
            message: response.customer_message,
        })
    }

    async fn get_confirmations(&self, _reference: &str) -> RailResult<u32> {
        Ok(0)
    }

    fn estimated_confirmation_secs(&self) -> u64 {
        STK_CONFIRMATION_SECS
    }

    async fn health_check(&self) -> RailResult<()> {
        self.client.access_token().await?;
        Ok(())
    }
}
