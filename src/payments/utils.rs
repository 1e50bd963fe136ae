use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Credentials attached to an outbound provider call
#[derive(Debug, Clone, Copy)]
pub enum HttpAuth<'a> {
    Bearer(&'a str),
    Basic {
        username: &'a str,
        password: &'a str,
    },
}

/// JSON HTTP client with retry on 429 and 5xx
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Option<HttpAuth<'_>>,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

            match auth {
                Some(HttpAuth::Bearer(token)) => request = request.bearer_auth(token),
                Some(HttpAuth::Basic { username, password }) => {
                    request = request.basic_auth(username, Some(password))
                }
                None => {}
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    PaymentError::NetworkError {
                        message: format!("{} request timed out", self.provider),
                    }
                } else {
                    PaymentError::NetworkError {
                        message: format!("{} request failed: {}", self.provider, e),
                    }
                }
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::ProviderError {
                                provider: self.provider.to_string(),
                                message: format!("invalid provider JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: format!("{} rate limit exceeded", self.provider),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            provider = self.provider,
                            status = %status,
                            attempt = attempt + 1,
                            "provider server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(error_from_body(self.provider, status, &text));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: format!("{} request failed", self.provider),
        }))
    }
}

/// Daraja reports failures as `{"errorCode": "...", "errorMessage": "..."}`
fn error_from_body(provider: &str, status: reqwest::StatusCode, text: &str) -> PaymentError {
    let parsed: Option<JsonValue> = serde_json::from_str(text).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let provider_code = field("errorCode").or_else(|| Some(status.as_u16().to_string()));
    let message = field("errorMessage").unwrap_or_else(|| format!("HTTP {}: {}", status, text));

    if status.is_client_error() && status.as_u16() != 401 && status.as_u16() != 403 {
        return PaymentError::PaymentDeclinedError {
            message,
            provider_code,
        };
    }

    PaymentError::ProviderError {
        provider: provider.to_string(),
        message,
        provider_code,
        retryable: status.is_server_error(),
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`
pub fn sign_hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = sign_hmac_sha256_hex(payload, secret);
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    secure_eq(computed.as_bytes(), provided.to_ascii_lowercase().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_round_trips_and_accepts_prefix() {
        let payload = br#"{"Body":{}}"#;
        let signature = sign_hmac_sha256_hex(payload, "secret");
        assert_eq!(signature.len(), 64);
        assert!(verify_hmac_sha256_hex(payload, "secret", &signature));
        assert!(verify_hmac_sha256_hex(
            payload,
            "secret",
            &format!("sha256={}", signature.to_uppercase())
        ));
    }

    #[test]
    fn hmac_rejects_wrong_secret_or_garbage() {
        let payload = br#"{"Body":{}}"#;
        let signature = sign_hmac_sha256_hex(payload, "secret");
        assert!(!verify_hmac_sha256_hex(payload, "other", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "secret", "not-a-valid-signature"));
    }

    #[test]
    fn daraja_error_body_is_decoded() {
        let err = error_from_body(
            "mpesa",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#,
        );
        match err {
            PaymentError::PaymentDeclinedError {
                message,
                provider_code,
            } => {
                assert_eq!(message, "Bad Request - Invalid PhoneNumber");
                assert_eq!(provider_code.as_deref(), Some("400.002.02"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
