//! Inbound per-client rate limiting.
//!
//! Fixed window counters keyed by client address. A client over its budget gets the
//! standard 429 envelope with a `Retry-After` header; health probes are never counted.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ConfigError;
use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::middleware::error::get_request_id_from_headers;

/// Windows are pruned once this many clients are tracked
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per client per window; 0 turns limiting off
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_requests: match env::var("RATE_LIMIT_MAX_REQUESTS") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_MAX_REQUESTS".to_string()))?,
                Err(_) => defaults.max_requests,
            },
            window: match env::var("RATE_LIMIT_WINDOW_SECS") {
                Ok(v) => Duration::from_secs(
                    v.parse()
                        .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_WINDOW_SECS".to_string()))?,
                ),
                Err(_) => defaults.window,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests > 0 && self.window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_WINDOW_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn disabled() -> Self {
        Self {
            max_requests: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Verdict for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        if !self.config.is_enabled() {
            return RateDecision::Allowed {
                remaining: u32::MAX,
            };
        }

        let window = self.config.window;
        let mut windows = self.windows.lock().await;

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.config.max_requests {
            let elapsed = now.duration_since(entry.started);
            let retry_after = window.saturating_sub(elapsed).as_secs_f64().ceil() as u64;
            return RateDecision::Limited {
                retry_after_secs: retry_after.max(1),
            };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.config.max_requests - entry.count,
        }
    }
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path().starts_with("/health") {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(request.headers(), peer);

    match limiter.check(&client).await {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after_secs } => {
            warn!(
                client = %client,
                retry_after_secs,
                path = %request.uri().path(),
                "Client rate limited"
            );

            let mut error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "api".to_string(),
                retry_after: Some(retry_after_secs),
            }));
            if let Some(request_id) = get_request_id_from_headers(request.headers()) {
                error = error.with_request_id(request_id);
            }

            let mut response = error.into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}
