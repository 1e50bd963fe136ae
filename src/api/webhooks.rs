use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::webhook_processor::{
    WebhookKind, WebhookProcessor, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/mpesa/callback", post(mpesa_callback))
        .route("/webhooks/mpesa/timeout", post(mpesa_timeout))
        .route("/webhooks/mpesa/result", post(mpesa_result))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The raw body is handed over untouched; the signature covers its exact bytes
async fn handle(state: WebhookState, kind: WebhookKind, headers: HeaderMap, body: Bytes) -> Response {
    info!(webhook = kind.as_str(), bytes = body.len(), "Received M-Pesa webhook");

    match state
        .processor
        .process(
            kind,
            header(&headers, SIGNATURE_HEADER),
            header(&headers, TIMESTAMP_HEADER),
            &body,
            Utc::now(),
        )
        .await
    {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(e) => {
            let error = AppError::from(e);
            match get_request_id_from_headers(&headers) {
                Some(id) => error.with_request_id(id).into_response(),
                None => error.into_response(),
            }
        }
    }
}

/// POST /webhooks/mpesa/callback
pub async fn mpesa_callback(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookKind::Callback, headers, body).await
}

/// POST /webhooks/mpesa/timeout
pub async fn mpesa_timeout(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookKind::Timeout, headers, body).await
}

/// POST /webhooks/mpesa/result
pub async fn mpesa_result(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookKind::Result, headers, body).await
}
