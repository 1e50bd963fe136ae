//! Payment endpoints. Handlers only translate HTTP to orchestrator calls.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, DomainError};
use crate::logging::mask_phone;
use crate::middleware::error::{
    get_request_id_from_headers, json_rejection_response, path_rejection_response,
    query_rejection_response,
};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::validator::PaymentRequest;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Clone)]
pub struct PaymentsState {
    pub orchestrator: Arc<PaymentOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StkPushRequest {
    pub user_id: Uuid,
    pub phone_number: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub account_reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub fn router(state: PaymentsState) -> Router {
    Router::new()
        .route("/payments/create", post(create_payment))
        .route("/payments/mpesa/stkpush", post(mpesa_stk_push))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/{id}/cancel", post(cancel_payment))
        .route(
            "/payments/user/{user_id}/transactions",
            get(list_user_transactions),
        )
        .with_state(state)
}

fn error_response(error: impl Into<AppError>, headers: &HeaderMap) -> Response {
    let error = error.into();
    match get_request_id_from_headers(headers) {
        Some(id) => error.with_request_id(id).into_response(),
        None => error.into_response(),
    }
}

fn transaction_not_found(id: &str) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
        transaction_id: id.to_string(),
    }))
}

/// Blank keys count as absent
fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(raw) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = raw
        .to_str()
        .map_err(|_| AppError::validation("Idempotency-Key", "must be visible ASCII"))?
        .trim();
    if key.is_empty() {
        return Ok(None);
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::validation(
            "Idempotency-Key",
            format!("must be at most {} characters", MAX_IDEMPOTENCY_KEY_LEN),
        ));
    }
    Ok(Some(key.to_string()))
}

async fn submit(state: &PaymentsState, headers: &HeaderMap, request: PaymentRequest) -> Response {
    let key = match idempotency_key(headers) {
        Ok(key) => key,
        Err(e) => return error_response(e, headers),
    };

    match state
        .orchestrator
        .process_payment(request, key.as_deref())
        .await
    {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => error_response(e, headers),
    }
}

/// POST /payments/create
pub async fn create_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return json_rejection_response(rejection, &headers),
    };

    info!(
        user_id = %request.user_id,
        amount = %request.amount,
        currency = %request.currency,
        network = %request.network,
        "Payment requested"
    );
    submit(&state, &headers, request).await
}

/// POST /payments/mpesa/stkpush
pub async fn mpesa_stk_push(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    payload: Result<Json<StkPushRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return json_rejection_response(rejection, &headers),
    };

    info!(
        user_id = %body.user_id,
        phone = %mask_phone(&body.phone_number),
        amount = %body.amount,
        "STK push requested"
    );

    let request = PaymentRequest {
        user_id: body.user_id,
        amount: body.amount,
        currency: "KES".to_string(),
        to_address: body.phone_number,
        network: "mpesa".to_string(),
        description: body.description,
        account_reference: body.account_reference,
    };
    submit(&state, &headers, request).await
}

/// GET /payments/{id}
pub async fn get_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => {
            return path_rejection_response(rejection, &headers, transaction_not_found("invalid"))
        }
    };

    match state.orchestrator.get_transaction(id).await {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// GET /payments/user/{user_id}/transactions
pub async fn list_user_transactions(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    user_id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let Path(user_id) = match user_id {
        Ok(id) => id,
        Err(rejection) => {
            return error_response(
                AppError::validation("user_id", rejection.body_text()),
                &headers,
            )
        }
    };
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return query_rejection_response(rejection, &headers),
    };

    match state
        .orchestrator
        .list_user_transactions(user_id, query.limit, query.offset)
        .await
    {
        Ok(transactions) => (StatusCode::OK, Json(transactions)).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// POST /payments/{id}/cancel
pub async fn cancel_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Response {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => {
            return path_rejection_response(rejection, &headers, transaction_not_found("invalid"))
        }
    };
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return json_rejection_response(rejection, &headers),
    };

    match state.orchestrator.cancel_transaction(id, body.user_id).await {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(e) => error_response(e, &headers),
    }
}
