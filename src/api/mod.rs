//! HTTP surface: one router per area, merged under shared middleware.

pub mod health;
pub mod payments;
pub mod users;
pub mod webhooks;

use axum::{
    http::{
        header::{
            CACHE_CONTROL, CONTENT_TYPE, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY,
            X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
        HeaderValue, StatusCode,
    },
    response::Response,
    Router,
};
use std::any::Any;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::database::user_repository::UserStore;
use crate::health::HealthChecker;
use crate::middleware::auth::JwtVerifier;
use crate::middleware::error::ErrorResponse;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;

/// Everything the routers need, already wired
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub users: Arc<dyn UserStore>,
    pub verifier: Arc<JwtVerifier>,
    pub health_checker: HealthChecker,
    pub rate_limiter: Arc<RateLimiter>,
}

pub fn build_router(services: AppServices) -> Router {
    Router::new()
        .merge(health::router(services.health_checker))
        .merge(payments::router(payments::PaymentsState {
            orchestrator: services.orchestrator,
        }))
        .merge(webhooks::router(webhooks::WebhookState {
            processor: services.webhooks,
        }))
        .merge(users::router(users::UsersState {
            users: services.users,
            verifier: services.verifier,
        }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(SetResponseHeaderLayer::overriding(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                ))
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(axum::middleware::from_fn_with_state(
                    services.rate_limiter,
                    rate_limit_middleware,
                )),
        )
}

/// Panics become a generic 500; the payload only goes to the log
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");

    let body = serde_json::to_vec(&ErrorResponse::internal_error(None)).unwrap_or_default();
    let mut response = Response::new(axum::body::Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
