use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use qpesapay_backend::api::{build_router, AppServices};
use qpesapay_backend::cache::InMemoryIdempotencyStore;
use qpesapay_backend::chains::RailRegistry;
use qpesapay_backend::config::SecurityConfig;
use qpesapay_backend::database::memory::{InMemoryTransactionStore, InMemoryUserStore};
use qpesapay_backend::database::user_repository::UserStore;
use qpesapay_backend::domain::{AccountType, NewUser, User};
use qpesapay_backend::health::HealthChecker;
use qpesapay_backend::middleware::auth::{Claims, JwtVerifier};
use qpesapay_backend::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use qpesapay_backend::services::{
    FeeEstimator, OrchestratorConfig, PaymentOrchestrator, PaymentValidator, WebhookProcessor,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const JWT_SECRET: &str = "users-test-secret";

struct TestApp {
    router: Router,
    users: Arc<InMemoryUserStore>,
}

fn app() -> TestApp {
    let users = Arc::new(InMemoryUserStore::new());
    let idempotency = Arc::new(InMemoryIdempotencyStore::default());
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        PaymentValidator::new(),
        FeeEstimator::default(),
        Arc::new(InMemoryTransactionStore::new()),
        idempotency.clone(),
        RailRegistry::new(),
        OrchestratorConfig::default(),
    ));
    let security = SecurityConfig {
        webhook_secret: "webhook-secret".to_string(),
        webhook_tolerance_secs: 300,
        jwt_secret: JWT_SECRET.to_string(),
    };

    let router = build_router(AppServices {
        webhooks: Arc::new(WebhookProcessor::new(orchestrator.clone(), &security)),
        orchestrator,
        users: users.clone(),
        verifier: Arc::new(JwtVerifier::new(JWT_SECRET)),
        health_checker: HealthChecker::new(None, idempotency, RailRegistry::new()),
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::disabled())),
    });

    TestApp { router, users }
}

async fn user(app: &TestApp, email: &str, phone: &str, account_type: AccountType) -> User {
    app.users
        .create(NewUser {
            email: email.to_string(),
            phone_number: phone.to_string(),
            first_name: Some("Amani".to_string()),
            last_name: Some("Otieno".to_string()),
            account_type,
        })
        .await
        .unwrap()
}

fn token_with(sub: String, token_type: &str, exp_offset_secs: i64) -> String {
    let claims = Claims {
        sub,
        exp: (Utc::now().timestamp() + exp_offset_secs) as usize,
        token_type: token_type.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn token(user: &User) -> String {
    token_with(user.id.to_string(), "access", 3600)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_requests_without_valid_token_are_unauthenticated() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;

    let (status, body) = send(&app, request("GET", "/users/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AUTHENTICATION_REQUIRED");

    let (status, _) = send(&app, request("GET", "/users/me", Some("not-a-jwt"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = token_with(amani.id.to_string(), "access", -3600);
    let (status, _) = send(&app, request("GET", "/users/me", Some(&expired), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let refresh = token_with(amani.id.to_string(), "refresh", 3600);
    let (status, _) = send(&app, request("GET", "/users/me", Some(&refresh), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown = token_with(uuid::Uuid::new_v4().to_string(), "access", 3600);
    let (status, _) = send(&app, request("GET", "/users/me", Some(&unknown), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_and_update_own_profile() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;
    let token = token(&amani);

    let (status, me) = send(&app, request("GET", "/users/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "amani@example.com");

    let (status, updated) = send(
        &app,
        request(
            "PUT",
            "/users/me",
            Some(&token),
            Some(json!({
                "first_name": " Wanjiru ",
                "phone_number": "0722000111",
                "preferred_currency": "usd"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["first_name"], "Wanjiru");
    assert_eq!(updated["phone_number"], "+254722000111");
    assert_eq!(updated["preferred_currency"], "USD");
    assert_eq!(updated["last_name"], "Otieno");
}

#[tokio::test]
async fn test_profile_update_validation() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;
    user(&app, "baraka@example.com", "+254733000222", AccountType::Personal).await;
    let token = token(&amani);

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/users/me",
            Some(&token),
            Some(json!({ "phone_number": "0733000222" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, _) = send(
        &app,
        request(
            "PUT",
            "/users/me",
            Some(&token),
            Some(json!({ "preferred_currency": "EUR" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_kyc_can_only_be_submitted_once() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;
    let token = token(&amani);
    let kyc = json!({ "document_type": "national_id", "document_number": "12345678" });

    let (status, body) = send(
        &app,
        request("PUT", "/users/me/kyc", Some(&token), Some(kyc.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kyc_status"], "submitted");
    assert_eq!(body["kyc_document_number"], "12345678");

    let (status, _) = send(&app, request("PUT", "/users/me/kyc", Some(&token), Some(kyc))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_listing_users_requires_admin() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;
    let admin = user(&app, "ops@example.com", "+254700000001", AccountType::Admin).await;

    let (status, body) = send(&app, request("GET", "/users", Some(&token(&amani)), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");

    let (status, body) = send(&app, request("GET", "/users", Some(&token(&admin)), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        request("GET", "/users?skip=0&limit=1", Some(&token(&admin)), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        request("GET", "/users?limit=0", Some(&token(&admin)), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_lookup_is_limited_to_self_or_admin() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;
    let baraka = user(&app, "baraka@example.com", "+254733000222", AccountType::Personal).await;
    let admin = user(&app, "ops@example.com", "+254700000001", AccountType::Admin).await;

    let own = format!("/users/{}", amani.id);
    let (status, _) = send(&app, request("GET", &own, Some(&token(&amani)), None)).await;
    assert_eq!(status, StatusCode::OK);

    let other = format!("/users/{}", baraka.id);
    let (status, _) = send(&app, request("GET", &other, Some(&token(&amani)), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, request("GET", &other, Some(&token(&admin)), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "baraka@example.com");

    let missing = format!("/users/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&app, request("GET", &missing, Some(&token(&admin)), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deactivate_and_reactivate_account() {
    let app = app();
    let amani = user(&app, "amani@example.com", "+254712345678", AccountType::Personal).await;
    let admin = user(&app, "ops@example.com", "+254700000001", AccountType::Admin).await;
    let amani_token = token(&amani);

    let (status, body) = send(&app, request("DELETE", "/users/me", Some(&amani_token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Account deactivated successfully");

    let (status, _) = send(&app, request("GET", "/users/me", Some(&amani_token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let activate = format!("/users/{}/activate", amani.id);
    let (status, _) = send(&app, request("PUT", &activate, Some(&amani_token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, request("PUT", &activate, Some(&token(&admin)), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);

    let (status, _) = send(&app, request("GET", "/users/me", Some(&amani_token), None)).await;
    assert_eq!(status, StatusCode::OK);
}
