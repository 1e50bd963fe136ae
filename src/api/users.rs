//! User profile endpoints. Every route needs a bearer access token.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRef, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::user_repository::UserStore;
use crate::domain::{KycSubmission, PhoneNumber, ProfileUpdate, User};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::middleware::auth::{AuthState, AuthenticatedUser, JwtVerifier};
use crate::middleware::error::{
    get_request_id_from_headers, json_rejection_response, path_rejection_response,
    query_rejection_response,
};

const MAX_NAME_LEN: usize = 100;
const PROFILE_CURRENCIES: [&str; 4] = ["KES", "USD", "BTC", "USDT"];
const DOCUMENT_TYPES: [&str; 3] = ["national_id", "passport", "alien_id"];

#[derive(Clone)]
pub struct UsersState {
    pub users: Arc<dyn UserStore>,
    pub verifier: Arc<JwtVerifier>,
}

impl FromRef<UsersState> for AuthState {
    fn from_ref(state: &UsersState) -> Self {
        AuthState {
            verifier: state.verifier.clone(),
            users: state.users.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub preferred_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KycRequest {
    pub document_type: String,
    pub document_number: String,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/me",
            get(get_me).put(update_me).delete(deactivate_me),
        )
        .route("/users/me/kyc", put(submit_kyc))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/activate", put(activate_user))
        .with_state(state)
}

fn error_response(error: impl Into<AppError>, headers: &HeaderMap) -> Response {
    let error = error.into();
    match get_request_id_from_headers(headers) {
        Some(id) => error.with_request_id(id).into_response(),
        None => error.into_response(),
    }
}

fn user_not_found(id: impl ToString) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::UserNotFound {
        user_id: id.to_string(),
    }))
}

fn require_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("Not enough permissions"))
    }
}

/// Unique phone numbers are a user-facing rule, not a storage failure
fn profile_store_error(err: DatabaseError) -> AppError {
    match &err.kind {
        DatabaseErrorKind::UniqueViolation { constraint } if constraint.contains("phone") => {
            AppError::validation("phone_number", "Phone number already registered")
        }
        _ => AppError::from(err),
    }
}

fn clean_name(field: &str, value: Option<String>) -> Result<Option<String>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AppError::validation(
            field,
            format!("must be 1 to {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

pub fn validate_profile_update(request: UpdateProfileRequest) -> Result<ProfileUpdate, AppError> {
    let phone_number = request
        .phone_number
        .map(|raw| {
            PhoneNumber::parse(&raw)
                .map(PhoneNumber::into_string)
                .map_err(|_| AppError::validation("phone_number", "Invalid Kenyan phone number"))
        })
        .transpose()?;

    let preferred_currency = request
        .preferred_currency
        .map(|raw| {
            let code = raw.trim().to_uppercase();
            if PROFILE_CURRENCIES.contains(&code.as_str()) {
                Ok(code)
            } else {
                Err(AppError::validation(
                    "preferred_currency",
                    format!("Currency must be one of: {}", PROFILE_CURRENCIES.join(", ")),
                ))
            }
        })
        .transpose()?;

    Ok(ProfileUpdate {
        first_name: clean_name("first_name", request.first_name)?,
        last_name: clean_name("last_name", request.last_name)?,
        phone_number,
        preferred_currency,
    })
}

pub fn validate_kyc(request: KycRequest) -> Result<KycSubmission, AppError> {
    let document_type = request.document_type.trim().to_lowercase();
    if !DOCUMENT_TYPES.contains(&document_type.as_str()) {
        return Err(AppError::validation(
            "document_type",
            format!("Document type must be one of: {}", DOCUMENT_TYPES.join(", ")),
        ));
    }

    let document_number = if document_type == "national_id" {
        let digits: String = request
            .document_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if !(7..=10).contains(&digits.len()) {
            return Err(AppError::validation(
                "document_number",
                "Invalid ID number format",
            ));
        }
        digits
    } else {
        let number = request.document_number.trim().to_uppercase();
        if !(5..=50).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(AppError::validation(
                "document_number",
                "Invalid document number format",
            ));
        }
        number
    };

    Ok(KycSubmission {
        document_type,
        document_number,
    })
}

/// GET /users/me
pub async fn get_me(AuthenticatedUser(user): AuthenticatedUser) -> Json<User> {
    Json(user)
}

/// PUT /users/me
pub async fn update_me(
    State(state): State<UsersState>,
    headers: HeaderMap,
    AuthenticatedUser(user): AuthenticatedUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return json_rejection_response(rejection, &headers),
    };
    let update = match validate_profile_update(request) {
        Ok(update) => update,
        Err(e) => return error_response(e, &headers),
    };

    match state.users.update_profile(user.id, &update).await {
        Ok(Some(updated)) => {
            info!(user_id = %user.id, "User profile updated");
            (StatusCode::OK, Json(updated)).into_response()
        }
        Ok(None) => error_response(user_not_found(user.id), &headers),
        Err(e) => error_response(profile_store_error(e), &headers),
    }
}

/// PUT /users/me/kyc
pub async fn submit_kyc(
    State(state): State<UsersState>,
    headers: HeaderMap,
    AuthenticatedUser(user): AuthenticatedUser,
    payload: Result<Json<KycRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return json_rejection_response(rejection, &headers),
    };
    if !user.kyc_status.accepts_submission() {
        return error_response(
            AppError::validation(
                "kyc_status",
                format!("KYC cannot be submitted while {}", user.kyc_status.as_str()),
            ),
            &headers,
        );
    }
    let submission = match validate_kyc(request) {
        Ok(submission) => submission,
        Err(e) => return error_response(e, &headers),
    };

    match state.users.submit_kyc(user.id, &submission).await {
        Ok(Some(updated)) => {
            info!(
                user_id = %user.id,
                kyc_status = updated.kyc_status.as_str(),
                "User KYC information updated"
            );
            (StatusCode::OK, Json(updated)).into_response()
        }
        Ok(None) => error_response(user_not_found(user.id), &headers),
        Err(e) => error_response(e, &headers),
    }
}

/// DELETE /users/me
pub async fn deactivate_me(
    State(state): State<UsersState>,
    headers: HeaderMap,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Response {
    match state.users.set_active(user.id, false).await {
        Ok(Some(_)) => {
            info!(user_id = %user.id, "User account deactivated");
            (
                StatusCode::OK,
                Json(json!({"message": "Account deactivated successfully"})),
            )
                .into_response()
        }
        Ok(None) => error_response(user_not_found(user.id), &headers),
        Err(e) => error_response(e, &headers),
    }
}

/// GET /users/{id}: the caller themself, or an admin
pub async fn get_user(
    State(state): State<UsersState>,
    headers: HeaderMap,
    AuthenticatedUser(caller): AuthenticatedUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => {
            return path_rejection_response(rejection, &headers, user_not_found("invalid"))
        }
    };

    if caller.id != id {
        if let Err(e) = require_admin(&caller) {
            return error_response(e, &headers);
        }
    }

    match state.users.get(id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(None) => error_response(user_not_found(id), &headers),
        Err(e) => error_response(e, &headers),
    }
}

/// GET /users (admin)
pub async fn list_users(
    State(state): State<UsersState>,
    headers: HeaderMap,
    AuthenticatedUser(caller): AuthenticatedUser,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> Response {
    if let Err(e) = require_admin(&caller) {
        return error_response(e, &headers);
    }
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return query_rejection_response(rejection, &headers),
    };

    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);
    if skip < 0 {
        return error_response(AppError::validation("skip", "must be at least 0"), &headers);
    }
    if !(1..=1000).contains(&limit) {
        return error_response(
            AppError::validation("limit", "must be between 1 and 1000"),
            &headers,
        );
    }

    match state.users.list(skip, limit).await {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// PUT /users/{id}/activate (admin)
pub async fn activate_user(
    State(state): State<UsersState>,
    headers: HeaderMap,
    AuthenticatedUser(caller): AuthenticatedUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Response {
    if let Err(e) = require_admin(&caller) {
        return error_response(e, &headers);
    }
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => {
            return path_rejection_response(rejection, &headers, user_not_found("invalid"))
        }
    };

    match state.users.set_active(id, true).await {
        Ok(Some(user)) => {
            info!(user_id = %id, admin_id = %caller.id, "User account activated");
            (StatusCode::OK, Json(user)).into_response()
        }
        Ok(None) => error_response(user_not_found(id), &headers),
        Err(e) => error_response(e, &headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_update_normalises_phone_and_currency() {
        let update = validate_profile_update(UpdateProfileRequest {
            first_name: Some("  Wanjiru ".to_string()),
            phone_number: Some("0712345678".to_string()),
            preferred_currency: Some("usdt".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(update.first_name.as_deref(), Some("Wanjiru"));
        assert_eq!(update.phone_number.as_deref(), Some("+254712345678"));
        assert_eq!(update.preferred_currency.as_deref(), Some("USDT"));
    }

    #[test]
    fn test_profile_update_rejects_bad_values() {
        assert!(validate_profile_update(UpdateProfileRequest {
            phone_number: Some("12345".to_string()),
            ..Default::default()
        })
        .is_err());
        assert!(validate_profile_update(UpdateProfileRequest {
            preferred_currency: Some("ETH".to_string()),
            ..Default::default()
        })
        .is_err());
        assert!(validate_profile_update(UpdateProfileRequest {
            last_name: Some("x".repeat(101)),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_kyc_document_rules() {
        let national = validate_kyc(KycRequest {
            document_type: "National_ID".to_string(),
            document_number: "1234 5678".to_string(),
        })
        .unwrap();
        assert_eq!(national.document_type, "national_id");
        assert_eq!(national.document_number, "12345678");

        assert!(validate_kyc(KycRequest {
            document_type: "national_id".to_string(),
            document_number: "123".to_string(),
        })
        .is_err());
        assert!(validate_kyc(KycRequest {
            document_type: "drivers_license".to_string(),
            document_number: "AB12345".to_string(),
        })
        .is_err());
        assert_eq!(
            validate_kyc(KycRequest {
                document_type: "passport".to_string(),
                document_number: "ak123456".to_string(),
            })
            .unwrap()
            .document_number,
            "AK123456"
        );
    }
}
