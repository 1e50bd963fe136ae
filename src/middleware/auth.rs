//! Bearer token authentication for the user endpoints.
//!
//! Tokens are issued elsewhere; this service only verifies HS256 access tokens whose
//! `sub` is a user id.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::user_repository::UserStore;
use crate::domain::User;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;

pub const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("wrong token type {0}")]
    WrongType(String),
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode an access token and return the user id it names
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AuthError::WrongType(data.claims.token_type));
        }

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AuthError::Invalid("subject is not a user id".to_string()))
    }
}

/// Bearer value of an `Authorization` header
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// What the extractor needs from router state
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<JwtVerifier>,
    pub users: Arc<dyn UserStore>,
}

/// The active user behind a verified bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);
        let request_id = get_request_id_from_headers(&parts.headers);
        let reject = |error: AppError| match &request_id {
            Some(id) => error.with_request_id(id.clone()),
            None => error,
        };

        let token = bearer_token(parts)
            .ok_or_else(|| reject(AppError::unauthenticated(AuthError::MissingToken.to_string())))?;

        let user_id = auth.verifier.verify(token).map_err(|e| {
            warn!(target: "security", reason = %e, "Bearer token rejected");
            reject(AppError::unauthenticated(e.to_string()))
        })?;

        let user = auth
            .users
            .get(user_id)
            .await
            .map_err(|e| reject(AppError::from(e)))?
            .ok_or_else(|| {
                warn!(target: "security", user_id = %user_id, "Token for unknown user");
                reject(AppError::unauthenticated("unknown user"))
            })?;

        if !user.is_active {
            debug!(user_id = %user_id, "Inactive user rejected");
            return Err(reject(AppError::forbidden("Inactive user")));
        }

        Ok(AuthenticatedUser(user))
    }
}
