//! HTTP middleware: error envelopes, request ids and logging, bearer auth, rate limits.

pub mod auth;
pub mod error;
pub mod logging;
pub mod rate_limit;

pub use auth::{AuthState, AuthenticatedUser, Claims, JwtVerifier};
pub use error::ErrorResponse;
pub use logging::{request_logging_middleware, UuidRequestId};
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
