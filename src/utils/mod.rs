pub mod sanitize;

pub use sanitize::{mask_sensitive, sanitize_payload, sanitize_string, SanitizeError};
