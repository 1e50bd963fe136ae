//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod idempotency {
    use super::*;
    use uuid::Uuid;

    pub const NAMESPACE: &str = "idempotency";

    /// Caller-supplied `Idempotency-Key`, scoped to the user that sent it
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct RequestKey {
        pub user_id: Uuid,
        pub key: String,
    }

    impl RequestKey {
        pub fn new(user_id: Uuid, key: impl Into<String>) -> Self {
            Self {
                user_id,
                key: key.into(),
            }
        }
    }

    impl fmt::Display for RequestKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}:{}", VERSION, NAMESPACE, self.user_id, self.key)
        }
    }

    /// Sorted set scored by last access, used for the size bound
    pub struct IndexKey;

    impl fmt::Display for IndexKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:index", VERSION, NAMESPACE)
        }
    }
}
