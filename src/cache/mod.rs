//! Idempotency storage.
//!
//! The in-process store is always available. With the `cache` feature and a
//! configured `REDIS_URL`, records live in Redis instead so every replica shares
//! the same claims.

pub mod error;
pub mod idempotency;
pub mod keys;
#[cfg(feature = "cache")]
pub mod redis_store;

pub use error::{CacheError, CacheResult};
pub use idempotency::{
    IdempotencyConfig, IdempotencyStatus, IdempotencyStore, InMemoryIdempotencyStore,
};

#[cfg(feature = "cache")]
pub use redis_pool::*;

#[cfg(feature = "cache")]
mod redis_pool {
    use super::CacheError;
    use bb8::Pool;
    use bb8_redis::RedisConnectionManager;
    use std::time::Duration;
    use tracing::{error, info};

    /// Redis connection pool type alias
    pub type RedisPool = Pool<RedisConnectionManager>;

    /// Redis pool configuration
    #[derive(Debug, Clone)]
    pub struct RedisPoolConfig {
        /// Redis connection URL
        pub redis_url: String,
        /// Maximum number of connections in the pool
        pub max_connections: u32,
        /// Minimum idle connections
        pub min_idle: u32,
        /// Connection timeout
        pub connection_timeout: Duration,
        /// Maximum lifetime of a connection
        pub max_lifetime: Duration,
        /// Idle timeout before closing connection
        pub idle_timeout: Duration,
    }

    impl Default for RedisPoolConfig {
        fn default() -> Self {
            Self {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                max_connections: 10,
                min_idle: 1,
                connection_timeout: Duration::from_secs(5),
                max_lifetime: Duration::from_secs(300),
                idle_timeout: Duration::from_secs(60),
            }
        }
    }

    impl RedisPoolConfig {
        pub fn new(redis_url: impl Into<String>, max_connections: u32) -> Self {
            Self {
                redis_url: redis_url.into(),
                max_connections,
                ..Default::default()
            }
        }
    }

    /// Initialize the Redis connection pool and verify it answers PING
    pub async fn init_cache_pool(config: RedisPoolConfig) -> Result<RedisPool, CacheError> {
        info!(
            max_connections = config.max_connections,
            "Initializing Redis pool"
        );

        let manager = RedisConnectionManager::new(config.redis_url.clone()).map_err(|e| {
            error!("Failed to create Redis connection manager: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout)
            .build(manager)
            .await
            .map_err(|e| {
                error!("Failed to build Redis connection pool: {}", e);
                CacheError::ConnectionError(e.to_string())
            })?;

        // Idempotency claims must be shared, so an unreachable Redis is fatal here
        health_check(&pool).await?;

        info!("Redis pool initialized successfully");
        Ok(pool)
    }

    /// Health check for Redis connection pool
    pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
        let mut conn = pool.get().await.map_err(|e| {
            error!("Failed to get Redis connection: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| {
                error!("Redis PING failed: {}", e);
                CacheError::ConnectionError(e.to_string())
            })?;

        Ok(())
    }
}
