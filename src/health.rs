//! Health check module
//! Reports the state of the database, the idempotency store and the settlement rails

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cache::IdempotencyStore;
use crate::chains::RailRegistry;

const PROBE_KEY: &str = "health:probe";

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    idempotency: Arc<dyn IdempotencyStore>,
    rails: RailRegistry,
}

impl HealthChecker {
    /// Without a pool the service runs on in-memory stores and the database check is skipped
    pub fn new(
        db_pool: Option<sqlx::PgPool>,
        idempotency: Arc<dyn IdempotencyStore>,
        rails: RailRegistry,
    ) -> Self {
        Self {
            db_pool,
            idempotency,
            rails,
        }
    }

    /// Database or idempotency store down is unhealthy; a failing rail only degrades
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut overall_healthy = true;
        let mut degraded = false;

        match &self.db_pool {
            Some(pool) => match timeout(Duration::from_secs(5), check_database_health(pool)).await
            {
                Ok(Ok(response_time)) => {
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::up(Some(response_time)),
                    );
                    info!("Database health check: OK ({}ms)", response_time);
                }
                Ok(Err(e)) => {
                    overall_healthy = false;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some(e.to_string())),
                    );
                    error!("Database health check failed: {}", e);
                }
                Err(_) => {
                    overall_healthy = false;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some("Timeout".to_string())),
                    );
                    error!("Database health check timed out");
                }
            },
            None => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::up(None).with_details("in-memory store"),
                );
            }
        }

        let backend = self.idempotency.backend();
        match timeout(
            Duration::from_secs(5),
            check_idempotency_health(self.idempotency.as_ref()),
        )
        .await
        {
            Ok(Ok(response_time)) => {
                health_status.checks.insert(
                    "idempotency_store".to_string(),
                    ComponentHealth::up(Some(response_time)).with_details(backend),
                );
            }
            Ok(Err(e)) => {
                overall_healthy = false;
                health_status.checks.insert(
                    "idempotency_store".to_string(),
                    ComponentHealth::down(Some(format!("{}: {}", backend, e))),
                );
                error!(backend, "Idempotency store health check failed: {}", e);
            }
            Err(_) => {
                overall_healthy = false;
                health_status.checks.insert(
                    "idempotency_store".to_string(),
                    ComponentHealth::down(Some(format!("{}: Timeout", backend))),
                );
                error!(backend, "Idempotency store health check timed out");
            }
        }

        match timeout(Duration::from_secs(10), self.rails.health_check_all()).await {
            Ok(rails) => {
                for (name, rail) in rails {
                    let component = if rail.is_healthy {
                        ComponentHealth::up(Some(rail.response_time_ms as u128))
                    } else {
                        degraded = true;
                        warn!(rail = %name, error = ?rail.error_message, "Rail health check failed");
                        ComponentHealth::warning(
                            Some(rail.response_time_ms as u128),
                            rail.error_message,
                        )
                    };
                    health_status.checks.insert(format!("rail:{}", name), component);
                }
            }
            Err(_) => {
                degraded = true;
                warn!("Rail health checks timed out");
            }
        }

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match crate::database::health_check(pool).await {
        Ok(()) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

/// A read against a key that is never written exercises the whole store round trip
pub async fn check_idempotency_health(
    store: &dyn IdempotencyStore,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match store.get(PROBE_KEY).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryIdempotencyStore;
    use crate::chains::{
        RailKind, RailReceipt, RailResult, RailTransfer, SettlementRail, SimulatedChainRail,
    };
    use crate::chains::RailError;
    use async_trait::async_trait;

    struct DownRail;

    #[async_trait]
    impl SettlementRail for DownRail {
        fn kind(&self) -> RailKind {
            RailKind::Mpesa
        }
        async fn send_transaction(&self, _transfer: &RailTransfer) -> RailResult<RailReceipt> {
            Err(RailError::Unavailable {
                message: "down".to_string(),
            })
        }
        async fn get_confirmations(&self, _reference: &str) -> RailResult<u32> {
            Ok(0)
        }
        fn estimated_confirmation_secs(&self) -> u64 {
            60
        }
        async fn health_check(&self) -> RailResult<()> {
            Err(RailError::Unavailable {
                message: "oauth failed".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
    }

    #[tokio::test]
    async fn test_in_memory_deployment_is_healthy() {
        let checker = HealthChecker::new(
            None,
            Arc::new(InMemoryIdempotencyStore::default()),
            RailRegistry::new().with_rail(Arc::new(SimulatedChainRail::new(RailKind::Ethereum))),
        );

        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Healthy);
        assert!(status.checks.contains_key("database"));
        assert!(status.checks.contains_key("idempotency_store"));
        assert!(status.checks.contains_key("rail:ethereum"));
    }

    #[tokio::test]
    async fn test_failing_rail_only_degrades() {
        let checker = HealthChecker::new(
            None,
            Arc::new(InMemoryIdempotencyStore::default()),
            RailRegistry::new().with_rail(Arc::new(DownRail)),
        );

        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert!(status.is_healthy());
        assert_eq!(status.checks["rail:mpesa"].status, ComponentState::Warning);
    }
}
