use anyhow::Context;
use qpesapay_backend::api::{build_router, AppServices};
use qpesapay_backend::cache::{IdempotencyConfig, IdempotencyStore, InMemoryIdempotencyStore};
use qpesapay_backend::chains::{RailKind, RailRegistry, SimulatedChainRail};
use qpesapay_backend::config::AppConfig;
use qpesapay_backend::database::memory::{InMemoryTransactionStore, InMemoryUserStore};
use qpesapay_backend::database::transaction_repository::{TransactionRepository, TransactionStore};
use qpesapay_backend::database::user_repository::{UserRepository, UserStore};
use qpesapay_backend::database::{init_pool_from_config, run_migrations};
use qpesapay_backend::health::HealthChecker;
use qpesapay_backend::logging::init_tracing;
use qpesapay_backend::middleware::auth::JwtVerifier;
use qpesapay_backend::middleware::rate_limit::RateLimiter;
use qpesapay_backend::payments::{MpesaClient, MpesaConfig, MpesaRail};
use qpesapay_backend::services::{
    FeeEstimator, FeeSchedule, OrchestratorConfig, PaymentOrchestrator, PaymentValidator,
    WebhookProcessor,
};
use qpesapay_backend::workers::{TransactionMonitorConfig, TransactionMonitorWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "cache")]
async fn idempotency_store(config: &AppConfig) -> anyhow::Result<Arc<dyn IdempotencyStore>> {
    use qpesapay_backend::cache::redis_store::RedisIdempotencyStore;
    use qpesapay_backend::cache::{init_cache_pool, RedisPoolConfig};

    let idempotency_config = IdempotencyConfig::from(&config.cache);
    match (&config.cache.redis_url, config.skip_externals) {
        (Some(url), false) => {
            info!("🔄 Initializing Redis idempotency store...");
            let pool = init_cache_pool(RedisPoolConfig::new(
                url.clone(),
                config.cache.max_connections,
            ))
            .await
            .context("Redis unreachable")?;
            info!("✅ Redis idempotency store ready");
            Ok(Arc::new(RedisIdempotencyStore::new(pool, idempotency_config)))
        }
        _ => {
            info!(
                max_entries = idempotency_config.max_entries,
                "⏭️  Using in-process idempotency store"
            );
            Ok(Arc::new(InMemoryIdempotencyStore::new(idempotency_config)))
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn idempotency_store(config: &AppConfig) -> anyhow::Result<Arc<dyn IdempotencyStore>> {
    if config.cache.redis_url.is_some() {
        warn!("REDIS_URL set but the cache feature is disabled; using in-process store");
    }
    Ok(Arc::new(InMemoryIdempotencyStore::new(
        IdempotencyConfig::from(&config.cache),
    )))
}

/// Placeholder chain rails always; M-Pesa only when its credentials are configured
fn settlement_rails() -> RailRegistry {
    let mut rails = RailRegistry::new()
        .with_rail(Arc::new(SimulatedChainRail::new(RailKind::Ethereum)))
        .with_rail(Arc::new(SimulatedChainRail::new(RailKind::Tron)))
        .with_rail(Arc::new(SimulatedChainRail::new(RailKind::Bitcoin)));

    match MpesaConfig::from_env().map_err(anyhow::Error::from).and_then(|config| {
        info!(config = ?config, "📱 Configuring M-Pesa rail");
        MpesaClient::new(config).map_err(anyhow::Error::from)
    }) {
        Ok(client) => {
            rails = rails.with_rail(Arc::new(MpesaRail::new(client)));
            info!("✅ M-Pesa rail enabled");
        }
        Err(e) => warn!(reason = %e, "⏭️  M-Pesa rail disabled"),
    }

    rails
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting QPesaPay gateway"
    );

    // Storage
    let db_pool = if config.skip_externals {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true)");
        None
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        if config.database.run_migrations {
            run_migrations(&pool).await?;
        }
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database connection pool initialized"
        );
        Some(pool)
    };

    let (transactions, users): (Arc<dyn TransactionStore>, Arc<dyn UserStore>) = match &db_pool {
        Some(pool) => (
            Arc::new(TransactionRepository::new(pool.clone())),
            Arc::new(UserRepository::new(pool.clone())),
        ),
        None => (
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryUserStore::new()),
        ),
    };

    let idempotency = idempotency_store(&config).await?;
    let rails = settlement_rails();

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        PaymentValidator::new(),
        FeeEstimator::new(FeeSchedule::from_env()),
        transactions.clone(),
        idempotency.clone(),
        rails.clone(),
        OrchestratorConfig::from_env(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(orchestrator.clone(), &config.security));
    let health_checker = HealthChecker::new(db_pool.clone(), idempotency, rails.clone());

    info!(rails = ?rails.kinds(), "✅ Payment orchestrator ready");

    // Background worker
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let monitor = TransactionMonitorWorker::new(
        orchestrator.clone(),
        transactions,
        TransactionMonitorConfig::from_env(),
    );
    let monitor_handle = tokio::spawn(monitor.run(worker_shutdown_rx));

    let app = build_router(AppServices {
        orchestrator,
        webhooks,
        users,
        verifier: Arc::new(JwtVerifier::new(&config.security.jwt_secret)),
        health_checker,
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
    });
    info!(
        rate_limit = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window.as_secs(),
        "✅ Routes configured"
    );

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .context("invalid HOST/PORT")?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
    .await
    .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(std::time::Duration::from_secs(5), monitor_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for monitor worker shutdown");
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
