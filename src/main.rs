use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use stkpay::api::{self, AppState};
use stkpay::config::Config;
use stkpay::database::{InMemoryTransactionStore, TransactionStore};
use stkpay::payments::providers::{MpesaEnvironment, MpesaGateway, SimulatedGateway};
use stkpay::payments::PaymentGateway;
use stkpay::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    telemetry::init_tracing();

    let config = Config::from_env()?;

    info!("Starting STK push checkout backend");
    info!("Environment: {}", config.server.environment);
    info!("M-Pesa environment: {}", config.mpesa.environment);
    info!("Account reference: {}", config.mpesa.account_reference);

    let store = build_store(&config).await?;
    let gateway = build_gateway(&config).await?;

    let state = AppState::new(
        config.server.environment.clone(),
        store,
        gateway,
        &config.mpesa.account_reference,
        config.mpesa.callback_secret.clone(),
    );
    if config.mpesa.callback_secret.is_none() {
        warn!("MPESA_CALLBACK_SECRET not set, callbacks are accepted unsigned");
    }

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("HOST and PORT must form a valid socket address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(feature = "database")]
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn TransactionStore>> {
    use stkpay::database::{init_pool, run_migrations, transaction_repository::TransactionRepository, PoolConfig};

    let Some(url) = &config.database.url else {
        warn!("DATABASE_URL not set, transactions are kept in memory only");
        return Ok(Arc::new(InMemoryTransactionStore::new()));
    };

    let defaults = PoolConfig::default();
    let pool_config = PoolConfig {
        max_connections: config.database.max_connections,
        min_connections: defaults.min_connections.min(config.database.max_connections),
        ..defaults
    };
    let pool = init_pool(url, Some(pool_config)).await?;
    run_migrations(&pool).await?;

    Ok(Arc::new(TransactionRepository::new(pool)))
}

#[cfg(not(feature = "database"))]
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn TransactionStore>> {
    if config.database.url.is_some() {
        warn!("DATABASE_URL ignored: built without the `database` feature");
    }
    Ok(Arc::new(InMemoryTransactionStore::new()))
}

async fn build_gateway(config: &Config) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    if config.mpesa.environment == MpesaEnvironment::Simulated {
        warn!("Using the simulated M-Pesa gateway, no real payments will be made");
        return Ok(Arc::new(SimulatedGateway::new()));
    }

    let gateway = MpesaGateway::new(config.mpesa.clone())?;
    Ok(Arc::new(share_tokens(gateway, config).await))
}

#[cfg(feature = "cache")]
async fn share_tokens(gateway: MpesaGateway, config: &Config) -> MpesaGateway {
    use stkpay::cache::{init_cache_pool, CacheConfig, RedisTokenCache};

    let Some(redis_url) = &config.redis.url else {
        return gateway;
    };

    let cache_config = CacheConfig {
        redis_url: redis_url.clone(),
        ..Default::default()
    };
    match init_cache_pool(cache_config).await {
        Ok(pool) => {
            info!("Sharing M-Pesa access tokens through Redis");
            gateway.with_shared_token_cache(Arc::new(RedisTokenCache::new(pool)))
        }
        Err(e) => {
            warn!("Redis unavailable, tokens cached per instance: {}", e);
            gateway
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn share_tokens(gateway: MpesaGateway, config: &Config) -> MpesaGateway {
    if config.redis.url.is_some() {
        warn!("REDIS_URL ignored: built without the `cache` feature");
    }
    gateway
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received");
}
