use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use chainwatch_subscriptions::config::Config;
use chainwatch_subscriptions::db::repository::PgSubscriptionStore;
use chainwatch_subscriptions::rpc::resolver::ConfigChainResolver;
use chainwatch_subscriptions::service::SubscriptionService;
use chainwatch_subscriptions::watcher::batch::BatchDeps;
use chainwatch_subscriptions::watcher::transport::WsLogTransport;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Set RUST_LOG=debug for per-log routing output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("ChainWatch subscription engine starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        chains = config.chains.len(),
        max_addresses_per_batch = config.subscriptions.max_addresses_per_batch,
        "Configuration loaded from {}",
        config_path
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    let resolver = ConfigChainResolver::new(&config.chains);
    for chain in &config.chains {
        if chain.rpc_ws.is_none() {
            tracing::warn!(chain = %chain.name, "No rpc_ws configured, chain will not be watched");
        }
        if chain.rpc_http.is_none() {
            tracing::warn!(chain = %chain.name, "No rpc_http configured, balance updates will fail");
        }
    }

    let deps = BatchDeps {
        store: Arc::new(PgSubscriptionStore::new(pool.clone())),
        transport: Arc::new(WsLogTransport),
        resolver: Arc::new(resolver),
        settings: config.subscriptions.clone(),
    };

    let chain_ids: Vec<u64> = config.chains.iter().map(|c| c.chain_id).collect();
    let service = Arc::new(SubscriptionService::boot(&chain_ids, deps).await?);

    let batches = service.statuses().await;
    tracing::info!(
        batches = batches.len(),
        subscriptions = batches.iter().map(|b| b.subscription_count).sum::<usize>(),
        "Subscription batches started. Press Ctrl+C to stop."
    );

    if config.api.enabled {
        let api_service = service.clone();
        let host = config.api.host.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = chainwatch_subscriptions::api::serve(api_service, &host, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping subscription batches...");

    service.shutdown().await;
    pool.close().await;

    tracing::info!("ChainWatch subscription engine stopped gracefully");
    Ok(())
}
