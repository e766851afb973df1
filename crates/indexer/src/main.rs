use std::sync::Arc;

use mirror_common::config::AppConfig;
use mirror_common::db;
use mirror_decoders::EventRegistry;
use mirror_engine::{Dispatcher, PartitionedDispatcher, PgStore};
use mirror_indexer::poller::BlockPoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mirror_indexer=info,mirror_engine=info,mirror_decoders=debug".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Contract mirror indexer starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // A registry that cannot be built means the bundled ABIs are broken.
    let registry = Arc::new(EventRegistry::build()?);

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let dispatcher = PartitionedDispatcher::new(
        Dispatcher::new(registry, store),
        config.indexer_workers,
    );
    let poller = BlockPoller::new(&config, pool, dispatcher);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = poller.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Block poller exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Contract mirror indexer stopped.");
    Ok(())
}
