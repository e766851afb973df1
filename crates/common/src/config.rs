use std::str::FromStr;

use serde::Deserialize;

use crate::error::AppError;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// JSON-RPC endpoint of the chain being mirrored
    pub rpc_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Delay between polls once the indexer has caught up with the chain head
    pub indexer_poll_interval_ms: u64,

    /// First block to scan when no indexer state exists yet (default: chain head)
    pub indexer_start_block: Option<u64>,

    /// Number of blocks requested per `eth_getLogs` call
    pub indexer_batch_blocks: u64,

    /// Number of contract partitions dispatched concurrently
    pub indexer_workers: usize,

    /// Attempts made on retryable failures before a record is dead-lettered
    pub indexer_max_retries: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Self {
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            database_url: std::env::var("DATABASE_URL").map_err(|_| {
                AppError::Config("DATABASE_URL environment variable is required".to_string())
            })?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            indexer_poll_interval_ms: parse_var("INDEXER_POLL_INTERVAL_MS", 2000)?,
            indexer_start_block: parse_optional_var("INDEXER_START_BLOCK")?,
            indexer_batch_blocks: parse_var("INDEXER_BATCH_BLOCKS", 500)?,
            indexer_workers: parse_var("INDEXER_WORKERS", 8)?,
            indexer_max_retries: parse_var("INDEXER_MAX_RETRIES", 3)?,
        };

        if config.indexer_batch_blocks == 0 {
            return Err(AppError::Config(
                "INDEXER_BATCH_BLOCKS must be greater than zero".to_string(),
            ));
        }
        if config.indexer_workers == 0 {
            return Err(AppError::Config(
                "INDEXER_WORKERS must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    Ok(parse_optional_var(name)?.unwrap_or(default))
}

fn parse_optional_var<T: FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::Config(format!(
                "{name} must be a valid {}",
                std::any::type_name::<T>()
            ))
        }),
        Err(_) => Ok(None),
    }
}
