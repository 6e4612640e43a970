/// SQLite connection setup
///
/// One database file (`<data_dir>/flowgate.db`) holds both the workflow and
/// the webhook tables.

use crate::{config::DatabaseConfig, webhooks::SqliteWebhookStore, workflow::storage::SqliteWorkflowStorage};
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open (creating if needed) the database and initialize every schema
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let data_dir = Path::new(&config.data_dir);
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir.display(), e))?;
    let db_path = data_dir.join("flowgate.db");

    tracing::info!("🗄️ Opening database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    init_schemas(&pool).await?;
    Ok(pool)
}

/// Private in-memory database, for tests and throwaway instances
///
/// Pinned to a single connection that never expires, since every new
/// connection to `sqlite::memory:` would see an empty database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_schemas(&pool).await?;
    Ok(pool)
}

async fn init_schemas(pool: &SqlitePool) -> Result<()> {
    SqliteWorkflowStorage::new(pool.clone()).init_schema().await?;
    SqliteWebhookStore::new(pool.clone()).init_schema().await?;
    Ok(())
}
