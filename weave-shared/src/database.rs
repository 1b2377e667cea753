//! # Database Pool & Migrations
//!
//! Pool construction from configuration and the embedded migrator used by
//! both the server bootstrap and `#[sqlx::test]` suites.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::error::{WeaveError, WeaveResult};

/// Embedded migrations for the core schema
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Build a connection pool from configuration
pub async fn connect(config: &DatabaseConfig) -> WeaveResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(|e| WeaveError::Database(format!("failed to connect to database: {e}")))
}

/// Run pending migrations against a pool
pub async fn migrate(pool: &PgPool) -> WeaveResult<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| WeaveError::Database(format!("migration failed: {e}")))
}
