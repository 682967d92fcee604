use std::time::Duration;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Builds the pool and blocks until the database answers, retrying once a
/// second up to `connect_retries` times.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_lazy(&config.url)
        .context("invalid database url")?;
    wait_for_database(&pool, config.connect_retries).await?;
    Ok(pool)
}

async fn wait_for_database(pool: &PgPool, retries: u32) -> anyhow::Result<()> {
    let attempts = retries.max(1);
    for attempt in 1..=attempts {
        match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => {
                info!(attempt, "database is reachable");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "database not ready, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                return Err(e).context(format!("database unreachable after {attempts} attempts"));
            }
        }
    }
    Ok(())
}

pub async fn close(pool: PgPool) {
    pool.close().await;
    info!("database pool closed");
}
