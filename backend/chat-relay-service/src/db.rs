use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_create_messages",
    include_str!("../migrations/0001_create_messages.sql"),
)];

const POOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a deadpool-postgres pool. Does not connect; connection failures
/// surface on first use so the relay can start while the database is down.
pub fn init_pool(config: &DatabaseConfig) -> AppResult<Pool> {
    debug!(max = config.max_connections, "Creating database pool");

    let pg_config: PgConfig = config
        .url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(POOL_TIMEOUT))
        .create_timeout(Some(POOL_TIMEOUT))
        .recycle_timeout(Some(POOL_TIMEOUT))
        .build()
        .map_err(|e| AppError::Config(format!("database pool: {e}")))
}

/// Apply the bundled schema. Every statement is idempotent.
pub async fn migrate(pool: &Pool) -> AppResult<()> {
    let client = pool.get().await?;
    for (name, sql) in MIGRATIONS {
        client.batch_execute(sql).await?;
        debug!(migration = name, "applied migration");
    }
    info!(count = MIGRATIONS.len(), "database schema ready");
    Ok(())
}
