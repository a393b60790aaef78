use std::time::Duration;

use migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::{config::AppConfig, errors::ServiceError};

pub type DbPool = DatabaseConnection;

/// Open a connection pool with the service's standard options.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(database_url.to_owned());
    opts.max_connections(20)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true);

    let pool = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(!cfg.is_production());

    let pool = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(pool)
}

/// Bring the schema up to date. The unique indexes created here back the
/// settlement idempotency guarantees; skipping migrations is not an option.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    Migrator::up(pool, None).await?;
    info!("Database migrations applied");
    Ok(())
}
