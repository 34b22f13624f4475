use sqlx::{PgPool, postgres::PgPoolOptions};
use crate::config::Config;
use crate::error::EngineError;

pub type DbPool = PgPool;

pub async fn create_pool(config: &Config) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn health_check(pool: &DbPool) -> Result<(), EngineError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(EngineError::from)?;
    Ok(())
}
