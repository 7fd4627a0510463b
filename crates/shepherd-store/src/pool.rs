//! Pool construction and migration bootstrap: a connection pool is built
//! once at startup and handed out as cheap clones to every component.

use snafu::ResultExt;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{MigrationSnafu, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens a connection pool against `database_url` and applies any pending
/// migrations. Called once from `shepherd-cli` at startup.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    MIGRATOR.run(&pool).await.context(MigrationSnafu)?;
    tracing::info!(max_connections, "connected to postgres and applied migrations");

    Ok(pool)
}
