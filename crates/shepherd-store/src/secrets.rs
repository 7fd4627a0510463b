//! Auto-generated, DB-persisted secrets (spec §6: "env vars → DB-generated
//! (secrets; config file never sources secrets). Missing secrets are
//! auto-generated (32-byte CSPRNG) and persisted."). `shepherd-cli` calls
//! [`get_or_generate`] once per named secret (`SESSION_SECRET`,
//! `ENCRYPTION_KEY`) at startup, preferring an environment variable when one
//! is set and falling back to whatever is already stored, generating and
//! persisting a fresh value only the first time a name is seen.

use rand::RngCore;
use sqlx::PgConnection;

use crate::error::Result;

const SECRET_LEN: usize = 32;

/// Returns the named secret's bytes, generating and persisting a fresh
/// 32-byte CSPRNG value the first time `name` is seen. Concurrent first-run
/// races are resolved by `ON CONFLICT DO NOTHING` plus a re-read, so every
/// caller converges on the same winning value.
pub async fn get_or_generate(conn: &mut PgConnection, name: &str) -> Result<Vec<u8>> {
    if let Some(existing) = read(conn, name).await? {
        return Ok(existing);
    }

    let mut generated = vec![0_u8; SECRET_LEN];
    rand::rng().fill_bytes(&mut generated);

    sqlx::query("INSERT INTO system_secrets (name, value) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .bind(&generated)
        .execute(&mut *conn)
        .await?;

    // Re-read rather than trust `generated`: another process may have won
    // the insert race between our read and our insert.
    read(conn, name)
        .await?
        .ok_or_else(|| crate::error::Error::NotFound { what: format!("secret {name}") })
}

async fn read(conn: &mut PgConnection, name: &str) -> Result<Option<Vec<u8>>> {
    let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM system_secrets WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}
