//! First-use enforcement for VNC access tokens (spec §4.10): a token is
//! single-use, enforced by recording consumed `jti`s rather than trusting
//! client-side state.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

/// Records `jti` as consumed. Returns `false` (without inserting) if the
/// token has already been used — callers must treat that as a denied,
/// audited replay attempt.
pub async fn try_consume(conn: &mut PgConnection, jti: Uuid, vm_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO vnc_token_uses (jti, vm_id) VALUES ($1, $2)
         ON CONFLICT (jti) DO NOTHING",
    )
    .bind(jti)
    .bind(vm_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
