//! Append-only audit records (spec §4.9).

use serde_json::Value as Json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

#[allow(clippy::too_many_arguments)]
pub async fn record(
    conn: &mut PgConnection,
    action: &str,
    actor_id: &str,
    resource_type: &str,
    resource_id: Uuid,
    parent_type: Option<&str>,
    parent_id: Option<Uuid>,
    environment: &str,
    details: &Json,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO audit_records
            (action, actor_id, resource_type, resource_id, parent_type, parent_id, environment, details)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id",
    )
    .bind(action)
    .bind(actor_id)
    .bind(resource_type)
    .bind(resource_id)
    .bind(parent_type)
    .bind(parent_id)
    .bind(environment)
    .bind(details)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}
