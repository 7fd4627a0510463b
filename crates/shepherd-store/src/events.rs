//! The domain event log (spec §4.4): append-only, `payload` immutable
//! post-insert, only `status` ever updated.

use serde_json::Value as Json;
use shepherd_core::domain::{DomainEvent, EventStatus, OperationType};
use snafu::OptionExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{decode_enum, NotFoundSnafu, Result};

fn from_row(row: sqlx::postgres::PgRow) -> Result<DomainEvent> {
    use sqlx::Row;
    let event_type_raw: String = row.try_get("event_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(DomainEvent {
        id: row.try_get("id")?,
        event_type: decode_enum("event_type", &event_type_raw)?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        payload: row.try_get("payload")?,
        status: decode_enum("status", &status_raw)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Inserts the event at `PENDING`. The payload captured here is the
/// authoritative request body and is never mutated again (invariant 2).
pub async fn insert(
    conn: &mut PgConnection,
    event_type: OperationType,
    aggregate_type: &str,
    aggregate_id: Uuid,
    payload: &Json,
) -> Result<DomainEvent> {
    let row = sqlx::query(
        "INSERT INTO domain_events (event_type, aggregate_type, aggregate_id, payload, status)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(event_type.to_string())
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(payload)
    .bind(EventStatus::Pending.to_string())
    .fetch_one(&mut *conn)
    .await?;
    from_row(row)
}

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<DomainEvent> {
    let row = sqlx::query("SELECT * FROM domain_events WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("domain event {id}"),
        })?;
    from_row(row)
}

/// Updates `status` only, per spec §4.4: the column is the sole mutable
/// field after insert.
pub async fn set_status(conn: &mut PgConnection, id: Uuid, status: EventStatus) -> Result<()> {
    sqlx::query("UPDATE domain_events SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status.to_string())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
