//! In-platform inbox notifications (spec §4.9). Inserted synchronously in
//! the same transaction as the triggering business write; cleaned up by a
//! periodic retention job.

use chrono::Duration;
use serde_json::Value as Json;
use shepherd_core::domain::Notification;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

fn from_row(row: sqlx::postgres::PgRow) -> Result<Notification> {
    use sqlx::Row;
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        notification_type: row.try_get("notification_type")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
    })
}

pub async fn insert(
    conn: &mut PgConnection,
    recipient_id: &str,
    notification_type: &str,
    title: &str,
    body: &str,
    metadata: &Json,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO notifications (recipient_id, notification_type, title, body, metadata)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(recipient_id)
    .bind(notification_type)
    .bind(title)
    .bind(body)
    .bind(metadata)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Inserts the same notification for every recipient (e.g. all users with
/// `approval:approve` when a ticket is submitted), one row each — an inbox
/// entry is per-recipient state, not a shared broadcast row.
pub async fn insert_for_many(
    conn: &mut PgConnection,
    recipients: &[String],
    notification_type: &str,
    title: &str,
    body: &str,
    metadata: &Json,
) -> Result<()> {
    for recipient in recipients {
        insert(conn, recipient, notification_type, title, body, metadata).await?;
    }
    Ok(())
}

pub async fn list_for_recipient(
    conn: &mut PgConnection,
    recipient_id: &str,
    page: i64,
    per_page: i64,
) -> Result<Vec<Notification>> {
    let offset = page.max(0) * per_page;
    let rows = sqlx::query(
        "SELECT * FROM notifications WHERE recipient_id = $1
         ORDER BY created_at DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(recipient_id)
    .bind(per_page)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(from_row).collect()
}

pub async fn unread_count(conn: &mut PgConnection, recipient_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM notifications WHERE recipient_id = $1 AND read_at IS NULL",
    )
    .bind(recipient_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

pub async fn mark_read(conn: &mut PgConnection, recipient_id: &str, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE notifications SET read_at = now()
         WHERE id = $1 AND recipient_id = $2 AND read_at IS NULL",
    )
    .bind(id)
    .bind(recipient_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn mark_all_read(conn: &mut PgConnection, recipient_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = now() WHERE recipient_id = $1 AND read_at IS NULL",
    )
    .bind(recipient_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Spec §4.9 / testable property 10: after running cleanup with retention
/// `R`, no notification row has `created_at < now - R`.
pub async fn cleanup_older_than(conn: &mut PgConnection, retention: Duration) -> Result<u64> {
    let cutoff = chrono::Utc::now() - retention;
    let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
