//! The Postgres-backed queue operations (spec §4.6, §5). Jobs are durably
//! stored and visible to workers only after the enclosing transaction
//! commits; claiming uses `SELECT ... FOR UPDATE SKIP LOCKED` so that
//! concurrent worker tasks never contend for the same row — the standard
//! Postgres-as-queue claim idiom.
//!
//! Every function here takes `&mut sqlx::PgConnection`, the same convention
//! `shepherd-store` uses, so a caller can insert a queue job in the very
//! transaction that wrote the ticket/event it depends on (spec invariant 3)
//! without this crate depending on `shepherd-store` or vice versa.

use serde_json::Value as Json;
use snafu::ResultExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::backoff::delay_for_attempt;
use crate::error::{MalformedArgsSnafu, NotFoundSnafu, Result};
use crate::job::{JobKind, QueueJob};

fn from_row(row: sqlx::postgres::PgRow) -> Result<QueueJob> {
    use sqlx::Row;
    let kind_raw: String = row.try_get("kind")?;
    let state_raw: String = row.try_get("state")?;
    Ok(QueueJob {
        id: row.try_get("id")?,
        kind: kind_raw
            .parse()
            .map_err(|_| crate::error::Error::MalformedArgs {
                message: format!("unrecognized job kind {kind_raw:?}"),
            })?,
        args: row.try_get("args")?,
        queue_name: row.try_get("queue_name")?,
        attempt: row.try_get("attempt")?,
        max_attempts: row.try_get("max_attempts")?,
        state: state_raw.parse().context(MalformedArgsSnafu {
            message: format!("unrecognized job state {state_raw:?}"),
        })?,
        scheduled_at: row.try_get("scheduled_at")?,
        last_error: row.try_get("last_error")?,
    })
}

/// Looks up a still-pending duplicate by its uniqueness key.
async fn find_existing(conn: &mut PgConnection, kind: JobKind, args: &Json) -> Result<Option<Uuid>> {
    let id: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM queue_jobs
         WHERE kind = $1 AND args = $2 AND queue_name = $3 AND state IN ('QUEUED', 'RUNNING')",
    )
    .bind(kind.to_string())
    .bind(args)
    .bind(kind.queue_name())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Inserts a job, within the caller's transaction, collapsing accidental
/// duplicates onto the `(kind, args, queue)` uniqueness key (spec §4.6).
/// Returns the id of the row that now represents this logical job — either
/// the newly inserted one or the pre-existing queued/running duplicate.
pub async fn insert(conn: &mut PgConnection, kind: JobKind, args: &Json) -> Result<Uuid> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        "INSERT INTO queue_jobs (kind, args, queue_name, max_attempts, state)
         VALUES ($1, $2, $3, $4, 'QUEUED')
         ON CONFLICT (kind, args, queue_name) WHERE state IN ('QUEUED', 'RUNNING') DO NOTHING
         RETURNING id",
    )
    .bind(kind.to_string())
    .bind(args)
    .bind(kind.queue_name())
    .bind(kind.max_attempts())
    .fetch_optional(&mut *conn)
    .await?;

    match inserted {
        Some(id) => Ok(id),
        None => find_existing(conn, kind, args)
            .await?
            .ok_or_else(|| crate::error::Error::MalformedArgs {
                message: "insert collided but no existing duplicate was found".to_string(),
            }),
    }
}

/// Claims up to `limit` queued, due jobs on `queue_name` for this worker,
/// marking them `RUNNING` and bumping `attempt`. Safe to call concurrently
/// from many worker tasks: `FOR UPDATE SKIP LOCKED` guarantees disjoint
/// claims. Runs as a single atomic statement directly against the pool —
/// no explicit transaction needed.
pub async fn claim_next(conn: &mut PgConnection, queue_name: &str, limit: i64) -> Result<Vec<QueueJob>> {
    let rows = sqlx::query(
        "UPDATE queue_jobs SET state = 'RUNNING', attempt = attempt + 1, updated_at = now()
         WHERE id IN (
             SELECT id FROM queue_jobs
             WHERE queue_name = $1 AND state = 'QUEUED' AND scheduled_at <= now()
             ORDER BY scheduled_at
             LIMIT $2
             FOR UPDATE SKIP LOCKED
         )
         RETURNING *",
    )
    .bind(queue_name)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(from_row).collect()
}

pub async fn complete(conn: &mut PgConnection, job_id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE queue_jobs SET state = 'SUCCEEDED', updated_at = now() WHERE id = $1")
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return NotFoundSnafu { job_id }.fail();
    }
    Ok(())
}

/// Transient failure: retry if attempts remain, otherwise land in `FAILED`
/// (spec §4.6 "a job exhausting max attempts lands in FAILED").
pub async fn fail_retryable(conn: &mut PgConnection, job: &QueueJob, message: &str) -> Result<()> {
    if job.attempt >= job.max_attempts {
        sqlx::query("UPDATE queue_jobs SET state = 'FAILED', last_error = $2, updated_at = now() WHERE id = $1")
            .bind(job.id)
            .bind(message)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    }

    let scheduled_at = chrono::Utc::now() + delay_for_attempt(job.attempt);
    sqlx::query(
        "UPDATE queue_jobs SET state = 'QUEUED', scheduled_at = $2, last_error = $3, updated_at = now()
         WHERE id = $1",
    )
    .bind(job.id)
    .bind(scheduled_at)
    .bind(message)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Deterministic, non-retryable cancellation (spec §4.6: malformed input,
/// precondition violated by data corruption).
pub async fn cancel(conn: &mut PgConnection, job_id: Uuid, message: &str) -> Result<()> {
    sqlx::query("UPDATE queue_jobs SET state = 'CANCELLED', last_error = $2, updated_at = now() WHERE id = $1")
        .bind(job_id)
        .bind(message)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Re-inserts a periodic maintenance job only if its `min_reinsert_interval`
/// has elapsed since the last row of that kind, regardless of that row's
/// terminal state (spec §4.6).
pub async fn insert_periodic(conn: &mut PgConnection, kind: JobKind) -> Result<Option<Uuid>> {
    let Some(interval) = kind.min_reinsert_interval() else {
        return Ok(None);
    };

    let last_scheduled: Option<chrono::DateTime<chrono::Utc>> = sqlx::query_scalar(
        "SELECT created_at FROM queue_jobs WHERE kind = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(kind.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(last) = last_scheduled {
        if chrono::Utc::now() - last < interval {
            return Ok(None);
        }
    }

    let id = insert(conn, kind, &serde_json::json!({})).await?;
    Ok(Some(id))
}
