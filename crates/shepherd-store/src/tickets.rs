//! Ticket CRUD and the state-machine transitions named in spec §4.5.
//! Orchestration that composes these with the event log, resource rows,
//! audit and notifications lives in [`crate::submit`] and [`crate::decide`].

use serde_json::Value as Json;
use shepherd_core::domain::{ApprovalTicket, OperationType, TicketStatus};
use snafu::OptionExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{decode_enum, InvalidTransitionSnafu, NotFoundSnafu, Result};

fn from_row(row: sqlx::postgres::PgRow) -> Result<ApprovalTicket> {
    use sqlx::Row;
    let operation_type_raw: String = row.try_get("operation_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(ApprovalTicket {
        id: row.try_get("id")?,
        operation_type: decode_enum("operation_type", &operation_type_raw)?,
        status: decode_enum("status", &status_raw)?,
        event_id: row.try_get("event_id")?,
        requester: row.try_get("requester")?,
        approver: row.try_get("approver")?,
        parent_ticket_id: row.try_get("parent_ticket_id")?,
        request_params: row.try_get("request_params")?,
        selected_cluster_id: row.try_get("selected_cluster_id")?,
        selected_storage_class: row.try_get("selected_storage_class")?,
        selected_template_version: row.try_get("selected_template_version")?,
        modified_spec: row.try_get("modified_spec")?,
        template_snapshot: row.try_get("template_snapshot")?,
        instance_size_snapshot: row.try_get("instance_size_snapshot")?,
        rejection_reason: row.try_get("rejection_reason")?,
        batch_total: row.try_get("batch_total")?,
        batch_success: row.try_get("batch_success")?,
        batch_failed: row.try_get("batch_failed")?,
        batch_pending: row.try_get("batch_pending")?,
        batch_cancelled: row.try_get("batch_cancelled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Spec invariant 8 / property 4: a user has a pending ticket of the same
/// (resource, operation_type) at most once. This is the pre-insert
/// application-level check; the partial unique index in the migration is
/// the concurrency-safe backstop (spec §5).
pub async fn find_duplicate_pending(
    conn: &mut PgConnection,
    requester: &str,
    resource_type: &str,
    resource_id: Option<Uuid>,
    operation_type: OperationType,
) -> Result<Option<Uuid>> {
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM approval_tickets
         WHERE requester = $1 AND resource_type = $2 AND resource_id IS NOT DISTINCT FROM $3
           AND operation_type = $4 AND status = 'PENDING'",
    )
    .bind(requester)
    .bind(resource_type)
    .bind(resource_id)
    .bind(operation_type.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(existing)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_pending(
    conn: &mut PgConnection,
    operation_type: OperationType,
    event_id: Uuid,
    requester: &str,
    resource_type: &str,
    resource_id: Option<Uuid>,
    request_params: &Json,
    parent_ticket_id: Option<Uuid>,
) -> Result<ApprovalTicket> {
    let row = sqlx::query(
        "INSERT INTO approval_tickets
            (operation_type, status, event_id, requester, resource_type, resource_id,
             request_params, parent_ticket_id)
         VALUES ($1, 'PENDING', $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(operation_type.to_string())
    .bind(event_id)
    .bind(requester)
    .bind(resource_type)
    .bind(resource_id)
    .bind(request_params)
    .bind(parent_ticket_id)
    .fetch_one(&mut *conn)
    .await?;
    from_row(row)
}

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<ApprovalTicket> {
    let row = sqlx::query("SELECT * FROM approval_tickets WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("ticket {id}"),
        })?;
    from_row(row)
}

/// Looks up the ticket bound to `event_id` — the worker's claim-check
/// re-fetch of admin-bound fields (cluster, storage class, `modified_spec`,
/// snapshots), named in spec §4.7 step 4.
pub async fn get_by_event(conn: &mut PgConnection, event_id: Uuid) -> Result<ApprovalTicket> {
    let row = sqlx::query("SELECT * FROM approval_tickets WHERE event_id = $1")
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("ticket for event {event_id}"),
        })?;
    from_row(row)
}

pub async fn list_children(conn: &mut PgConnection, parent_ticket_id: Uuid) -> Result<Vec<ApprovalTicket>> {
    let rows = sqlx::query("SELECT * FROM approval_tickets WHERE parent_ticket_id = $1 ORDER BY created_at")
        .bind(parent_ticket_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(from_row).collect()
}

/// Approves a non-batch ticket, recording the admin-bound fields and
/// snapshots. Only succeeds when the ticket is still `PENDING`
/// (spec §4.5 "guarded transitions").
#[allow(clippy::too_many_arguments)]
pub async fn mark_approved(
    conn: &mut PgConnection,
    id: Uuid,
    approver: &str,
    selected_cluster_id: Option<Uuid>,
    selected_storage_class: Option<&str>,
    selected_template_version: Option<&str>,
    modified_spec: &Json,
    template_snapshot: Option<&Json>,
    instance_size_snapshot: Option<&Json>,
) -> Result<ApprovalTicket> {
    let row = sqlx::query(
        "UPDATE approval_tickets SET
            status = 'APPROVED',
            approver = $2,
            selected_cluster_id = $3,
            selected_storage_class = $4,
            selected_template_version = $5,
            modified_spec = $6,
            template_snapshot = $7,
            instance_size_snapshot = $8,
            updated_at = now()
         WHERE id = $1 AND status = 'PENDING'
         RETURNING *",
    )
    .bind(id)
    .bind(approver)
    .bind(selected_cluster_id)
    .bind(selected_storage_class)
    .bind(selected_template_version)
    .bind(modified_spec)
    .bind(template_snapshot)
    .bind(instance_size_snapshot)
    .fetch_optional(&mut *conn)
    .await?
    .context(InvalidTransitionSnafu { ticket_id: id })?;
    from_row(row)
}

pub async fn mark_rejected(conn: &mut PgConnection, id: Uuid, approver: &str, reason: &str) -> Result<ApprovalTicket> {
    let row = sqlx::query(
        "UPDATE approval_tickets SET status = 'REJECTED', approver = $2, rejection_reason = $3, updated_at = now()
         WHERE id = $1 AND status = 'PENDING'
         RETURNING *",
    )
    .bind(id)
    .bind(approver)
    .bind(reason)
    .fetch_optional(&mut *conn)
    .await?
    .context(InvalidTransitionSnafu { ticket_id: id })?;
    from_row(row)
}

/// Spec §4.7 step 2: best-effort, failure logged but not fatal — callers
/// should not propagate an error from this call as a worker failure.
pub async fn mark_executing(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE approval_tickets SET status = 'EXECUTING', updated_at = now() WHERE id = $1 AND status = 'APPROVED'")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_status(conn: &mut PgConnection, id: Uuid, status: TicketStatus) -> Result<()> {
    sqlx::query("UPDATE approval_tickets SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status.to_string())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Child-completion bump of one parent counter, under the row lock taken by
/// this very `UPDATE` (SPEC_FULL.md §9.3 — no separate lock table).
pub enum BatchOutcome {
    Success,
    Failed,
    Cancelled,
}

pub async fn bump_batch_counter(
    conn: &mut PgConnection,
    parent_ticket_id: Uuid,
    outcome: BatchOutcome,
) -> Result<ApprovalTicket> {
    let column = match outcome {
        BatchOutcome::Success => "batch_success",
        BatchOutcome::Failed => "batch_failed",
        BatchOutcome::Cancelled => "batch_cancelled",
    };
    let sql = format!(
        "UPDATE approval_tickets SET {column} = {column} + 1, batch_pending = batch_pending - 1, updated_at = now()
         WHERE id = $1
         RETURNING *"
    );
    let row = sqlx::query(&sql)
        .bind(parent_ticket_id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("batch parent ticket {parent_ticket_id}"),
        })?;
    from_row(row)
}
