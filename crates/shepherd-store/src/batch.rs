//! The batch orchestrator (spec §4.8): one parent ticket plus N child
//! tickets inserted in a single transaction. Batch delete is disallowed in
//! V1 — this module only accepts `BatchChild` operations that carry their
//! own confirmation-free semantics (power operations today).

use serde_json::Value as Json;
use shepherd_core::domain::{audit_actions, ApprovalTicket, OperationType, TicketStatus};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;
use crate::{audit, events, notifications, tickets};

pub struct BatchChildSpec<'a> {
    pub aggregate_type: &'a str,
    pub aggregate_id: Uuid,
    pub resource_type: &'a str,
    pub resource_id: Uuid,
    pub payload: Json,
    pub request_params: Json,
}

pub struct BatchSubmitInput<'a> {
    pub requester: &'a str,
    pub environment: &'a str,
    pub children: Vec<BatchChildSpec<'a>>,
}

pub struct BatchSubmitOutcome {
    pub parent_ticket_id: Uuid,
    pub child_ticket_ids: Vec<Uuid>,
}

/// The counts [`shepherd_core::throttle::check`] needs, gathered inside the
/// same transaction the submission itself will run in (spec §4.8's two-layer
/// throttle: global pending parents, per-user pending parents/children, and
/// per-user cooldown since the last batch submission).
pub async fn throttle_counts(conn: &mut PgConnection, requester: &str) -> Result<shepherd_core::throttle::BatchThrottleCounts> {
    let global_pending_parents: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM approval_tickets WHERE operation_type = 'BATCH_PARENT' AND status = 'PENDING'",
    )
    .fetch_one(&mut *conn)
    .await?;

    let user_pending_parents: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM approval_tickets
         WHERE operation_type = 'BATCH_PARENT' AND status = 'PENDING' AND requester = $1",
    )
    .bind(requester)
    .fetch_one(&mut *conn)
    .await?;

    let user_pending_children: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM approval_tickets
         WHERE operation_type = 'BATCH_CHILD' AND status = 'PENDING' AND requester = $1",
    )
    .bind(requester)
    .fetch_one(&mut *conn)
    .await?;

    let user_last_batch_submitted_at: Option<chrono::DateTime<chrono::Utc>> = sqlx::query_scalar(
        "SELECT max(created_at) FROM approval_tickets WHERE operation_type = 'BATCH_PARENT' AND requester = $1",
    )
    .bind(requester)
    .fetch_one(&mut *conn)
    .await?;

    Ok(shepherd_core::throttle::BatchThrottleCounts {
        global_pending_parents,
        user_pending_parents,
        user_pending_children,
        user_last_batch_submitted_at,
    })
}

pub async fn submit_batch(conn: &mut PgConnection, input: BatchSubmitInput<'_>) -> Result<BatchSubmitOutcome> {
    let total = input.children.len() as i32;

    let parent_event = events::insert(
        conn,
        OperationType::BatchParent,
        "batch",
        Uuid::new_v4(),
        &Json::Null,
    )
    .await?;

    let parent = tickets::insert_pending(
        conn,
        OperationType::BatchParent,
        parent_event.id,
        input.requester,
        "batch",
        None,
        &Json::Null,
        None,
    )
    .await?;

    sqlx::query("UPDATE approval_tickets SET batch_total = $1, batch_pending = $1 WHERE id = $2")
        .bind(total)
        .bind(parent.id)
        .execute(&mut *conn)
        .await?;

    let mut child_ticket_ids = Vec::with_capacity(input.children.len());
    for child in input.children {
        let event = events::insert(
            conn,
            OperationType::BatchChild,
            child.aggregate_type,
            child.aggregate_id,
            &child.payload,
        )
        .await?;

        let ticket = tickets::insert_pending(
            conn,
            OperationType::BatchChild,
            event.id,
            input.requester,
            child.resource_type,
            Some(child.resource_id),
            &child.request_params,
            Some(parent.id),
        )
        .await?;
        child_ticket_ids.push(ticket.id);
    }

    audit::record(
        conn,
        audit_actions::VM_REQUEST,
        input.requester,
        "batch",
        parent.id,
        None,
        None,
        input.environment,
        &serde_json::json!({ "child_count": total }),
    )
    .await?;

    notifications::insert(
        conn,
        input.requester,
        "BATCH_SUBMITTED",
        "Batch request submitted",
        &format!("Batch {} with {total} operations is awaiting approval.", parent.id),
        &Json::Null,
    )
    .await?;

    Ok(BatchSubmitOutcome {
        parent_ticket_id: parent.id,
        child_ticket_ids,
    })
}

/// Bumps the parent's counters for one settled child and recomputes the
/// parent's terminal status if every child has now settled (spec §4.8,
/// SPEC_FULL.md §9.3). Must be called from within the child's own
/// completion transaction.
pub async fn settle_child(
    conn: &mut PgConnection,
    parent_ticket_id: Uuid,
    outcome: tickets::BatchOutcome,
) -> Result<ApprovalTicket> {
    let parent = tickets::bump_batch_counter(conn, parent_ticket_id, outcome).await?;
    if let Some(terminal) = parent.recompute_batch_status() {
        tickets::set_status(conn, parent.id, terminal).await?;
        return tickets::get(conn, parent.id).await;
    }
    Ok(parent)
}

/// A child is eligible for retry/cancel only while the parent has not yet
/// reached a terminal aggregate state and the child itself is not already
/// settled.
pub fn child_is_retryable(child: &ApprovalTicket) -> bool {
    matches!(child.status, TicketStatus::Failed)
}
