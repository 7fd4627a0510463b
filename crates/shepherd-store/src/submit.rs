//! The "submit" half of spec §4.5: inside one transaction, guard against a
//! duplicate pending ticket, insert the event, insert the ticket, append
//! audit, and notify every approver. No queue job is inserted here — none
//! exists until a human approves (spec §2 data flow).

use serde_json::Value as Json;
use shepherd_core::domain::{audit_actions, OperationType};
use shepherd_core::rbac::CAP_APPROVAL_APPROVE;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{DuplicatePendingRequestSnafu, Result};
use crate::{audit, events, notifications, rbac_store, tickets};

pub struct SubmitInput<'a> {
    pub operation_type: OperationType,
    pub aggregate_type: &'a str,
    pub aggregate_id: Uuid,
    pub requester: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<Uuid>,
    pub payload: &'a Json,
    pub request_params: &'a Json,
    pub environment: &'a str,
    pub audit_action: &'a str,
}

pub struct SubmitOutcome {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
}

/// Shared body for every non-batch submission (CREATE, DELETE, POWER, VNC).
pub async fn submit(conn: &mut PgConnection, input: SubmitInput<'_>) -> Result<SubmitOutcome> {
    if let Some(existing_ticket_id) = tickets::find_duplicate_pending(
        conn,
        input.requester,
        input.resource_type,
        input.resource_id,
        input.operation_type,
    )
    .await?
    {
        return DuplicatePendingRequestSnafu { existing_ticket_id }.fail();
    }

    let event = events::insert(
        conn,
        input.operation_type,
        input.aggregate_type,
        input.aggregate_id,
        input.payload,
    )
    .await?;

    let ticket = tickets::insert_pending(
        conn,
        input.operation_type,
        event.id,
        input.requester,
        input.resource_type,
        input.resource_id,
        input.request_params,
        None,
    )
    .await?;

    audit::record(
        conn,
        input.audit_action,
        input.requester,
        input.resource_type,
        input.resource_id.unwrap_or(input.aggregate_id),
        None,
        None,
        input.environment,
        &Json::Null,
    )
    .await?;

    let approvers = rbac_store::subjects_with_capability(conn, CAP_APPROVAL_APPROVE).await?;
    notifications::insert_for_many(
        conn,
        &approvers,
        "APPROVAL_REQUESTED",
        &format!("New {} request from {}", input.operation_type, input.requester),
        &format!("Ticket {} is awaiting your decision.", ticket.id),
        &Json::Null,
    )
    .await?;

    Ok(SubmitOutcome {
        ticket_id: ticket.id,
        event_id: event.id,
    })
}

/// Convenience action-name default for a create submission (spec §4.9).
pub fn default_create_audit_action() -> &'static str {
    audit_actions::VM_REQUEST
}
