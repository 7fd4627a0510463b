//! The "decide" half of spec §4.5: approve or reject, inside one
//! transaction. Approve additionally allocates the instance index, inserts
//! the VM row (create only), and leaves the caller to insert the matching
//! queue job in the same transaction (spec invariant 3).

use serde_json::Value as Json;
use shepherd_core::domain::{audit_actions, ApprovalTicket, EventStatus, Vm};
use shepherd_core::naming::compose_vm_name;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;
use crate::{audit, events, notifications, services, tickets, vms};

pub struct ApproveCreateInput<'a> {
    pub ticket_id: Uuid,
    pub approver: &'a str,
    pub requester: &'a str,
    pub selected_cluster_id: Uuid,
    pub selected_storage_class: &'a str,
    pub selected_template_version: &'a str,
    pub modified_spec: &'a Json,
    pub template_snapshot: &'a Json,
    pub instance_size_snapshot: &'a Json,
    pub service_id: Uuid,
    pub system_name: &'a str,
    pub service_name: &'a str,
    pub namespace: &'a str,
    pub environment: &'a str,
}

pub struct ApproveCreateOutcome {
    pub ticket: ApprovalTicket,
    pub vm: Vm,
}

pub async fn approve_create(conn: &mut PgConnection, input: ApproveCreateInput<'_>) -> Result<ApproveCreateOutcome> {
    let ticket = tickets::mark_approved(
        conn,
        input.ticket_id,
        input.approver,
        Some(input.selected_cluster_id),
        Some(input.selected_storage_class),
        Some(input.selected_template_version),
        input.modified_spec,
        Some(input.template_snapshot),
        Some(input.instance_size_snapshot),
    )
    .await?;

    events::set_status(conn, ticket.event_id, EventStatus::Processing).await?;

    let index = services::allocate_instance_index(conn, input.service_id).await?;
    let name = compose_vm_name(input.namespace, input.system_name, input.service_name, index as u64);

    let vm = vms::insert_creating(
        conn,
        &name,
        input.service_id,
        index,
        input.namespace,
        input.selected_cluster_id,
        ticket.id,
    )
    .await?;

    audit::record(
        conn,
        audit_actions::APPROVAL_APPROVE,
        input.approver,
        "vm",
        vm.id,
        Some("service"),
        Some(input.service_id),
        input.environment,
        &Json::Null,
    )
    .await?;

    notifications::insert(
        conn,
        input.requester,
        "APPROVAL_COMPLETED",
        "Your VM request was approved",
        &format!("VM {} is being created.", vm.name),
        &Json::Null,
    )
    .await?;

    Ok(ApproveCreateOutcome { ticket, vm })
}

pub struct ApproveSimpleInput<'a> {
    pub ticket_id: Uuid,
    pub approver: &'a str,
    pub requester: &'a str,
    pub selected_cluster_id: Option<Uuid>,
    pub environment: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Uuid,
}

/// Approval for DELETE/POWER/VNC tickets: no new resource row, no instance
/// index, just the state transition plus the ambient audit/notify writes.
pub async fn approve_simple(conn: &mut PgConnection, input: ApproveSimpleInput<'_>) -> Result<ApprovalTicket> {
    let ticket = tickets::mark_approved(
        conn,
        input.ticket_id,
        input.approver,
        input.selected_cluster_id,
        None,
        None,
        &Json::Null,
        None,
        None,
    )
    .await?;

    events::set_status(conn, ticket.event_id, EventStatus::Processing).await?;

    audit::record(
        conn,
        audit_actions::APPROVAL_APPROVE,
        input.approver,
        input.resource_type,
        input.resource_id,
        None,
        None,
        input.environment,
        &Json::Null,
    )
    .await?;

    notifications::insert(
        conn,
        input.requester,
        "APPROVAL_COMPLETED",
        "Your request was approved",
        &format!("Ticket {} has been approved.", ticket.id),
        &Json::Null,
    )
    .await?;

    Ok(ticket)
}

pub async fn reject(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    approver: &str,
    reason: &str,
    requester: &str,
    resource_type: &str,
    resource_id: Uuid,
    environment: &str,
) -> Result<ApprovalTicket> {
    let ticket = tickets::mark_rejected(conn, ticket_id, approver, reason).await?;
    events::set_status(conn, ticket.event_id, EventStatus::Cancelled).await?;

    audit::record(
        conn,
        audit_actions::APPROVAL_REJECT,
        approver,
        resource_type,
        resource_id,
        None,
        None,
        environment,
        &serde_json::json!({ "reason": reason }),
    )
    .await?;

    notifications::insert(
        conn,
        requester,
        "APPROVAL_COMPLETED",
        "Your request was rejected",
        reason,
        &Json::Null,
    )
    .await?;

    Ok(ticket)
}
