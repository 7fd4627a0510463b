//! The worker protocol (spec §4.7): one function per job kind, each
//! following the same ten-step skeleton — load event, best-effort mark
//! executing, parse the immutable payload, fetch the ticket's admin-bound
//! fields, validate the environment, do the cluster-side effect, then
//! commit the terminal status/audit write as one transaction.
//!
//! Every function here returns `Result<(), WorkerError>`: `Ok(())` means the
//! job is done (including the idempotent early-exit on an already-completed
//! event); `Err` carries the typed transient/permanent classification the
//! pool runtime uses to decide retry vs. cancel (spec §7). A critical
//! discrepancy — the cluster-side call succeeded but the following
//! persistence failed — is logged and swallowed as `Ok(())`, never
//! propagated as a retryable error, since retrying a non-idempotent
//! delete/power call would double the effect (spec §4.7 step 10).

use serde_json::Value as Json;
use sqlx::PgPool;
use uuid::Uuid;

use shepherd_core::domain::{audit_actions, EventStatus, TicketStatus, VmStatus};
use shepherd_core::payloads::{CreatePayload, DeletePayload, PowerPayload};
use shepherd_core::provider::{Cancellation, ClusterProvider, PowerOperation};
use shepherd_core::spec_compose::{self, json_object_to_map};
use shepherd_queue::JobArgs;
use shepherd_store::tickets::BatchOutcome;
use shepherd_store::{audit, batch, catalog, events, tickets, vms};

use crate::error::{Result, WorkerError};
use crate::kubevirt::EVENT_ID_LABEL;

/// Settles the parent batch ticket's counters, if this ticket is a batch
/// child (spec §4.8). Must run inside the same transaction as the child's
/// own terminal write.
async fn settle_parent_if_child(
    tx: &mut sqlx::PgConnection,
    parent_ticket_id: Option<Uuid>,
    outcome: BatchOutcome,
) -> shepherd_store::error::Result<()> {
    if let Some(parent_id) = parent_ticket_id {
        batch::settle_child(tx, parent_id, outcome).await?;
    }
    Ok(())
}

/// Writes the shared terminal-failure shape (event → FAILED, ticket →
/// FAILED, parent batch counters bumped, audit) without touching any
/// resource row — used by DELETE/POWER, where the spec says to "keep prior"
/// the resource row's status rather than marking it FAILED.
#[allow(clippy::too_many_arguments)]
async fn fail_without_resource_update(
    pool: &PgPool,
    event_id: Uuid,
    ticket_id: Uuid,
    parent_ticket_id: Option<Uuid>,
    audit_action: &str,
    actor: &str,
    resource_type: &str,
    resource_id: Uuid,
    environment: &str,
    message: &str,
) -> Result<()> {
    let outcome = async {
        let mut tx = pool.begin().await?;
        events::set_status(&mut tx, event_id, EventStatus::Failed).await?;
        tickets::set_status(&mut tx, ticket_id, TicketStatus::Failed).await?;
        settle_parent_if_child(&mut tx, parent_ticket_id, BatchOutcome::Failed).await?;
        audit::record(
            &mut tx,
            audit_action,
            actor,
            resource_type,
            resource_id,
            None,
            None,
            environment,
            &serde_json::json!({ "message": message }),
        )
        .await?;
        tx.commit().await?;
        Ok::<(), shepherd_store::error::Error>(())
    }
    .await;
    outcome.map_err(WorkerError::from)
}

/// The CREATE worker. Steps 1–10 of spec §4.7 in order; step 7's
/// idempotency probe and step 6's spec composition are the two steps
/// unique to CREATE among the three operation kinds.
pub async fn handle_create(
    pool: &PgPool,
    provider: &dyn ClusterProvider,
    cancel: &dyn Cancellation,
    job_args: &JobArgs,
) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(|err| WorkerError::transient(err.to_string()))?;

    // Step 1: claim-check re-fetch; already-completed events exit clean.
    let event = events::get(&mut conn, job_args.event_id).await?;
    if event.status == EventStatus::Completed {
        return Ok(());
    }

    let ticket = tickets::get_by_event(&mut conn, event.id).await?;

    // Step 2: best-effort, never fatal.
    if let Err(err) = tickets::mark_executing(&mut conn, ticket.id).await {
        tracing::warn!(ticket_id = %ticket.id, error = %err, "failed to mark ticket executing");
    }

    // Step 3: parse the immutable payload.
    let payload: CreatePayload = match serde_json::from_value(event.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            let message = format!("malformed create payload: {err}");
            fail_without_resource_update(
                pool,
                event.id,
                ticket.id,
                ticket.parent_ticket_id,
                audit_actions::VM_CREATE_FAILED,
                &ticket.requester,
                "approval_ticket",
                ticket.id,
                "unknown",
                &message,
            )
            .await?;
            return Err(WorkerError::permanent(message));
        }
    };

    // Step 4: admin-bound fields live on the ticket, not the payload.
    let Some(cluster_id) = ticket.selected_cluster_id else {
        let message = "ticket is missing its admin-bound cluster".to_string();
        fail_without_resource_update(
            pool,
            event.id,
            ticket.id,
            ticket.parent_ticket_id,
            audit_actions::VM_CREATE_FAILED,
            &ticket.requester,
            "approval_ticket",
            ticket.id,
            "unknown",
            &message,
        )
        .await?;
        return Err(WorkerError::permanent(message));
    };

    let vm = vms::get_by_ticket(&mut conn, ticket.id).await?;

    // Step 5: environment match.
    let cluster = catalog::get_cluster(&mut conn, cluster_id).await?;
    let namespace = catalog::get_namespace_by_name(&mut conn, &payload.namespace).await?;
    if cluster.environment != namespace.environment {
        let message = format!(
            "environment mismatch: cluster={} namespace={}",
            cluster.environment, namespace.environment
        );
        fail_create(pool, &event, &ticket, vm.id, &cluster.environment, &message).await?;
        return Err(WorkerError::permanent(message));
    }

    // Step 6: compose the effective spec, Template -> InstanceSize -> modified_spec.
    let template_map = json_object_to_map(ticket.template_snapshot.as_ref());
    let instance_size_map = json_object_to_map(ticket.instance_size_snapshot.as_ref());
    let modified_map = json_object_to_map(Some(&ticket.modified_spec));

    let effective = match spec_compose::compose(&template_map, &instance_size_map, &modified_map) {
        Ok(spec) => spec,
        Err(err) => {
            let message = err.to_string();
            fail_create(pool, &event, &ticket, vm.id, &cluster.environment, &message).await?;
            return Err(WorkerError::permanent(message));
        }
    };

    // Step 7: idempotency probe before ever creating anything.
    let label_selector = format!("{EVENT_ID_LABEL}={}", event.id);
    let existing = provider
        .list_vms(cancel, cluster_id, &payload.namespace, &label_selector, 1)
        .await?;

    // Step 8: execute, or reuse what a prior crashed attempt already created.
    let observed = match existing.into_iter().next() {
        Some(found) => found,
        None => {
            provider
                .create_vm(cancel, cluster_id, &payload.namespace, &vm.name, &effective, event.id)
                .await?
        }
    };

    let vm_status = observed.status.map_for_create();

    // Step 9: the cluster-side effect is done; persist the outcome.
    let commit = async {
        let mut tx = pool.begin().await?;
        vms::set_status(&mut tx, vm.id, vm_status).await?;
        events::set_status(&mut tx, event.id, EventStatus::Completed).await?;
        tickets::set_status(&mut tx, ticket.id, TicketStatus::Success).await?;
        settle_parent_if_child(&mut tx, ticket.parent_ticket_id, BatchOutcome::Success).await?;
        audit::record(
            &mut tx,
            audit_actions::VM_CREATE,
            &ticket.requester,
            "vm",
            vm.id,
            None,
            None,
            &cluster.environment,
            &Json::Null,
        )
        .await?;
        tx.commit().await?;
        Ok::<(), shepherd_store::error::Error>(())
    }
    .await;

    if let Err(err) = commit {
        // The VM now exists on the cluster; re-running this worker would
        // hit the idempotency probe, but a blind queue retry would also
        // re-run steps 1-8 which is wasted work at best. Per spec §4.7 step
        // 10, critical discrepancies are never surfaced as a retryable
        // error — log and leave reconciliation to the status-sync sweep.
        tracing::error!(
            event_id = %event.id, vm_id = %vm.id, error = %err,
            "critical discrepancy: cluster create succeeded but persistence failed"
        );
        return Ok(());
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn fail_create(
    pool: &PgPool,
    event: &shepherd_core::domain::DomainEvent,
    ticket: &shepherd_core::domain::ApprovalTicket,
    vm_id: Uuid,
    environment: &str,
    message: &str,
) -> Result<()> {
    let outcome = async {
        let mut tx = pool.begin().await?;
        events::set_status(&mut tx, event.id, EventStatus::Failed).await?;
        tickets::set_status(&mut tx, ticket.id, TicketStatus::Failed).await?;
        vms::set_status(&mut tx, vm_id, VmStatus::Failed).await?;
        settle_parent_if_child(&mut tx, ticket.parent_ticket_id, BatchOutcome::Failed).await?;
        audit::record(
            &mut tx,
            audit_actions::VM_CREATE_FAILED,
            &ticket.requester,
            "vm",
            vm_id,
            None,
            None,
            environment,
            &serde_json::json!({ "message": message }),
        )
        .await?;
        tx.commit().await?;
        Ok::<(), shepherd_store::error::Error>(())
    }
    .await;
    outcome.map_err(WorkerError::from)
}

/// The DELETE worker. Writes `DELETING` before the cluster call and a
/// `DELETED` tombstone after success (SPEC_FULL.md §9.1's resolution of the
/// tombstone-retention Open Question); `DeleteVM` is idempotent at the
/// provider level, so redelivery after a crash between the cluster call and
/// the tombstone write is safe.
pub async fn handle_delete(
    pool: &PgPool,
    provider: &dyn ClusterProvider,
    cancel: &dyn Cancellation,
    job_args: &JobArgs,
) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(|err| WorkerError::transient(err.to_string()))?;

    let event = events::get(&mut conn, job_args.event_id).await?;
    if event.status == EventStatus::Completed {
        return Ok(());
    }

    let ticket = tickets::get_by_event(&mut conn, event.id).await?;
    if let Err(err) = tickets::mark_executing(&mut conn, ticket.id).await {
        tracing::warn!(ticket_id = %ticket.id, error = %err, "failed to mark ticket executing");
    }

    let payload: DeletePayload = match serde_json::from_value(event.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            let message = format!("malformed delete payload: {err}");
            fail_without_resource_update(
                pool,
                event.id,
                ticket.id,
                ticket.parent_ticket_id,
                audit_actions::VM_DELETE_FAILED,
                &ticket.requester,
                "approval_ticket",
                ticket.id,
                "unknown",
                &message,
            )
            .await?;
            return Err(WorkerError::permanent(message));
        }
    };

    let vm = vms::get(&mut conn, payload.vm_id).await?;

    let cluster = catalog::get_cluster(&mut conn, vm.cluster_id).await?;
    let namespace = catalog::get_namespace_by_name(&mut conn, &vm.namespace).await?;
    if cluster.environment != namespace.environment {
        let message = format!(
            "environment mismatch: cluster={} namespace={}",
            cluster.environment, namespace.environment
        );
        fail_without_resource_update(
            pool,
            event.id,
            ticket.id,
            ticket.parent_ticket_id,
            audit_actions::VM_DELETE_FAILED,
            &ticket.requester,
            "vm",
            vm.id,
            &cluster.environment,
            &message,
        )
        .await?;
        return Err(WorkerError::permanent(message));
    }

    vms::set_status(&mut conn, vm.id, VmStatus::Deleting).await?;

    provider.delete_vm(cancel, vm.cluster_id, &vm.namespace, &vm.name).await?;

    let commit = async {
        let mut tx = pool.begin().await?;
        vms::set_status(&mut tx, vm.id, VmStatus::Deleted).await?;
        events::set_status(&mut tx, event.id, EventStatus::Completed).await?;
        tickets::set_status(&mut tx, ticket.id, TicketStatus::Success).await?;
        settle_parent_if_child(&mut tx, ticket.parent_ticket_id, BatchOutcome::Success).await?;
        audit::record(
            &mut tx,
            audit_actions::VM_DELETE_EXECUTED,
            &ticket.requester,
            "vm",
            vm.id,
            None,
            None,
            &cluster.environment,
            &Json::Null,
        )
        .await?;
        tx.commit().await?;
        Ok::<(), shepherd_store::error::Error>(())
    }
    .await;

    if let Err(err) = commit {
        tracing::error!(
            event_id = %event.id, vm_id = %vm.id, error = %err,
            "critical discrepancy: cluster delete succeeded but persistence failed"
        );
        return Ok(());
    }

    Ok(())
}

/// The POWER worker. `Start`/`Stop`/`Restart` are non-idempotent at the
/// cluster level (spec §6), so unlike CREATE/DELETE there is no probe —
/// correctness here rests entirely on the queue's at-least-once-but-bounded
/// delivery plus the caller-side preconditions that gated the approval.
pub async fn handle_power(
    pool: &PgPool,
    provider: &dyn ClusterProvider,
    cancel: &dyn Cancellation,
    job_args: &JobArgs,
) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(|err| WorkerError::transient(err.to_string()))?;

    let event = events::get(&mut conn, job_args.event_id).await?;
    if event.status == EventStatus::Completed {
        return Ok(());
    }

    let ticket = tickets::get_by_event(&mut conn, event.id).await?;
    if let Err(err) = tickets::mark_executing(&mut conn, ticket.id).await {
        tracing::warn!(ticket_id = %ticket.id, error = %err, "failed to mark ticket executing");
    }

    let payload: PowerPayload = match serde_json::from_value(event.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            let message = format!("malformed power payload: {err}");
            fail_without_resource_update(
                pool,
                event.id,
                ticket.id,
                ticket.parent_ticket_id,
                audit_actions::VM_POWER_FAILED,
                &ticket.requester,
                "approval_ticket",
                ticket.id,
                "unknown",
                &message,
            )
            .await?;
            return Err(WorkerError::permanent(message));
        }
    };

    let vm = vms::get(&mut conn, payload.vm_id).await?;

    let cluster = catalog::get_cluster(&mut conn, vm.cluster_id).await?;
    let namespace = catalog::get_namespace_by_name(&mut conn, &vm.namespace).await?;
    if cluster.environment != namespace.environment {
        let message = format!(
            "environment mismatch: cluster={} namespace={}",
            cluster.environment, namespace.environment
        );
        fail_without_resource_update(
            pool,
            event.id,
            ticket.id,
            ticket.parent_ticket_id,
            audit_actions::VM_POWER_FAILED,
            &ticket.requester,
            "vm",
            vm.id,
            &cluster.environment,
            &message,
        )
        .await?;
        return Err(WorkerError::permanent(message));
    }

    match payload.operation {
        PowerOperation::Start => provider.start_vm(cancel, vm.cluster_id, &vm.namespace, &vm.name).await?,
        PowerOperation::Stop => provider.stop_vm(cancel, vm.cluster_id, &vm.namespace, &vm.name).await?,
        PowerOperation::Restart => provider.restart_vm(cancel, vm.cluster_id, &vm.namespace, &vm.name).await?,
    }

    let target_status = match payload.operation {
        PowerOperation::Start | PowerOperation::Restart => VmStatus::Running,
        PowerOperation::Stop => VmStatus::Stopped,
    };

    let commit = async {
        let mut tx = pool.begin().await?;
        vms::set_status(&mut tx, vm.id, target_status).await?;
        events::set_status(&mut tx, event.id, EventStatus::Completed).await?;
        tickets::set_status(&mut tx, ticket.id, TicketStatus::Success).await?;
        settle_parent_if_child(&mut tx, ticket.parent_ticket_id, BatchOutcome::Success).await?;
        audit::record(
            &mut tx,
            audit_actions::VM_POWER,
            &ticket.requester,
            "vm",
            vm.id,
            None,
            None,
            &cluster.environment,
            &serde_json::json!({ "operation": payload.operation.to_string() }),
        )
        .await?;
        tx.commit().await?;
        Ok::<(), shepherd_store::error::Error>(())
    }
    .await;

    if let Err(err) = commit {
        tracing::error!(
            event_id = %event.id, vm_id = %vm.id, error = %err,
            "critical discrepancy: cluster power operation succeeded but persistence failed"
        );
        return Ok(());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_composes_as_an_empty_layer() {
        assert!(json_object_to_map(None).is_empty());
        assert!(json_object_to_map(Some(&Json::Null)).is_empty());
    }

    #[test]
    fn object_snapshot_flattens_to_its_entries() {
        let map = json_object_to_map(Some(&serde_json::json!({"cpu": 4, "memory": 2048})));
        assert_eq!(map.get("cpu"), Some(&serde_json::json!(4)));
        assert_eq!(map.len(), 2);
    }
}
