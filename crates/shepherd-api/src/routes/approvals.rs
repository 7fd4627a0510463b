//! `POST /api/v1/approvals/{id}/decision` (spec §4.5, §6). The ticket's
//! `operation_type` decides which resource context to re-derive from the
//! immutable event payload (`ApprovalTicket` carries no `resource_type`/
//! `resource_id` of its own) and, on approval, which queue job kind to
//! insert in the same transaction — the insert invariant named in spec §9
//! ("every approved ticket has exactly one matching queue job, except VNC,
//! whose token is minted synchronously instead of queued").

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json_;
use shepherd_core::domain::{audit_actions, OperationType};
use shepherd_core::payloads::{CreatePayload, DeletePayload, PowerPayload, VncRequestPayload};
use shepherd_core::rbac::CAP_APPROVAL_APPROVE;
use shepherd_core::spec_compose;
use shepherd_queue::{JobArgs, JobKind};
use shepherd_store::decide::{self, ApproveCreateInput, ApproveSimpleInput};
use shepherd_store::rbac_store;
use shepherd_store::{catalog, events, notifications, services, systems, tickets, vms};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::routes::require_global_capability;
use crate::state::AppState;
use crate::vnc_token;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    decision: Decision,
    #[serde(default)]
    selected_cluster_id: Option<Uuid>,
    #[serde(default)]
    selected_storage_class: Option<String>,
    #[serde(default)]
    selected_template_version: Option<String>,
    #[serde(default)]
    modified_spec: Json_,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    ticket_id: Uuid,
    status: String,
}

pub async fn decide(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionRequest>,
) -> Result<(StatusCode, Json<DecisionResponse>), ApiError> {
    let mut tx = state.pool.begin().await.map_err(shepherd_store::error::Error::from)?;

    let grants = rbac_store::global_grants(&mut tx, &caller.subject).await?;
    require_global_capability(&grants, CAP_APPROVAL_APPROVE)?;

    let ticket = tickets::get(&mut tx, id).await?;

    // Spec §4.5 "Approver identity rule": the approver must not be the
    // requester, even when the same caller also holds `approval:approve`.
    if ticket.requester == caller.subject {
        return Err(shepherd_core::error::Error::Precondition {
            message: "the approver must not be the requester".to_string(),
        }
        .into());
    }

    let ticket = match body.decision {
        Decision::Reject => {
            let (resource_type, resource_id, environment) =
                resource_context(&mut tx, &ticket).await?;
            let reason = body.reason.unwrap_or_default();
            decide::reject(
                &mut tx,
                ticket.id,
                &caller.subject,
                &reason,
                &ticket.requester,
                &resource_type,
                resource_id,
                &environment,
            )
            .await?
        }
        Decision::Approve => {
            approve(
                &mut tx,
                &state,
                &caller.subject,
                &ticket,
                body.selected_cluster_id,
                body.selected_storage_class.as_deref(),
                body.selected_template_version.as_deref(),
                &body.modified_spec,
            )
            .await?
        }
    };

    tx.commit().await.map_err(|source| shepherd_store::error::Error::Database { source })?;

    Ok((
        StatusCode::OK,
        Json(DecisionResponse {
            ticket_id: ticket.id,
            status: ticket.status.to_string(),
        }),
    ))
}

/// Re-derives `(resource_type, resource_id, environment)` for a ticket from
/// its immutable event payload — the information the `ApprovalTicket` row
/// itself doesn't carry.
async fn resource_context(
    tx: &mut sqlx::PgConnection,
    ticket: &shepherd_core::domain::ApprovalTicket,
) -> Result<(String, Uuid, String), ApiError> {
    let event = events::get(tx, ticket.event_id).await?;
    match ticket.operation_type {
        OperationType::Create => {
            let payload: CreatePayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let namespace = catalog::get_namespace_by_name(tx, &payload.namespace).await?;
            Ok(("service".to_string(), payload.service_id, namespace.environment))
        }
        OperationType::Delete => {
            let payload: DeletePayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let vm = vms::get(tx, payload.vm_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &vm.namespace).await?;
            Ok(("vm".to_string(), payload.vm_id, namespace.environment))
        }
        OperationType::Power | OperationType::BatchChild => {
            let payload: PowerPayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let vm = vms::get(tx, payload.vm_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &vm.namespace).await?;
            Ok(("vm".to_string(), payload.vm_id, namespace.environment))
        }
        OperationType::Vnc => {
            let payload: VncRequestPayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let vm = vms::get(tx, payload.vm_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &vm.namespace).await?;
            Ok(("vm".to_string(), payload.vm_id, namespace.environment))
        }
        OperationType::BatchParent => Ok(("batch".to_string(), ticket.id, "multi".to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
async fn approve(
    tx: &mut sqlx::PgConnection,
    state: &AppState,
    approver: &str,
    ticket: &shepherd_core::domain::ApprovalTicket,
    selected_cluster_id: Option<Uuid>,
    selected_storage_class: Option<&str>,
    selected_template_version: Option<&str>,
    modified_spec: &Json_,
) -> Result<shepherd_core::domain::ApprovalTicket, ApiError> {
    match ticket.operation_type {
        OperationType::Create => {
            let event = events::get(tx, ticket.event_id).await?;
            let payload: CreatePayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let cluster_id = selected_cluster_id.ok_or_else(|| ApiError::MalformedBody {
                message: "selected_cluster_id is required to approve a create ticket".to_string(),
            })?;
            let storage_class = selected_storage_class.ok_or_else(|| ApiError::MalformedBody {
                message: "selected_storage_class is required to approve a create ticket".to_string(),
            })?;
            let template_version = selected_template_version.unwrap_or_default();

            let service = services::get(tx, payload.service_id).await?;
            let system = systems::get(tx, service.system_id).await?;
            let template = catalog::get_template(tx, payload.template_id).await?;
            let instance_size = catalog::get_instance_size(tx, payload.instance_size_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &payload.namespace).await?;

            // Spec §4.5 "Guarded transitions": fail fast, before any row is
            // written, when the composed spec violates a hard cluster
            // constraint (dedicated CPU requires request == limit; overcommit
            // combined with dedicated CPU is blocking). Non-blocking warnings
            // are logged, not rejected on.
            let template_map = spec_compose::json_object_to_map(Some(&template.spec));
            let instance_size_map = spec_compose::json_object_to_map(Some(&instance_size.spec_overrides));
            let modified_map = spec_compose::json_object_to_map(Some(modified_spec));
            let mut composed = template_map.clone();
            for layer in [&instance_size_map, &modified_map] {
                composed.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            let warnings = spec_compose::check_guards(&composed, &namespace.environment).map_err(|source| {
                shepherd_core::error::Error::Precondition {
                    message: source.to_string(),
                }
            })?;
            for warning in warnings {
                tracing::warn!(ticket_id = %ticket.id, %warning, "non-blocking guard warning on approval");
            }

            let outcome = decide::approve_create(
                tx,
                ApproveCreateInput {
                    ticket_id: ticket.id,
                    approver,
                    requester: &ticket.requester,
                    selected_cluster_id: cluster_id,
                    selected_storage_class: storage_class,
                    selected_template_version: template_version,
                    modified_spec,
                    template_snapshot: &template.spec,
                    instance_size_snapshot: &instance_size.spec_overrides,
                    service_id: payload.service_id,
                    system_name: &system.name,
                    service_name: &service.name,
                    namespace: &payload.namespace,
                    environment: &namespace.environment,
                },
            )
            .await?;

            shepherd_queue::insert(tx, JobKind::VmCreate, &JobArgs::for_event(ticket.event_id).to_json()).await?;
            Ok(outcome.ticket)
        }
        OperationType::Delete => {
            let event = events::get(tx, ticket.event_id).await?;
            let payload: DeletePayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let vm = vms::get(tx, payload.vm_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &vm.namespace).await?;

            let approved = decide::approve_simple(
                tx,
                ApproveSimpleInput {
                    ticket_id: ticket.id,
                    approver,
                    requester: &ticket.requester,
                    selected_cluster_id,
                    environment: &namespace.environment,
                    resource_type: "vm",
                    resource_id: payload.vm_id,
                },
            )
            .await?;

            shepherd_queue::insert(tx, JobKind::VmDelete, &JobArgs::for_event(ticket.event_id).to_json()).await?;
            Ok(approved)
        }
        OperationType::Power | OperationType::BatchChild => {
            let event = events::get(tx, ticket.event_id).await?;
            let payload: PowerPayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let vm = vms::get(tx, payload.vm_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &vm.namespace).await?;

            let approved = decide::approve_simple(
                tx,
                ApproveSimpleInput {
                    ticket_id: ticket.id,
                    approver,
                    requester: &ticket.requester,
                    selected_cluster_id,
                    environment: &namespace.environment,
                    resource_type: "vm",
                    resource_id: payload.vm_id,
                },
            )
            .await?;

            shepherd_queue::insert(
                tx,
                JobKind::VmPower,
                &JobArgs::with_discriminator(ticket.event_id, payload.operation.to_string()).to_json(),
            )
            .await?;
            Ok(approved)
        }
        OperationType::Vnc => {
            let event = events::get(tx, ticket.event_id).await?;
            let payload: VncRequestPayload = serde_json::from_value(event.payload).map_err(|err| ApiError::MalformedBody {
                message: err.to_string(),
            })?;
            let vm = vms::get(tx, payload.vm_id).await?;
            let namespace = catalog::get_namespace_by_name(tx, &vm.namespace).await?;

            let approved = decide::approve_simple(
                tx,
                ApproveSimpleInput {
                    ticket_id: ticket.id,
                    approver,
                    requester: &ticket.requester,
                    selected_cluster_id,
                    environment: &namespace.environment,
                    resource_type: "vm",
                    resource_id: payload.vm_id,
                },
            )
            .await?;

            // VNC has no queue job kind (spec §4.10): the token is minted
            // synchronously, right here, instead of being deferred to a worker.
            let (token, claims) = vnc_token::mint(
                &state.vnc_signing_key,
                state.vnc_token_ttl,
                &ticket.requester,
                vm.id,
                vm.cluster_id,
                &vm.namespace,
            )?;

            notifications::insert(
                tx,
                &ticket.requester,
                "VNC_ACCESS_GRANTED",
                "Console access approved",
                &format!("Your console token for {} expires at {}.", vm.name, claims.exp),
                &serde_json::json!({ "token": token, "vm_id": vm.id }),
            )
            .await?;

            Ok(approved)
        }
        OperationType::BatchParent => {
            let children = tickets::list_children(tx, ticket.id).await?;
            for child in children {
                if !matches!(child.status, shepherd_core::domain::TicketStatus::Pending) {
                    continue;
                }
                Box::pin(approve(
                    &mut *tx,
                    state,
                    approver,
                    &child,
                    selected_cluster_id,
                    selected_storage_class,
                    selected_template_version,
                    modified_spec,
                ))
                .await?;
            }

            let approved = decide::approve_simple(
                tx,
                ApproveSimpleInput {
                    ticket_id: ticket.id,
                    approver,
                    requester: &ticket.requester,
                    selected_cluster_id: None,
                    environment: "multi",
                    resource_type: "batch",
                    resource_id: ticket.id,
                },
            )
            .await?;
            Ok(approved)
        }
    }
}
