//! `POST /api/v1/vms`, `DELETE /api/v1/vms/{id}`, `POST /api/v1/vms/{id}/power`
//! (spec §6). Each handler opens one transaction, authorizes the caller,
//! builds the operation's payload, and delegates to
//! [`shepherd_store::submit::submit`] — the insert of a queue job happens
//! only at approval time (spec §4.5), not here.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json_;
use shepherd_core::domain::{audit_actions, OperationType};
use shepherd_core::error::Error as CoreError;
use shepherd_core::payloads::{DeletePayload, PowerPayload};
use shepherd_core::provider::PowerOperation;
use shepherd_core::rbac::{CAP_VM_CREATE, CAP_VM_DELETE, CAP_VM_POWER};
use shepherd_store::rbac_store::{self, ResourceKind};
use shepherd_store::submit::{self, SubmitInput};
use shepherd_store::{catalog, vms};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::routes::require_resource_access;
use crate::state::AppState;

/// Fields the caller may never set directly on `params` — they are chosen at
/// approval time instead (spec §6).
const FORBIDDEN_CREATE_FIELDS: &[&str] = &["cluster_id", "name", "labels", "cloud_init"];

fn first_forbidden_field(params: &Json_) -> Option<String> {
    let object = params.as_object()?;
    FORBIDDEN_CREATE_FIELDS
        .iter()
        .find(|field| object.contains_key(**field))
        .map(|field| (*field).to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateVmRequest {
    service_id: Uuid,
    namespace: String,
    template_id: Uuid,
    instance_size_id: Uuid,
    #[serde(default)]
    params: Json_,
    reason: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    ticket_id: Uuid,
    status_url: String,
}

pub async fn submit_create(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<CreateVmRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if let Some(field) = first_forbidden_field(&body.params) {
        return Err(CoreError::ForbiddenField { field }.into());
    }

    let mut tx = state.pool.begin().await.map_err(shepherd_store::error::Error::from)?;

    let grants = rbac_store::global_grants(&mut tx, &caller.subject).await?;
    let role = rbac_store::resolve_resource_role(&mut tx, &caller.subject, ResourceKind::Service, body.service_id)
        .await?;
    require_resource_access(&grants, CAP_VM_CREATE, role, shepherd_core::rbac::ResourceAction::Create)?;

    let namespace = catalog::get_namespace_by_name(&mut tx, &body.namespace).await?;
    catalog::get_template(&mut tx, body.template_id).await?;
    catalog::get_instance_size(&mut tx, body.instance_size_id).await?;

    let payload = shepherd_core::payloads::CreatePayload {
        service_id: body.service_id,
        namespace: body.namespace.clone(),
        template_id: body.template_id,
        instance_size_id: body.instance_size_id,
        params: body.params.clone(),
        reason: body.reason.clone(),
    };

    let outcome = submit::submit(
        &mut tx,
        SubmitInput {
            operation_type: OperationType::Create,
            aggregate_type: "vm",
            aggregate_id: Uuid::new_v4(),
            requester: &caller.subject,
            resource_type: "service",
            resource_id: Some(body.service_id),
            payload: &serde_json::to_value(&payload).unwrap_or(Json_::Null),
            request_params: &body.params,
            environment: &namespace.environment,
            audit_action: audit_actions::VM_REQUEST,
        },
    )
    .await?;

    tx.commit().await.map_err(|source| shepherd_store::error::Error::Database { source })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            ticket_id: outcome.ticket_id,
            status_url: format!("/api/v1/approvals/{}", outcome.ticket_id),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    confirm: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteVmRequest {
    #[serde(default)]
    confirm_name: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Test namespaces accept `?confirm=true`; every other environment requires
/// the exact VM name in the body, per spec §6.
fn environment_is_test(environment: &str) -> bool {
    environment.eq_ignore_ascii_case("test")
}

pub async fn delete_vm(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Query(query): Query<ConfirmQuery>,
    Json(body): Json<DeleteVmRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut tx = state.pool.begin().await.map_err(shepherd_store::error::Error::from)?;

    let grants = rbac_store::global_grants(&mut tx, &caller.subject).await?;
    let role = rbac_store::resolve_resource_role(&mut tx, &caller.subject, ResourceKind::Vm, id).await?;
    require_resource_access(&grants, CAP_VM_DELETE, role, shepherd_core::rbac::ResourceAction::ManageMembers)?;

    let vm = vms::get(&mut tx, id).await?;
    let namespace = catalog::get_namespace_by_name(&mut tx, &vm.namespace).await?;

    if environment_is_test(&namespace.environment) {
        if query.confirm != Some(true) {
            return Err(CoreError::Precondition {
                message: "deletion in a test environment requires ?confirm=true".to_string(),
            }
            .into());
        }
    } else {
        match &body.confirm_name {
            Some(name) if *name == vm.name => {}
            _ => {
                return Err(CoreError::Precondition {
                    message: format!("deletion requires confirm_name=\"{}\"", vm.name),
                }
                .into());
            }
        }
    }

    let reason = body.reason.clone().unwrap_or_default();
    let payload = DeletePayload { vm_id: id, reason: reason.clone() };

    let outcome = submit::submit(
        &mut tx,
        SubmitInput {
            operation_type: OperationType::Delete,
            aggregate_type: "vm",
            aggregate_id: id,
            requester: &caller.subject,
            resource_type: "vm",
            resource_id: Some(id),
            payload: &serde_json::to_value(&payload).unwrap_or(Json_::Null),
            request_params: &serde_json::json!({ "reason": reason }),
            environment: &namespace.environment,
            audit_action: audit_actions::VM_DELETE_SUBMITTED,
        },
    )
    .await?;

    tx.commit().await.map_err(|source| shepherd_store::error::Error::Database { source })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            ticket_id: outcome.ticket_id,
            status_url: format!("/api/v1/approvals/{}", outcome.ticket_id),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PowerVmRequest {
    operation: PowerOperation,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn power_vm(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<PowerVmRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut tx = state.pool.begin().await.map_err(shepherd_store::error::Error::from)?;

    let grants = rbac_store::global_grants(&mut tx, &caller.subject).await?;
    let role = rbac_store::resolve_resource_role(&mut tx, &caller.subject, ResourceKind::Vm, id).await?;
    require_resource_access(&grants, CAP_VM_POWER, role, shepherd_core::rbac::ResourceAction::ManageMembers)?;

    let vm = vms::get(&mut tx, id).await?;
    let namespace = catalog::get_namespace_by_name(&mut tx, &vm.namespace).await?;

    let payload = PowerPayload { vm_id: id, operation: body.operation };

    let outcome = submit::submit(
        &mut tx,
        SubmitInput {
            operation_type: OperationType::Power,
            aggregate_type: "vm",
            aggregate_id: id,
            requester: &caller.subject,
            resource_type: "vm",
            resource_id: Some(id),
            payload: &serde_json::to_value(&payload).unwrap_or(Json_::Null),
            request_params: &serde_json::json!({ "operation": body.operation, "reason": body.reason }),
            environment: &namespace.environment,
            audit_action: audit_actions::VM_POWER,
        },
    )
    .await?;

    tx.commit().await.map_err(|source| shepherd_store::error::Error::Database { source })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            ticket_id: outcome.ticket_id,
            status_url: format!("/api/v1/approvals/{}", outcome.ticket_id),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn forbidden_field_is_detected_among_siblings() {
        let params = json!({ "disk": 100, "cluster_id": "should-not-be-here" });
        assert_eq!(first_forbidden_field(&params), Some("cluster_id".to_string()));
    }

    #[test]
    fn params_without_forbidden_fields_pass() {
        let params = json!({ "disk": 100, "notes": "extra disk" });
        assert_eq!(first_forbidden_field(&params), None);
    }

    #[test]
    fn test_environment_matching_is_case_insensitive() {
        assert!(environment_is_test("TEST"));
        assert!(environment_is_test("test"));
        assert!(!environment_is_test("production"));
    }
}
