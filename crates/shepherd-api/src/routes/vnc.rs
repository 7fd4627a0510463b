//! `POST /api/v1/vms/{id}/console/request` + `GET /api/v1/vms/{id}/vnc?token=…`
//! (spec §4.10, §6). Test environments mint a token synchronously; production
//! environments go through the ordinary approval ticket flow instead — the
//! same `VNC_ACCESS_REQUESTED` operation type `routes::approvals::decide`
//! already knows how to approve. The actual frame relay to the cluster's
//! noVNC endpoint is the out-of-scope external collaborator named in spec
//! §1; this handler only authenticates and authorizes the upgrade.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use shepherd_core::domain::{audit_actions, OperationType, VmStatus};
use shepherd_core::error::Error as CoreError;
use shepherd_core::payloads::VncRequestPayload;
use shepherd_core::rbac::{ResourceAction, CAP_VNC_ACCESS};
use shepherd_store::rbac_store::{self, ResourceKind};
use shepherd_store::submit::{self, SubmitInput};
use shepherd_store::{audit, catalog, vms, vnc};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::routes::require_resource_access;
use crate::state::AppState;
use crate::vnc_token;

fn environment_is_test(environment: &str) -> bool {
    environment.eq_ignore_ascii_case("test")
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConsoleRequestResponse {
    Token { token: String, expires_at: chrono::DateTime<chrono::Utc> },
    Ticket { ticket_id: Uuid, status_url: String },
}

/// Test environment: RBAC + running check, then a token is minted
/// synchronously. Production: a `VNC_ACCESS_REQUESTED` ticket is opened and
/// the token follows later, via `approvals::decide`'s VNC branch.
pub async fn request_console(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ConsoleRequestResponse>), ApiError> {
    let mut tx = state.pool.begin().await.map_err(shepherd_store::error::Error::from)?;

    let grants = rbac_store::global_grants(&mut tx, &caller.subject).await?;
    let role = rbac_store::resolve_resource_role(&mut tx, &caller.subject, ResourceKind::Vm, id).await?;
    require_resource_access(&grants, CAP_VNC_ACCESS, role, ResourceAction::View)?;

    let vm = vms::get(&mut tx, id).await?;
    let namespace = catalog::get_namespace_by_name(&mut tx, &vm.namespace).await?;

    if vm.status != VmStatus::Running {
        return Err(CoreError::Precondition {
            message: format!("vm {} is not running", vm.name),
        }
        .into());
    }

    let response = if environment_is_test(&namespace.environment) {
        let (token, claims) = vnc_token::mint(
            &state.vnc_signing_key,
            state.vnc_token_ttl,
            &caller.subject,
            vm.id,
            vm.cluster_id,
            &vm.namespace,
        )?;

        audit::record(
            &mut tx,
            audit_actions::VNC_ACCESS,
            &caller.subject,
            "vm",
            vm.id,
            None,
            None,
            &namespace.environment,
            &serde_json::json!({ "jti": claims.jti }),
        )
        .await?;

        (
            StatusCode::OK,
            ConsoleRequestResponse::Token { token, expires_at: claims_expiry(&claims) },
        )
    } else {
        let payload = VncRequestPayload { vm_id: vm.id };
        let outcome = submit::submit(
            &mut tx,
            SubmitInput {
                operation_type: OperationType::Vnc,
                aggregate_type: "vm",
                aggregate_id: vm.id,
                requester: &caller.subject,
                resource_type: "vm",
                resource_id: Some(vm.id),
                payload: &serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
                request_params: &serde_json::Value::Null,
                environment: &namespace.environment,
                audit_action: audit_actions::VNC_ACCESS_REQUESTED,
            },
        )
        .await?;

        (
            StatusCode::ACCEPTED,
            ConsoleRequestResponse::Ticket {
                ticket_id: outcome.ticket_id,
                status_url: format!("/api/v1/approvals/{}", outcome.ticket_id),
            },
        )
    };

    tx.commit().await.map_err(|source| shepherd_store::error::Error::Database { source })?;

    Ok((response.0, Json(response.1)))
}

fn claims_expiry(claims: &vnc_token::VncClaims) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(chrono::Utc::now)
}

#[derive(Debug, Deserialize)]
pub struct VncQuery {
    token: String,
}

/// Validates signature, expiry and first-use (spec §4.10: "replay after use
/// is denied and audited"), then upgrades to a WebSocket. Relaying frames to
/// the cluster's own noVNC proxy is out of scope (spec §1); this handler
/// only gates the upgrade and leaves the socket open for that collaborator
/// to drive.
pub async fn vnc_socket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VncQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = vnc_token::verify(&state.vnc_signing_key, &query.token)?;
    if claims.vm_id != id {
        return Err(ApiError::InvalidVncToken {
            message: "token was not issued for this vm".to_string(),
        });
    }

    let mut conn = state.pool.acquire().await.map_err(shepherd_store::error::Error::from)?;
    let consumed = vnc::try_consume(&mut conn, claims.jti, claims.vm_id).await?;
    if !consumed {
        audit::record(
            &mut conn,
            audit_actions::VNC_ACCESS,
            &claims.sub,
            "vm",
            claims.vm_id,
            None,
            None,
            &claims.namespace,
            &serde_json::json!({ "jti": claims.jti, "replay": true }),
        )
        .await?;
        return Err(ApiError::VncTokenReplayed);
    }

    audit::record(
        &mut conn,
        audit_actions::VNC_ACCESS,
        &claims.sub,
        "vm",
        claims.vm_id,
        None,
        None,
        &claims.namespace,
        &serde_json::json!({ "jti": claims.jti }),
    )
    .await?;

    Ok(upgrade.on_upgrade(move |socket| handle_socket(socket, claims.vm_id)))
}

/// Keeps the upgraded connection alive until the client disconnects. The
/// frame relay itself belongs to the out-of-scope noVNC proxy collaborator.
async fn handle_socket(mut socket: WebSocket, vm_id: Uuid) {
    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
    tracing::debug!(%vm_id, "vnc socket closed");
}
