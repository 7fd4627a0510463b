//! Route wiring (spec §6). Every sub-router is mounted under `/api/v1` and
//! runs behind [`crate::auth::resolve_identity`]; [`crate::server::ApiServer`]
//! layers the trace middleware and `/health` on top of the router this
//! module returns.

pub mod approvals;
pub mod batch;
pub mod notifications;
pub mod vms;
pub mod vnc;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use shepherd_core::rbac::{Authorizer, Decision, GlobalGrants, ResourceAction};
use shepherd_core::error::Error as CoreError;

use crate::auth::resolve_identity;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/vms", post(vms::submit_create))
        .route("/vms/{id}", delete(vms::delete_vm))
        .route("/vms/{id}/power", post(vms::power_vm))
        .route("/vms/batch", post(batch::submit_batch))
        .route("/vms/{id}/console/request", post(vnc::request_console))
        .route("/vms/{id}/vnc", get(vnc::vnc_socket))
        .route("/approvals/{id}/decision", post(approvals::decide))
        .route("/notifications", get(notifications::list))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/{id}/read", patch(notifications::mark_read))
        .route("/notifications/mark-all-read", post(notifications::mark_all_read))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_identity));

    Router::new().nest("/api/v1", api).with_state(state)
}

/// Resource-scoped authorization with the 403/404 split named in spec §4.1:
/// a caller with no binding anywhere in the inheritance chain gets
/// [`CoreError::ResourceNotVisible`] (surfaced as 404); a caller with a
/// binding that doesn't permit `action` gets [`CoreError::MissingCapability`]
/// (403). [`Authorizer::authorize_resource`] alone cannot make this
/// distinction since it folds both cases into one `Deny`.
pub fn require_resource_access(
    grants: &GlobalGrants,
    capability: &str,
    resource_role: Option<shepherd_core::rbac::ResourceRole>,
    action: ResourceAction,
) -> Result<(), CoreError> {
    if Authorizer::authorize_resource(grants, capability, resource_role, action) == Decision::Allow {
        return Ok(());
    }
    match resource_role {
        None => Err(CoreError::ResourceNotVisible),
        Some(_) => Err(CoreError::MissingCapability {
            capability: capability.to_string(),
        }),
    }
}

/// Global-only authorization (spec §4.1), used where no resource is named.
pub fn require_global_capability(grants: &GlobalGrants, capability: &str) -> Result<(), CoreError> {
    if Authorizer::authorize_global(grants, capability) == Decision::Allow {
        Ok(())
    } else {
        Err(CoreError::MissingCapability {
            capability: capability.to_string(),
        })
    }
}
