//! Store-side half of the RBAC evaluator: resolving a caller's global
//! capabilities and, when a resource is named, walking the
//! VM → Service → System inheritance chain for the first resource role
//! binding (spec §4.1, §9 "cyclic parent/child references ... modeled as ids
//! with lookup, never as in-memory cycles").

use shepherd_core::rbac::{GlobalGrants, ResourceRole};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{decode_enum, Result};

/// Aggregates capabilities across every global role binding held by
/// `subject`, the way `Authorizer::authorize_global` expects them.
pub async fn global_grants(conn: &mut PgConnection, subject: &str) -> Result<GlobalGrants> {
    let capabilities: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT p.capability
         FROM role_bindings rb
         JOIN role_permissions rp ON rp.role_id = rb.role_id
         JOIN permissions p ON p.id = rp.permission_id
         WHERE rb.subject = $1",
    )
    .bind(subject)
    .fetch_all(&mut *conn)
    .await?;
    Ok(GlobalGrants::new(capabilities))
}

/// All subjects holding `capability` through any global role binding, used
/// to notify every approver when a ticket is submitted (spec §4.5).
pub async fn subjects_with_capability(conn: &mut PgConnection, capability: &str) -> Result<Vec<String>> {
    let subjects: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT rb.subject
         FROM role_bindings rb
         JOIN role_permissions rp ON rp.role_id = rb.role_id
         JOIN permissions p ON p.id = rp.permission_id
         WHERE p.capability = $1 OR p.capability = 'platform:admin'",
    )
    .bind(capability)
    .fetch_all(&mut *conn)
    .await?;
    Ok(subjects)
}

/// A resource kind in the inheritance chain, used to scope the direct-role
/// lookup and the walk to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    System,
    Service,
    Vm,
}

impl ResourceKind {
    fn table(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Service => "service",
            Self::Vm => "vm",
        }
    }
}

async fn direct_binding(
    conn: &mut PgConnection,
    subject: &str,
    kind: ResourceKind,
    resource_id: Uuid,
) -> Result<Option<ResourceRole>> {
    let raw: Option<String> = sqlx::query_scalar(
        "SELECT resource_role FROM resource_role_bindings
         WHERE subject = $1 AND resource_type = $2 AND resource_id = $3",
    )
    .bind(subject)
    .bind(kind.table())
    .bind(resource_id)
    .fetch_optional(&mut *conn)
    .await?;
    raw.map(|raw| decode_enum("resource_role", &raw)).transpose()
}

/// Walks VM → Service → System, returning the first binding found. `None`
/// means no binding anywhere in the chain — the resource is invisible to the
/// caller per spec §4.1.
pub async fn resolve_resource_role(
    conn: &mut PgConnection,
    subject: &str,
    kind: ResourceKind,
    resource_id: Uuid,
) -> Result<Option<ResourceRole>> {
    if let Some(role) = direct_binding(conn, subject, kind, resource_id).await? {
        return Ok(Some(role));
    }

    match kind {
        ResourceKind::Vm => {
            let service_id: Option<Uuid> =
                sqlx::query_scalar("SELECT service_id FROM vms WHERE id = $1")
                    .bind(resource_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            match service_id {
                Some(service_id) => {
                    Box::pin(resolve_resource_role(conn, subject, ResourceKind::Service, service_id))
                        .await
                }
                None => Ok(None),
            }
        }
        ResourceKind::Service => {
            let system_id: Option<Uuid> =
                sqlx::query_scalar("SELECT system_id FROM services WHERE id = $1")
                    .bind(resource_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            match system_id {
                Some(system_id) => {
                    Box::pin(resolve_resource_role(conn, subject, ResourceKind::System, system_id))
                        .await
                }
                None => Ok(None),
            }
        }
        ResourceKind::System => Ok(None),
    }
}
