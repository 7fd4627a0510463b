//! Identity & RBAC evaluator (spec §4.1).
//!
//! This module is a pure, in-memory evaluator: it never talks to the store
//! itself. Callers (the API handlers) first resolve the caller's global role
//! bindings and, when a resource is named, walk the System→Service→VM
//! inheritance chain via the store to find the first matching resource role
//! binding; both are then handed to [`Authorizer::authorize`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A global capability string, e.g. `vm:create`, `approval:approve`,
/// `platform:admin`. Custom roles may only be composed of explicit
/// capabilities like these — wildcard grants (`*`, `vm:*`) are rejected by
/// [`validate_custom_role`].
pub type Capability = String;

pub const CAP_PLATFORM_ADMIN: &str = "platform:admin";
pub const CAP_VM_CREATE: &str = "vm:create";
pub const CAP_VM_DELETE: &str = "vm:delete";
pub const CAP_VM_POWER: &str = "vm:power";
pub const CAP_APPROVAL_APPROVE: &str = "approval:approve";
pub const CAP_VNC_ACCESS: &str = "vnc:access";

/// The resource-scoped role a binding can grant. Resolution walks
/// VM → parent Service → parent System and returns the first binding found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceRole {
    Viewer,
    Member,
    Admin,
    Owner,
}

/// The actions a resource role can be asked to permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    View,
    Create,
    ManageMembers,
    Transfer,
}

impl ResourceRole {
    /// The fixed role → permitted-actions matrix from spec §4.1:
    /// Owner: all including transfer; Admin: manage members + CRUD;
    /// Member: create/view; Viewer: view only.
    pub fn permits(self, action: ResourceAction) -> bool {
        match (self, action) {
            (Self::Owner, _) => true,
            (Self::Admin, ResourceAction::Transfer) => false,
            (Self::Admin, _) => true,
            (Self::Member, ResourceAction::View | ResourceAction::Create) => true,
            (Self::Member, _) => false,
            (Self::Viewer, ResourceAction::View) => true,
            (Self::Viewer, _) => false,
        }
    }
}

/// The caller's resolved global role bindings, aggregated across every
/// global role grant they hold.
#[derive(Debug, Clone, Default)]
pub struct GlobalGrants {
    capabilities: HashSet<Capability>,
}

impl GlobalGrants {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains(CAP_PLATFORM_ADMIN) || self.capabilities.contains(capability)
    }

    pub fn is_platform_admin(&self) -> bool {
        self.capabilities.contains(CAP_PLATFORM_ADMIN)
    }
}

/// The outcome of an authorization check. `Deny` for a resource-scoped check
/// with no binding anywhere in the inheritance chain is indistinguishable
/// from "not found" at the HTTP layer — the resource must appear invisible,
/// per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Evaluates global-capability and resource-role authorization in the fixed
/// order defined by spec §4.1: global capability first (with
/// `platform:admin` short-circuiting to allow), then resource role.
pub struct Authorizer;

impl Authorizer {
    /// Global-only check, used for operations with no resource scope (e.g.
    /// submitting a brand new System).
    pub fn authorize_global(grants: &GlobalGrants, capability: &str) -> Decision {
        if grants.has(capability) {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    /// Resource-scoped check. `resource_role` is the first binding found by
    /// walking VM → Service → System (already resolved by the caller, since
    /// that walk requires store access). Absence of any binding denies —
    /// the caller's global grants still apply first.
    pub fn authorize_resource(
        grants: &GlobalGrants,
        capability: &str,
        resource_role: Option<ResourceRole>,
        action: ResourceAction,
    ) -> Decision {
        if grants.has(capability) {
            return Decision::Allow;
        }

        match resource_role {
            Some(role) if role.permits(action) => Decision::Allow,
            _ => Decision::Deny,
        }
    }
}

/// Rejects custom role definitions that use wildcard grants; custom roles
/// may only be composed of explicit capability strings.
pub fn validate_custom_role(capabilities: &[Capability]) -> Result<(), String> {
    for capability in capabilities {
        if capability.contains('*') {
            return Err(format!(
                "wildcard grants are forbidden in custom roles: {capability}"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_admin_short_circuits() {
        let grants = GlobalGrants::new([CAP_PLATFORM_ADMIN.to_string()]);
        assert_eq!(
            Authorizer::authorize_global(&grants, CAP_VM_CREATE),
            Decision::Allow
        );
    }

    #[test]
    fn missing_global_capability_falls_through_to_resource_role() {
        let grants = GlobalGrants::default();
        assert_eq!(
            Authorizer::authorize_resource(
                &grants,
                CAP_VM_CREATE,
                Some(ResourceRole::Member),
                ResourceAction::Create
            ),
            Decision::Allow
        );
        assert_eq!(
            Authorizer::authorize_resource(
                &grants,
                CAP_VM_CREATE,
                Some(ResourceRole::Viewer),
                ResourceAction::Create
            ),
            Decision::Deny
        );
    }

    #[test]
    fn absent_binding_denies() {
        let grants = GlobalGrants::default();
        assert_eq!(
            Authorizer::authorize_resource(&grants, CAP_VM_CREATE, None, ResourceAction::View),
            Decision::Deny
        );
    }

    #[test]
    fn owner_can_transfer_admin_cannot() {
        assert!(ResourceRole::Owner.permits(ResourceAction::Transfer));
        assert!(!ResourceRole::Admin.permits(ResourceAction::Transfer));
        assert!(ResourceRole::Admin.permits(ResourceAction::ManageMembers));
    }

    #[test]
    fn wildcard_custom_role_rejected() {
        assert!(validate_custom_role(&["vm:*".to_string()]).is_err());
        assert!(validate_custom_role(&[CAP_VM_CREATE.to_string()]).is_ok());
    }
}
