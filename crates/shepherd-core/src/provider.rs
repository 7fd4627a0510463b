//! The narrow external-collaborator interfaces named in spec §6: the
//! cluster provider (consumed by workers) and the identity provider
//! (consumed by the API layer). Both are trait objects so that the concrete
//! KubeVirt/Kubernetes client and the concrete OIDC/LDAP adapter — explicitly
//! out of scope per spec §1 — can live in other crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use uuid::Uuid;

use crate::domain::VmStatus;
use crate::spec_compose::EffectiveSpec;

/// A caller's deadline, checked by workers between suspension points (spec
/// §5 "every operation carries a cancellation token"). Kept trait-object
/// based rather than tied to a specific async runtime type so that
/// `shepherd-core` stays runtime-agnostic; `shepherd-worker` implements this
/// over `tokio_util::sync::CancellationToken`.
pub trait Cancellation: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A no-op cancellation token for call sites (tests, one-shot CLI tools)
/// that don't need real deadline propagation.
pub struct NeverCancelled;

impl Cancellation for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Snafu)]
#[snafu(display("{kind:?}: {message}"))]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

/// The raw power/lifecycle state the cluster reports. This is distinct from
/// [`VmStatus`]; the create-status mapping in spec §4.7 collapses several of
/// these into `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ObservedStatus {
    Running,
    Creating,
    Pending,
    Unknown,
    Failed,
    Stopping,
    Stopped,
    Deleting,
    Migrating,
    Paused,
}

impl ObservedStatus {
    /// Create-status mapping from spec §4.7: transient provider states are
    /// promoted to `Running` and reconciled later; `Failed` maps to
    /// `Failed`; everything else is preserved as-is.
    pub fn map_for_create(self) -> VmStatus {
        match self {
            Self::Running | Self::Creating | Self::Pending | Self::Unknown => VmStatus::Running,
            Self::Failed => VmStatus::Failed,
            Self::Stopping => VmStatus::Stopping,
            Self::Stopped => VmStatus::Stopped,
            Self::Deleting => VmStatus::Deleting,
            Self::Migrating => VmStatus::Migrating,
            Self::Paused => VmStatus::Paused,
        }
    }
}

/// A VM as observed on the cluster, returned by `list_vms` (used for
/// idempotency probes) and by the lifecycle calls.
#[derive(Debug, Clone)]
pub struct ObservedVm {
    pub name: String,
    pub status: ObservedStatus,
}

/// Capabilities a cluster reports, consumed by admin tooling when presenting
/// cluster choices at approval time. Not otherwise interpreted by the core
/// pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterCapabilities {
    pub gpu_devices: Vec<String>,
    pub hugepage_sizes: Vec<String>,
    pub sriov_networks: Vec<String>,
    pub storage_classes: Vec<String>,
    pub kubevirt_version: Option<String>,
}

/// A power operation discriminator, carried in the queue job args alongside
/// the event id (spec's "claim-check" pattern — queue args carry only an
/// opaque id plus a discriminator, never the business object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PowerOperation {
    Start,
    Stop,
    Restart,
}

/// The cluster provider interface consumed by workers (spec §6).
///
/// `CreateVM` must be safe to call with the caller-chosen name and must
/// label the created resource with the event id, so that a redelivered job
/// can find it again via `ListVMs` (the idempotency probe in spec §4.7 step
/// 7). `DeleteVM` is idempotent: deleting a resource that is already absent
/// is not an error. `Start`/`Stop`/`Restart` are **not** idempotent at the
/// cluster level — callers are responsible for the preconditions that make
/// retrying them safe.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    async fn create_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
        spec: &EffectiveSpec,
        event_id: Uuid,
    ) -> Result<ObservedVm, ProviderError>;

    async fn delete_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    async fn start_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    async fn stop_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    async fn restart_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    /// Lists VMs matching a label selector, used for the idempotency probe:
    /// `shepherd.io/event-id={event_id}`.
    async fn list_vms(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        label_selector: &str,
        limit: u32,
    ) -> Result<Vec<ObservedVm>, ProviderError>;

    async fn detect_capabilities(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
    ) -> Result<ClusterCapabilities, ProviderError>;
}

/// The normalized identity payload handed back by an OIDC/LDAP adapter
/// (spec §6 "Identity provider interface"). Group-to-role mapping is
/// resolved by the RBAC layer, not by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub groups: Vec<String>,
}

/// Resolves a bearer credential to a normalized caller identity. The
/// concrete OIDC/LDAP logic is out of scope for this crate (spec §1); only
/// the seam is defined here.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<CallerIdentity, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_status_mapping_promotes_transient_states_to_running() {
        assert_eq!(ObservedStatus::Creating.map_for_create(), VmStatus::Running);
        assert_eq!(ObservedStatus::Pending.map_for_create(), VmStatus::Running);
        assert_eq!(ObservedStatus::Unknown.map_for_create(), VmStatus::Running);
        assert_eq!(ObservedStatus::Running.map_for_create(), VmStatus::Running);
    }

    #[test]
    fn create_status_mapping_preserves_the_rest() {
        assert_eq!(ObservedStatus::Failed.map_for_create(), VmStatus::Failed);
        assert_eq!(ObservedStatus::Stopped.map_for_create(), VmStatus::Stopped);
        assert_eq!(ObservedStatus::Migrating.map_for_create(), VmStatus::Migrating);
        assert_eq!(ObservedStatus::Paused.map_for_create(), VmStatus::Paused);
    }
}
