//! [`ClusterProvider`] implementation against KubeVirt CRDs (spec §6), via
//! `kube::Api<DynamicObject>` rather than generated `VirtualMachine`/
//! `VirtualMachineInstance` types — KubeVirt's own CRDs live outside this
//! workspace, so they're addressed by GVK rather than a vendored type.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{json, Value as Json};
use shepherd_core::domain::VmStatus;
use shepherd_core::provider::{
    Cancellation, ClusterCapabilities, ClusterProvider, ObservedStatus, ObservedVm, PowerOperation,
    ProviderError,
};
use shepherd_core::spec_compose::EffectiveSpec;
use uuid::Uuid;

const GROUP: &str = "kubevirt.io";
const VERSION: &str = "v1";
const KIND_VM: &str = "VirtualMachine";
const KIND_VMI: &str = "VirtualMachineInstance";

/// The label that makes a created `VirtualMachine` resource findable again
/// by a redelivered job (spec §4.7 step 7's idempotency probe).
pub const EVENT_ID_LABEL: &str = "shepherd.io/event-id";

fn vm_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind {
            group: GROUP.to_string(),
            version: VERSION.to_string(),
            kind: KIND_VM.to_string(),
        },
        "virtualmachines",
    )
}

fn vmi_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind {
            group: GROUP.to_string(),
            version: VERSION.to_string(),
            kind: KIND_VMI.to_string(),
        },
        "virtualmachineinstances",
    )
}

/// Resolves a cluster id to the `kube::Client` it should be driven with.
///
/// `shepherd-core` has no notion of "which kubeconfig/context a cluster
/// row means" — that mapping is this crate's concern, since only here does
/// a `kube` dependency exist at all (spec §6: `shepherd-core` must stay
/// runtime/client agnostic).
#[async_trait]
pub trait ClusterClients: Send + Sync {
    async fn client_for(&self, cluster_id: Uuid) -> Result<Client, ProviderError>;
}

/// A [`ClusterClients`] resolver backed by one `kube::Client` per cluster
/// id, built once at startup.
pub struct StaticClusterClients {
    clients: BTreeMap<Uuid, Client>,
}

impl StaticClusterClients {
    pub fn new(clients: BTreeMap<Uuid, Client>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl ClusterClients for StaticClusterClients {
    async fn client_for(&self, cluster_id: Uuid) -> Result<Client, ProviderError> {
        self.clients
            .get(&cluster_id)
            .cloned()
            .ok_or_else(|| ProviderError::permanent(format!("no kube client configured for cluster {cluster_id}")))
    }
}

pub struct KubeVirtProvider<C: ClusterClients> {
    clients: C,
}

impl<C: ClusterClients> KubeVirtProvider<C> {
    pub fn new(clients: C) -> Self {
        Self { clients }
    }

    fn vm_api(&self, client: Client, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(client, namespace, &vm_resource())
    }

    fn vmi_api(&self, client: Client, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(client, namespace, &vmi_resource())
    }
}

fn map_kube_error(err: kube::Error) -> ProviderError {
    match &err {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            ProviderError::permanent(format!("resource not found: {api_err}"))
        }
        kube::Error::Api(api_err) if api_err.code >= 500 => {
            ProviderError::transient(format!("apiserver error: {api_err}"))
        }
        _ => ProviderError::transient(err.to_string()),
    }
}

/// Builds the `VirtualMachine` manifest from the composed spec, per spec
/// §4.7 step 6's dotted-path layering; `spec.raw` is the fully-resolved
/// dotted-path map, reassembled here into the nested KubeVirt object shape.
fn build_manifest(namespace: &str, name: &str, spec: &EffectiveSpec, event_id: Uuid) -> Json {
    json!({
        "apiVersion": format!("{GROUP}/{VERSION}"),
        "kind": KIND_VM,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {
                EVENT_ID_LABEL: event_id.to_string(),
            },
        },
        "spec": {
            "running": true,
            "template": {
                "metadata": { "name": spec.name },
                "spec": {
                    "domain": {
                        "cpu": { "cores": spec.cpu_cores },
                        "resources": { "requests": { "memory": format!("{}Mi", spec.memory_mib) } },
                        "devices": { "disks": [{ "name": "containerdisk", "disk": { "bus": "virtio" } }] },
                    },
                    "volumes": [{
                        "name": "containerdisk",
                        "containerDisk": { "image": spec.image },
                    }],
                },
            },
        },
    })
}

fn extract_observed(obj: &DynamicObject) -> ObservedVm {
    let name = obj.metadata.name.clone().unwrap_or_default();
    let phase = obj
        .data
        .get("status")
        .and_then(|status| status.get("printableStatus"))
        .and_then(Json::as_str)
        .unwrap_or("Unknown");
    let status = phase.parse().unwrap_or(ObservedStatus::Unknown);
    ObservedVm { name, status }
}

#[async_trait]
impl<C: ClusterClients> ClusterProvider for KubeVirtProvider<C> {
    async fn create_vm(
        &self,
        _cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
        spec: &EffectiveSpec,
        event_id: Uuid,
    ) -> Result<ObservedVm, ProviderError> {
        let client = self.clients.client_for(cluster_id).await?;
        let api = self.vm_api(client, namespace);
        let manifest = build_manifest(namespace, name, spec, event_id);
        let object: DynamicObject =
            serde_json::from_value(manifest).map_err(|err| ProviderError::permanent(err.to_string()))?;
        let created = api
            .create(&kube::api::PostParams::default(), &object)
            .await
            .map_err(map_kube_error)?;
        Ok(extract_observed(&created))
    }

    async fn delete_vm(
        &self,
        _cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let client = self.clients.client_for(cluster_id).await?;
        let api = self.vm_api(client, namespace);
        match api.delete(name, &kube::api::DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(err) => Err(map_kube_error(err)),
        }
    }

    async fn start_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        set_running(self, cancel, cluster_id, namespace, name, true).await
    }

    async fn stop_vm(
        &self,
        cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        set_running(self, cancel, cluster_id, namespace, name, false).await
    }

    async fn restart_vm(
        &self,
        _cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let client = self.clients.client_for(cluster_id).await?;
        let api = self.vmi_api(client, namespace);
        api.delete(name, &kube::api::DeleteParams::default())
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }

    async fn list_vms(
        &self,
        _cancel: &dyn Cancellation,
        cluster_id: Uuid,
        namespace: &str,
        label_selector: &str,
        limit: u32,
    ) -> Result<Vec<ObservedVm>, ProviderError> {
        let client = self.clients.client_for(cluster_id).await?;
        let api = self.vm_api(client, namespace);
        let params = ListParams::default().labels(label_selector).limit(limit);
        let list = api.list(&params).await.map_err(map_kube_error)?;
        Ok(list.items.iter().map(extract_observed).collect())
    }

    async fn detect_capabilities(
        &self,
        _cancel: &dyn Cancellation,
        cluster_id: Uuid,
    ) -> Result<ClusterCapabilities, ProviderError> {
        let client = self.clients.client_for(cluster_id).await?;
        let api: Api<DynamicObject> = Api::all_with(
            client,
            &ApiResource::from_gvk_with_plural(
                &GroupVersionKind {
                    group: GROUP.to_string(),
                    version: VERSION.to_string(),
                    kind: "KubeVirt".to_string(),
                },
                "kubevirts",
            ),
        );
        let version = api
            .list(&ListParams::default().limit(1))
            .await
            .ok()
            .and_then(|list| list.items.into_iter().next())
            .and_then(|obj| {
                obj.data
                    .get("status")
                    .and_then(|status| status.get("observedKubeVirtVersion"))
                    .and_then(Json::as_str)
                    .map(str::to_string)
            });
        Ok(ClusterCapabilities {
            kubevirt_version: version,
            ..Default::default()
        })
    }
}

/// `VirtualMachine.spec.running` is the start/stop switch (spec §4.9): the
/// power worker patches this field and lets KubeVirt's own controller
/// reconcile the `VirtualMachineInstance` into existence or tear it down.
async fn set_running<C: ClusterClients>(
    provider: &KubeVirtProvider<C>,
    _cancel: &dyn Cancellation,
    cluster_id: Uuid,
    namespace: &str,
    name: &str,
    running: bool,
) -> Result<(), ProviderError> {
    let client = provider.clients.client_for(cluster_id).await?;
    let api = provider.vm_api(client, namespace);
    let patch = json!({ "spec": { "running": running } });
    api.patch(name, &PatchParams::apply("shepherd"), &Patch::Merge(patch))
        .await
        .map_err(map_kube_error)?;
    Ok(())
}

/// Maps a `PowerOperation` onto the provider call the worker protocol issues
/// (spec §4.9).
pub async fn apply_power_operation<C: ClusterClients>(
    provider: &KubeVirtProvider<C>,
    cancel: &dyn Cancellation,
    cluster_id: Uuid,
    namespace: &str,
    name: &str,
    operation: PowerOperation,
) -> Result<(), ProviderError> {
    match operation {
        PowerOperation::Start => provider.start_vm(cancel, cluster_id, namespace, name).await,
        PowerOperation::Stop => provider.stop_vm(cancel, cluster_id, namespace, name).await,
        PowerOperation::Restart => provider.restart_vm(cancel, cluster_id, namespace, name).await,
    }
}

/// Collapses an observed KubeVirt status into the platform's [`VmStatus`],
/// used by the reconciliation sweep (not the create path, which uses
/// [`ObservedStatus::map_for_create`]).
pub fn collapse_observed(status: ObservedStatus) -> VmStatus {
    status.map_for_create()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_carries_the_event_id_label_for_the_idempotency_probe() {
        let spec = EffectiveSpec {
            name: "web-1".to_string(),
            image: "registry/centos7:latest".to_string(),
            cpu_cores: 2,
            memory_mib: 2048,
            disk_gib: None,
            raw: BTreeMap::new(),
        };
        let event_id = Uuid::new_v4();
        let manifest = build_manifest("prod-shop", "prod-shop-shop-web-1", &spec, event_id);
        assert_eq!(
            manifest["metadata"]["labels"][EVENT_ID_LABEL],
            Json::String(event_id.to_string())
        );
        assert_eq!(manifest["spec"]["template"]["spec"]["domain"]["cpu"]["cores"], json!(2));
    }

    #[test]
    fn extract_observed_defaults_to_unknown_on_missing_status() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachine",
            "metadata": { "name": "web-1" },
        }))
        .expect("parse");
        let observed = extract_observed(&obj);
        assert_eq!(observed.name, "web-1");
        assert_eq!(observed.status, ObservedStatus::Unknown);
    }
}
