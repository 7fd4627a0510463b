//! Effective spec composition (spec §4.7 step 6, §9 "Deep object patching").
//!
//! The cluster-submitted VM spec is built by layering, in order:
//! Template snapshot → InstanceSize snapshot's `spec_overrides` → the
//! ticket's `modified_spec`. Each layer is a flat map of dotted KubeVirt
//! spec paths to scalar values, composed with last-writer-wins semantics
//! over the dotted path — not a deep structural merge of nested JSON.
//!
//! `modified_spec` may additionally use four shorthand keys (`name`,
//! `image`, `cpu`, `memory`, `disk`) that resolve to their canonical dotted
//! path, so that admins do not need to know the full KubeVirt spec shape to
//! patch the common knobs.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use snafu::{OptionExt, Snafu};

/// Canonical dotted paths for the convenience shorthand keys accepted in
/// `modified_spec` (and, by the same convention, in an InstanceSize's
/// `spec_overrides`).
const PATH_NAME: &str = "spec.template.metadata.name";
const PATH_IMAGE: &str = "spec.template.spec.volumes.0.containerDisk.image";
const PATH_CPU: &str = "spec.template.spec.domain.cpu.cores";
const PATH_MEMORY: &str = "spec.template.spec.domain.resources.requests.memory";
const PATH_DISK: &str = "spec.template.spec.domain.devices.disks.0.diskSize";
const PATH_DEDICATED_CPU: &str = "spec.template.spec.domain.cpu.dedicatedCpuPlacement";
const PATH_CPU_REQUEST: &str = "spec.template.spec.domain.resources.requests.cpu";
const PATH_CPU_LIMIT: &str = "spec.template.spec.domain.resources.limits.cpu";
const PATH_OVERCOMMIT: &str = "spec.template.spec.domain.resources.overcommitGuestOverhead";

fn canonical_path(key: &str) -> &str {
    match key {
        "name" => PATH_NAME,
        "image" => PATH_IMAGE,
        "cpu" => PATH_CPU,
        "memory" => PATH_MEMORY,
        "disk" => PATH_DISK,
        other => other,
    }
}

#[derive(Debug, Snafu)]
pub enum ComposeError {
    #[snafu(display("effective spec is missing a non-empty '{field}' at '{path}'"))]
    MissingField { field: &'static str, path: String },

    #[snafu(display("effective spec field '{field}' must be a positive number, got {value}"))]
    NonPositive { field: &'static str, value: Json },
}

/// Spec §4.5 "Guarded transitions": a hard cluster/KubeVirt constraint the
/// composed spec violates. An approval must fail-fast on this, before any
/// row is written.
#[derive(Debug, Snafu)]
pub enum GuardError {
    #[snafu(display(
        "dedicated CPU placement requires cpu request ({request}) to equal limit ({limit})"
    ))]
    DedicatedCpuRequestLimitMismatch { request: Json, limit: Json },

    #[snafu(display("overcommit cannot be combined with dedicated CPU placement"))]
    OvercommitWithDedicatedCpu,
}

/// Checks the composed spec against the hard constraints spec §4.5 names,
/// returning non-blocking warnings (e.g. overcommit in a production
/// environment) the caller may log but must not reject on.
pub fn check_guards(raw: &BTreeMap<String, Json>, environment: &str) -> Result<Vec<String>, GuardError> {
    let dedicated_cpu = raw.get(PATH_DEDICATED_CPU).and_then(Json::as_bool).unwrap_or(false);
    let overcommit = raw.get(PATH_OVERCOMMIT).and_then(Json::as_bool).unwrap_or(false);

    if dedicated_cpu {
        if overcommit {
            return Err(GuardError::OvercommitWithDedicatedCpu);
        }
        if let (Some(request), Some(limit)) = (raw.get(PATH_CPU_REQUEST), raw.get(PATH_CPU_LIMIT)) {
            if request != limit {
                return Err(GuardError::DedicatedCpuRequestLimitMismatch {
                    request: request.clone(),
                    limit: limit.clone(),
                });
            }
        }
    }

    let mut warnings = Vec::new();
    if overcommit && environment == "prod" {
        warnings.push("overcommit enabled in a production environment".to_string());
    }
    Ok(warnings)
}

/// The convenience view extracted from the composed spec, used by the
/// worker to validate spec §4.7 step 6's "must include a non-empty name,
/// image, positive CPU and memory" before submitting to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSpec {
    pub name: String,
    pub image: String,
    pub cpu_cores: u32,
    pub memory_mib: u64,
    pub disk_gib: Option<u64>,
    /// The fully composed dotted-path spec, for submission to the cluster
    /// provider verbatim.
    pub raw: BTreeMap<String, Json>,
}

/// Flattens a JSON object into the dotted-path map [`compose`] expects; a
/// missing or non-object snapshot composes as an empty layer rather than an
/// error, since `modified_spec` in particular is legitimately `{}` for most
/// tickets.
pub fn json_object_to_map(value: Option<&Json>) -> BTreeMap<String, Json> {
    match value.and_then(Json::as_object) {
        Some(object) => object.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        None => BTreeMap::new(),
    }
}

/// Applies `overrides` onto `base`, dotted path by dotted path,
/// last-writer-wins. Shorthand keys are normalized to their canonical path
/// first.
fn apply_layer(base: &mut BTreeMap<String, Json>, overrides: &BTreeMap<String, Json>) {
    for (key, value) in overrides {
        base.insert(canonical_path(key).to_string(), value.clone());
    }
}

/// Composes the effective spec from the three layers and validates the
/// mandatory convenience fields.
pub fn compose(
    template_spec: &BTreeMap<String, Json>,
    instance_size_overrides: &BTreeMap<String, Json>,
    modified_spec: &BTreeMap<String, Json>,
) -> Result<EffectiveSpec, ComposeError> {
    let mut composed = template_spec.clone();
    apply_layer(&mut composed, instance_size_overrides);
    apply_layer(&mut composed, modified_spec);

    let name = string_field(&composed, PATH_NAME, "name")?;
    let image = string_field(&composed, PATH_IMAGE, "image")?;
    let cpu_cores = positive_u32(&composed, PATH_CPU, "cpu")?;
    let memory_mib = positive_u64(&composed, PATH_MEMORY, "memory")?;
    let disk_gib = composed.get(PATH_DISK).and_then(Json::as_u64);

    Ok(EffectiveSpec {
        name,
        image,
        cpu_cores,
        memory_mib,
        disk_gib,
        raw: composed,
    })
}

fn string_field(
    composed: &BTreeMap<String, Json>,
    path: &str,
    field: &'static str,
) -> Result<String, ComposeError> {
    composed
        .get(path)
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .context(MissingFieldSnafu {
            field,
            path: path.to_string(),
        })
}

fn positive_u32(
    composed: &BTreeMap<String, Json>,
    path: &str,
    field: &'static str,
) -> Result<u32, ComposeError> {
    let value = composed.get(path).context(MissingFieldSnafu {
        field,
        path: path.to_string(),
    })?;
    let n = value.as_u64().ok_or_else(|| ComposeError::NonPositive {
        field,
        value: value.clone(),
    })?;
    if n == 0 {
        return Err(ComposeError::NonPositive {
            field,
            value: value.clone(),
        });
    }
    Ok(n as u32)
}

fn positive_u64(
    composed: &BTreeMap<String, Json>,
    path: &str,
    field: &'static str,
) -> Result<u64, ComposeError> {
    let value = composed.get(path).context(MissingFieldSnafu {
        field,
        path: path.to_string(),
    })?;
    let n = value.as_u64().ok_or_else(|| ComposeError::NonPositive {
        field,
        value: value.clone(),
    })?;
    if n == 0 {
        return Err(ComposeError::NonPositive {
            field,
            value: value.clone(),
        });
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(pairs: &[(&str, Json)]) -> BTreeMap<String, Json> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn layers_compose_with_last_writer_wins_and_shorthand_resolution() {
        let template = map(&[
            ("name", json!("tpl-centos7")),
            ("image", json!("registry/centos7:latest")),
            ("cpu", json!(2)),
            ("memory", json!(2048)),
        ]);
        let instance_size = map(&[("cpu", json!(8)), ("hugepages.pageSize", json!("2Mi"))]);
        let modified = map(&[("cpu", json!(4))]);

        let effective = compose(&template, &instance_size, &modified).expect("compose");

        assert_eq!(effective.cpu_cores, 4, "modified_spec wins over instance size");
        assert_eq!(effective.memory_mib, 2048, "template value untouched by either override");
        assert_eq!(
            effective.raw.get("hugepages.pageSize"),
            Some(&json!("2Mi"))
        );
    }

    #[test]
    fn missing_image_is_rejected() {
        let template = map(&[("name", json!("tpl")), ("cpu", json!(1)), ("memory", json!(512))]);
        let err = compose(&template, &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ComposeError::MissingField { field: "image", .. }));
    }

    #[test]
    fn dedicated_cpu_with_matching_request_and_limit_passes() {
        let raw = map(&[
            (PATH_DEDICATED_CPU, json!(true)),
            (PATH_CPU_REQUEST, json!("4")),
            (PATH_CPU_LIMIT, json!("4")),
        ]);
        assert!(check_guards(&raw, "test").unwrap().is_empty());
    }

    #[test]
    fn dedicated_cpu_with_mismatched_request_and_limit_is_blocked() {
        let raw = map(&[
            (PATH_DEDICATED_CPU, json!(true)),
            (PATH_CPU_REQUEST, json!("2")),
            (PATH_CPU_LIMIT, json!("4")),
        ]);
        let err = check_guards(&raw, "test").unwrap_err();
        assert!(matches!(err, GuardError::DedicatedCpuRequestLimitMismatch { .. }));
    }

    #[test]
    fn overcommit_with_dedicated_cpu_is_blocked_even_when_request_matches_limit() {
        let raw = map(&[
            (PATH_DEDICATED_CPU, json!(true)),
            (PATH_CPU_REQUEST, json!("4")),
            (PATH_CPU_LIMIT, json!("4")),
            (PATH_OVERCOMMIT, json!(true)),
        ]);
        let err = check_guards(&raw, "test").unwrap_err();
        assert!(matches!(err, GuardError::OvercommitWithDedicatedCpu));
    }

    #[test]
    fn overcommit_without_dedicated_cpu_is_a_warning_only_in_production() {
        let raw = map(&[(PATH_OVERCOMMIT, json!(true))]);
        assert!(check_guards(&raw, "test").unwrap().is_empty());
        let warnings = check_guards(&raw, "prod").unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn zero_cpu_is_rejected() {
        let template = map(&[
            ("name", json!("tpl")),
            ("image", json!("img")),
            ("cpu", json!(0)),
            ("memory", json!(512)),
        ]);
        let err = compose(&template, &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ComposeError::NonPositive { field: "cpu", .. }));
    }
}
