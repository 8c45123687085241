//! Diff/patch engine
//!
//! Compares a compiled child against its live counterpart and yields at most
//! one [`Correction`]. Rules apply in a fixed order and stop at the first
//! mismatch:
//!
//! 1. controller owner reference (appended or replaced, foreign ones kept)
//! 2. labels (live must be a superset of expected)
//! 3. kind-specific payload (bundle data, endpoint type and ports, template)
//!
//! The corrected object is always derived from the live one, so fields set by
//! the API server or other actors survive the write.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodTemplateSpec, Service, ServicePort, Volume};
use kube::Resource;

use minecraft_common::crd::PodMonitor;
use minecraft_common::labels::{drifted_keys, ensure_labels};
use minecraft_common::ownership::ensure_owner;

/// What to do when a live workload template differs from the compiled one
///
/// Templates cannot be patched in place without orphaning running pods, so
/// the only corrective action is recreation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TemplateDriftPolicy {
    /// Log the drift and leave the workload alone
    #[default]
    Tolerate,
    /// Delete the workload; the next pass creates it from the current template
    Recreate,
}

impl FromStr for TemplateDriftPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tolerate" => Ok(Self::Tolerate),
            "recreate" => Ok(Self::Recreate),
            other => Err(format!(
                "unknown template drift policy '{other}' (expected tolerate or recreate)"
            )),
        }
    }
}

impl fmt::Display for TemplateDriftPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tolerate => write!(f, "tolerate"),
            Self::Recreate => write!(f, "recreate"),
        }
    }
}

/// The single corrective action for one child
#[derive(Clone, Debug, PartialEq)]
pub enum Correction<K> {
    /// Live object is equivalent to the compiled one
    InSync,
    /// Replace the live object with `object`
    Update {
        /// Live object with one concern corrected
        object: K,
        /// Paths of the corrected fields
        changed: Vec<String>,
    },
    /// Delete the live object
    Delete {
        /// Why the object has to go
        reason: String,
    },
    /// Drift was found and deliberately left alone
    Tolerated {
        /// Paths of the drifted fields
        drifted: Vec<String>,
    },
}

impl<K> Correction<K> {
    /// Whether applying this correction writes to the cluster
    pub fn needs_write(&self) -> bool {
        matches!(self, Self::Update { .. } | Self::Delete { .. })
    }

    /// Fields this correction touches or reports
    pub fn changed_fields(&self) -> &[String] {
        match self {
            Self::Update { changed, .. } => changed,
            Self::Tolerated { drifted } => drifted,
            Self::InSync | Self::Delete { .. } => &[],
        }
    }
}

fn update<K>(object: K, changed: impl IntoIterator<Item = String>) -> Correction<K> {
    Correction::Update {
        object,
        changed: changed.into_iter().collect(),
    }
}

/// Rules 1 and 2, shared by every kind
fn metadata_correction<K>(expected: &K, actual: &K) -> Option<Correction<K>>
where
    K: Resource + Clone,
{
    let expected_meta = expected.meta();

    if let Some(owner) = expected_meta
        .owner_references
        .as_ref()
        .and_then(|refs| refs.first())
    {
        let mut object = actual.clone();
        if ensure_owner(object.meta_mut(), owner) {
            return Some(update(object, ["metadata.ownerReferences".to_string()]));
        }
    }

    if let Some(labels) = expected_meta.labels.as_ref() {
        let mut object = actual.clone();
        let drifted = ensure_labels(object.meta_mut(), labels);
        if !drifted.is_empty() {
            return Some(update(
                object,
                drifted.into_iter().map(|k| format!("metadata.labels.{k}")),
            ));
        }
    }

    None
}

/// Ownership and labels only, for children whose payload is left alone
pub fn diff_metadata<K>(expected: &K, actual: &K) -> Correction<K>
where
    K: Resource + Clone,
{
    metadata_correction(expected, actual).unwrap_or(Correction::InSync)
}

/// Configuration bundle: payload must match exactly; drift overwrites all of it
pub fn diff_config_map(expected: &ConfigMap, actual: &ConfigMap) -> Correction<ConfigMap> {
    if let Some(correction) = metadata_correction(expected, actual) {
        return correction;
    }

    // The API server stores an empty map as absent.
    let empty = BTreeMap::new();
    let expected_data = expected.data.as_ref().unwrap_or(&empty);
    let actual_data = actual.data.as_ref().unwrap_or(&empty);
    if expected_data != actual_data {
        let mut object = actual.clone();
        object.data = expected.data.clone();
        return update(object, ["data".to_string()]);
    }

    Correction::InSync
}

fn service_type(svc: &Service) -> &str {
    svc.spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("ClusterIP")
}

fn port_protocol(port: &ServicePort) -> &str {
    port.protocol.as_deref().unwrap_or("TCP")
}

fn port_name(port: &ServicePort) -> &str {
    port.name.as_deref().unwrap_or_default()
}

/// Endpoint: type, then per named port protocol, port and requested nodePort
///
/// Ports only present on the live object are tolerated.
pub fn diff_service(expected: &Service, actual: &Service) -> Correction<Service> {
    if let Some(correction) = metadata_correction(expected, actual) {
        return correction;
    }

    let wanted_type = service_type(expected);
    if service_type(actual) != wanted_type {
        let mut object = actual.clone();
        let spec = object.spec.get_or_insert_with(Default::default);
        spec.type_ = Some(wanted_type.to_string());
        if wanted_type == "ClusterIP" {
            // nodePort is rejected on ClusterIP Services.
            for port in spec.ports.iter_mut().flatten() {
                port.node_port = None;
            }
        }
        return update(object, ["spec.type".to_string()]);
    }

    let expected_ports = expected
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default();
    for wanted in expected_ports {
        let name = port_name(wanted);
        let mut object = actual.clone();
        let ports = object
            .spec
            .get_or_insert_with(Default::default)
            .ports
            .get_or_insert_with(Vec::new);

        let Some(live) = ports.iter_mut().find(|p| port_name(p) == name) else {
            ports.push(wanted.clone());
            return update(object, [format!("spec.ports[{name}]")]);
        };

        if port_protocol(live) != port_protocol(wanted) {
            live.protocol = wanted.protocol.clone();
            return update(object, [format!("spec.ports[{name}].protocol")]);
        }
        if live.port != wanted.port {
            live.port = wanted.port;
            return update(object, [format!("spec.ports[{name}].port")]);
        }
        if let Some(node_port) = wanted.node_port.filter(|p| *p != 0) {
            if live.node_port != Some(node_port) {
                live.node_port = Some(node_port);
                return update(object, [format!("spec.ports[{name}].nodePort")]);
            }
        }
    }

    Correction::InSync
}

/// A child the spec no longer asks for
pub fn diff_undesired<K>(actual: Option<&K>, reason: &str) -> Correction<K> {
    match actual {
        Some(_) => Correction::Delete {
            reason: reason.to_string(),
        },
        None => Correction::InSync,
    }
}

/// PodMonitor: the typed spec must match exactly
pub fn diff_pod_monitor(expected: &PodMonitor, actual: &PodMonitor) -> Correction<PodMonitor> {
    if let Some(correction) = metadata_correction(expected, actual) {
        return correction;
    }
    if expected.spec != actual.spec {
        let mut object = actual.clone();
        object.spec = expected.spec.clone();
        return update(object, ["spec".to_string()]);
    }
    Correction::InSync
}

/// The parts of a container the compiler sets
///
/// Everything else (defaulted pull policies, termination paths, canonicalized
/// quantities) is owned by the API server and ignored.
#[derive(Debug, PartialEq)]
struct ContainerShape<'a> {
    name: &'a str,
    image: Option<&'a str>,
    command: &'a [String],
    args: &'a [String],
    working_dir: Option<&'a str>,
    env: Vec<(&'a str, Option<&'a str>)>,
    mounts: Vec<(&'a str, &'a str, Option<&'a str>)>,
    ports: Vec<(Option<&'a str>, i32)>,
}

impl<'a> From<&'a Container> for ContainerShape<'a> {
    fn from(c: &'a Container) -> Self {
        Self {
            name: &c.name,
            image: c.image.as_deref(),
            command: c.command.as_deref().unwrap_or_default(),
            args: c.args.as_deref().unwrap_or_default(),
            working_dir: c.working_dir.as_deref(),
            env: c
                .env
                .iter()
                .flatten()
                .map(|e| (e.name.as_str(), e.value.as_deref()))
                .collect(),
            mounts: c
                .volume_mounts
                .iter()
                .flatten()
                .map(|m| (m.name.as_str(), m.mount_path.as_str(), m.sub_path.as_deref()))
                .collect(),
            ports: c
                .ports
                .iter()
                .flatten()
                .map(|p| (p.name.as_deref(), p.container_port))
                .collect(),
        }
    }
}

fn containers(list: Option<&Vec<Container>>) -> Vec<ContainerShape<'_>> {
    list.into_iter().flatten().map(ContainerShape::from).collect()
}

#[derive(Debug, PartialEq)]
enum VolumeShape<'a> {
    Claim(&'a str),
    ConfigMap(&'a str, Vec<(&'a str, &'a str)>),
    EmptyDir,
    Other,
}

fn volume_shapes(volumes: Option<&Vec<Volume>>) -> Vec<(&str, VolumeShape<'_>)> {
    volumes
        .into_iter()
        .flatten()
        .map(|v| {
            let shape = if let Some(claim) = &v.persistent_volume_claim {
                VolumeShape::Claim(&claim.claim_name)
            } else if let Some(cm) = &v.config_map {
                VolumeShape::ConfigMap(
                    &cm.name,
                    cm.items
                        .iter()
                        .flatten()
                        .map(|i| (i.key.as_str(), i.path.as_str()))
                        .collect(),
                )
            } else if v.empty_dir.is_some() {
                VolumeShape::EmptyDir
            } else {
                VolumeShape::Other
            };
            (v.name.as_str(), shape)
        })
        .collect()
}

/// Fields of `actual` that drifted away from the compiled template
pub fn template_drift(expected: &PodTemplateSpec, actual: &PodTemplateSpec) -> Vec<String> {
    let mut drifted = Vec::new();

    if let Some(labels) = expected.metadata.as_ref().and_then(|m| m.labels.as_ref()) {
        let actual_labels = actual.metadata.as_ref().and_then(|m| m.labels.as_ref());
        drifted.extend(
            drifted_keys(actual_labels, labels)
                .into_iter()
                .map(|k| format!("template.metadata.labels.{k}")),
        );
    }

    let (exp, act) = (expected.spec.as_ref(), actual.spec.as_ref());
    if containers(exp.and_then(|s| s.init_containers.as_ref()))
        != containers(act.and_then(|s| s.init_containers.as_ref()))
    {
        drifted.push("template.spec.initContainers".to_string());
    }
    if containers(exp.map(|s| &s.containers)) != containers(act.map(|s| &s.containers)) {
        drifted.push("template.spec.containers".to_string());
    }
    if volume_shapes(exp.and_then(|s| s.volumes.as_ref()))
        != volume_shapes(act.and_then(|s| s.volumes.as_ref()))
    {
        drifted.push("template.spec.volumes".to_string());
    }

    drifted
}

/// Workload: ownership and labels are fixed in place; template drift follows `policy`
pub fn diff_replica_set(
    expected: &ReplicaSet,
    actual: &ReplicaSet,
    policy: TemplateDriftPolicy,
) -> Correction<ReplicaSet> {
    if let Some(correction) = metadata_correction(expected, actual) {
        return correction;
    }

    let template = |rs: &ReplicaSet| {
        rs.spec
            .as_ref()
            .and_then(|s| s.template.clone())
            .unwrap_or_default()
    };
    let drifted = template_drift(&template(expected), &template(actual));
    if drifted.is_empty() {
        return Correction::InSync;
    }

    match policy {
        TemplateDriftPolicy::Tolerate => Correction::Tolerated { drifted },
        TemplateDriftPolicy::Recreate => Correction::Delete {
            reason: format!("workload template drifted: {}", drifted.join(", ")),
        },
    }
}
