//! MinecraftServer compiler
//!
//! Pure functions from a server (plus artifacts resolved before the pass) to
//! the children it should own. Nothing here performs I/O, and identical input
//! always yields identical output, which is what lets the diff engine compare
//! compiled objects against live ones pass after pass.
//!
//! Child names are derived from the server name alone, so recompilation always
//! targets the same objects.

mod config_bundle;
mod pod_monitor;
pub mod properties;
mod services;
mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use minecraft_common::crd::{MinecraftServer, PodMonitor};
use minecraft_common::labels::pod_labels;
use minecraft_common::ownership::controller_owner_ref;
use minecraft_common::Error;

use crate::artifacts::ResolvedArtifacts;

pub use config_bundle::{
    compile_config_map, compile_dynmap_config_map, config_bundle_data, files, ExporterMetrics,
    PrometheusExporterConfig, DYNMAP_TILES_PATH,
};
pub use pod_monitor::compile_pod_monitor;
pub use services::{compile_dynmap_service, compile_rcon_service, compile_service};
pub use workload::{compile_replica_set, restricted_security_context, volumes};

/// Name of the remote console Service of `server_name`
pub fn rcon_service_name(server_name: &str) -> String {
    format!("{server_name}-rcon")
}

/// Name of the map renderer's ConfigMap and Service of `server_name`
pub fn dynmap_name(server_name: &str) -> String {
    format!("{server_name}-dynmap")
}

/// Identity shared by every child of one server
#[derive(Clone, Debug)]
pub struct ServerIdentity {
    /// Server name
    pub name: String,
    /// Namespace of the server and all its children
    pub namespace: String,
    /// Controller reference every child carries
    pub owner: OwnerReference,
    /// Labels every child carries; also the pod selector
    pub labels: BTreeMap<String, String>,
}

impl ServerIdentity {
    /// Identity of a persisted server
    pub fn of(server: &MinecraftServer) -> Result<Self, Error> {
        let name = server.name_any();
        let namespace = server.namespace().ok_or_else(|| {
            Error::internal_with_context("compiler", format!("server {name} has no namespace"))
        })?;
        Ok(Self {
            owner: controller_owner_ref(server)?,
            labels: pod_labels(&name),
            name,
            namespace,
        })
    }

    /// Metadata for a child called `name`
    pub fn child_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels.clone()),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }

    /// Configuration bundle, named after the server
    pub fn config_map_name(&self) -> String {
        self.name.clone()
    }

    /// Player-facing Service
    pub fn service_name(&self) -> String {
        self.name.clone()
    }

    /// In-cluster remote console Service, `<name>-rcon`
    pub fn rcon_service_name(&self) -> String {
        rcon_service_name(&self.name)
    }

    /// Map renderer ConfigMap and Service, `<name>-dynmap`
    pub fn dynmap_name(&self) -> String {
        dynmap_name(&self.name)
    }

    /// ReplicaSet running the server pod
    pub fn replica_set_name(&self) -> String {
        self.name.clone()
    }

    /// PodMonitor scraping the metrics exporter
    pub fn pod_monitor_name(&self) -> String {
        self.name.clone()
    }
}

/// Map renderer children, present only when map rendering is enabled
#[derive(Clone, Debug)]
pub struct DynmapChildren {
    /// Renderer configuration mounted into the plugin directory
    pub config_map: ConfigMap,
    /// ClusterIP Service in front of the renderer's web server
    pub service: Service,
}

/// Every child a server should own, in convergence order
#[derive(Clone, Debug)]
pub struct CompiledServer {
    /// Server configuration bundle
    pub config_map: ConfigMap,
    /// `None` means the map renderer children must not exist
    pub dynmap: Option<DynmapChildren>,
    /// `None` means a primary Service must not exist
    pub service: Option<Service>,
    /// Remote console Service, always present
    pub rcon_service: Service,
    /// `None` means a PodMonitor must not exist
    pub pod_monitor: Option<PodMonitor>,
    /// The server workload, converged last
    pub replica_set: ReplicaSet,
}

/// Compile every child of `server`
pub fn compile(
    server: &MinecraftServer,
    artifacts: &ResolvedArtifacts,
) -> Result<CompiledServer, Error> {
    let id = ServerIdentity::of(server)?;
    let spec = &server.spec;

    // Metrics and map rendering are Paper plugins; a Forge pod has neither.
    let plugins = artifacts.server.hosts_plugins();

    let dynmap = if plugins && spec.dynmap_enabled() {
        Some(DynmapChildren {
            config_map: compile_dynmap_config_map(&id)?,
            service: compile_dynmap_service(&id),
        })
    } else {
        None
    };

    Ok(CompiledServer {
        config_map: compile_config_map(&id, spec, &artifacts.minecraft_version)?,
        dynmap,
        service: compile_service(&id, spec),
        rcon_service: compile_rcon_service(&id),
        pod_monitor: (plugins && spec.monitoring_enabled()).then(|| compile_pod_monitor(&id)),
        replica_set: compile_replica_set(&id, server, artifacts)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::ServerArtifact;
    use minecraft_common::crd::{MinecraftServerSpec, MonitoringSpec, MonitoringType};
    use minecraft_versions::Artifact;

    pub(crate) fn server_with(spec: MinecraftServerSpec) -> MinecraftServer {
        let mut server = MinecraftServer::new("survival", spec);
        server.metadata.namespace = Some("games".to_string());
        server.metadata.uid = Some("uid-survival".to_string());
        server
    }

    pub(crate) fn identity() -> ServerIdentity {
        ServerIdentity::of(&server_with(MinecraftServerSpec::default())).expect("identity")
    }

    pub(crate) fn paper_artifacts() -> ResolvedArtifacts {
        ResolvedArtifacts {
            minecraft_version: "1.18.2".to_string(),
            server: ServerArtifact::Paper(Artifact {
                url: "https://api.papermc.io/v2/projects/paper/versions/1.18.2/builds/388/downloads/paper-1.18.2-388.jar".to_string(),
                sha256: "abc123".to_string(),
            }),
            datapack_bundle: None,
        }
    }

    #[test]
    fn every_child_is_owned_and_labelled() {
        let server = server_with(MinecraftServerSpec {
            service: Some(minecraft_common::crd::ServerServiceSpec {
                service_type: minecraft_common::crd::ServiceType::NodePort,
                minecraft_node_port: None,
            }),
            monitoring: Some(MonitoringSpec {
                monitoring_type: MonitoringType::PrometheusServiceMonitor,
            }),
            dynmap: Some(minecraft_common::crd::DynmapSpec {
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        });
        let compiled = compile(&server, &paper_artifacts()).expect("compile");
        let dynmap = compiled.dynmap.as_ref().expect("dynmap children");
        let service = compiled.service.as_ref().expect("service");
        let pod_monitor = compiled.pod_monitor.as_ref().expect("pod monitor");

        let metas = [
            &compiled.config_map.metadata,
            &dynmap.config_map.metadata,
            &dynmap.service.metadata,
            &service.metadata,
            &compiled.rcon_service.metadata,
            &pod_monitor.metadata,
            &compiled.replica_set.metadata,
        ];
        let id = identity();
        for meta in metas {
            assert_eq!(meta.namespace.as_deref(), Some("games"));
            assert_eq!(meta.owner_references.as_deref(), Some([id.owner.clone()].as_slice()));
            assert_eq!(meta.labels.as_ref(), Some(&id.labels));
        }
    }

    #[test]
    fn disabled_features_compile_to_nothing() {
        let compiled = compile(&server_with(MinecraftServerSpec::default()), &paper_artifacts())
            .expect("compile");
        assert!(compiled.dynmap.is_none());
        assert!(compiled.service.is_none());
        assert!(compiled.pod_monitor.is_none());
        assert_eq!(compiled.rcon_service.metadata.name.as_deref(), Some("survival-rcon"));
    }

    #[test]
    fn child_names_derive_from_the_server_name() {
        let id = identity();
        assert_eq!(id.config_map_name(), "survival");
        assert_eq!(id.service_name(), "survival");
        assert_eq!(id.rcon_service_name(), "survival-rcon");
        assert_eq!(id.dynmap_name(), "survival-dynmap");
        assert_eq!(id.replica_set_name(), "survival");
        assert_eq!(id.pod_monitor_name(), "survival");
    }

    #[test]
    fn forge_server_gets_no_plugin_children() {
        let server = server_with(MinecraftServerSpec {
            server_type: minecraft_common::crd::ServerType::Forge,
            forge: Some(minecraft_common::crd::ForgeSpec {
                forge_version: "40.1.80".to_string(),
                forge_installer_sha256_sum: "f00d".to_string(),
                modpack_zip_url: "https://example.invalid/pack.zip".to_string(),
                modpack_zip_sha256_sum: "beef".to_string(),
            }),
            monitoring: Some(MonitoringSpec {
                monitoring_type: MonitoringType::PrometheusServiceMonitor,
            }),
            dynmap: Some(minecraft_common::crd::DynmapSpec {
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        });
        let artifacts = ResolvedArtifacts {
            minecraft_version: "1.18.2".to_string(),
            server: ServerArtifact::Forge(Artifact {
                url: "https://maven.minecraftforge.net/x-installer.jar".to_string(),
                sha256: "f00d".to_string(),
            }),
            datapack_bundle: None,
        };

        let compiled = compile(&server, &artifacts).expect("compile");
        assert!(compiled.dynmap.is_none());
        assert!(compiled.pod_monitor.is_none());
    }

    #[test]
    fn server_without_namespace_cannot_be_compiled() {
        let mut server = server_with(MinecraftServerSpec::default());
        server.metadata.namespace = None;
        assert!(ServerIdentity::of(&server).is_err());
    }
}
