//! Workload template: one ReplicaSet running the server process
//!
//! Init steps stage everything the read-only main container needs: the
//! server binary, plugins, configuration copied into a writable working
//! directory and optional datapacks.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, KeyToPath,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use minecraft_common::crd::{ForgeSpec, MinecraftServer, MinecraftServerSpec, PluginSpec};
use minecraft_common::{Error, DYNMAP_PORT, METRICS_PORT, MINECRAFT_PORT};
use minecraft_versions::Artifact;

use super::config_bundle::{files, DYNMAP_TILES_PATH};
use super::ServerIdentity;
use crate::artifacts::{ResolvedArtifacts, ServerArtifact};

/// Volume names in the pod template
pub mod volumes {
    pub const CONFIG: &str = "config";
    pub const PAPER_JAR: &str = "paper-jar";
    pub const PAPER_WORKINGDIR: &str = "paper-workingdir";
    pub const DATA_PACKS: &str = "data-packs";
    pub const WORLD_OVERWORLD: &str = "world-overworld";
    pub const WORLD_NETHER: &str = "world-nether";
    pub const WORLD_THE_END: &str = "world-the-end";
    pub const PROMETHEUS_EXPORTER_CONFIG: &str = "prometheus-exporter-config";
    pub const DYNMAP_CONFIG: &str = "dynmap-config";
    pub const DYNMAP_RENDER: &str = "dynmap-render";
    pub const FORGE_INSTALLER_JAR: &str = "forge-installer-jar";
    pub const FORGE_WORKINGDIR: &str = "forge-workingdir";
    pub const INSTALLER_TMP: &str = "installer-tmp";
    pub const MODPACK_ZIP: &str = "modpack-zip";
}

const DOWNLOAD_IMAGE: &str = "ghcr.io/jameslaverack/download:edge";
const BUSYBOX_IMAGE: &str = "busybox";
const DEFAULT_JAVA_VERSION: &str = "17";
const SERVER_UID: i64 = 1000;

const CONFIG_DIR: &str = "/etc/minecraft";
const WORKING_DIR: &str = "/run/minecraft";
const INSTALL_DIR: &str = "/usr/local/minecraft";
const PLUGINS_DIR: &str = "/usr/local/minecraft/plugins";
const DATAPACKS_DIR: &str = "/var/minecraft/world/datapacks";
const DOWNLOAD_DIR: &str = "/download";

fn java_image(spec: &MinecraftServerSpec) -> String {
    format!(
        "eclipse-temurin:{}",
        spec.java_version.as_deref().unwrap_or(DEFAULT_JAVA_VERSION)
    )
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn file_mount(name: &str, path: &str, sub_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: Some(sub_path.to_string()),
        read_only: Some(true),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn claim_or_empty_dir(name: &str, claim: Option<&PersistentVolumeClaimVolumeSource>) -> Volume {
    match claim {
        Some(claim) => Volume {
            name: name.to_string(),
            persistent_volume_claim: Some(claim.clone()),
            ..Default::default()
        },
        None => empty_dir(name),
    }
}

fn config_map_volume(name: &str, config_map: String, items: Option<Vec<KeyToPath>>) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map,
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Container names must be DNS labels; plugin names are free-form
fn dns_label(raw: &str) -> String {
    let label: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    label.trim_matches('-').to_string()
}

/// Init step fetching `url` into `/download/<target>` and verifying its checksum
fn download_step(
    name: impl Into<String>,
    url: &str,
    sha256: Option<&str>,
    target: &str,
    volume: &str,
) -> Container {
    let mut vars = vec![
        env("DOWNLOAD_URL", url),
        env("DOWNLOAD_TARGET", format!("{DOWNLOAD_DIR}/{target}")),
    ];
    if let Some(sha) = sha256.filter(|s| !s.is_empty()) {
        vars.push(env("DOWNLOAD_SHA256", sha));
    }
    Container {
        name: name.into(),
        image: Some(DOWNLOAD_IMAGE.to_string()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(vars),
        volume_mounts: Some(vec![mount(volume, DOWNLOAD_DIR)]),
        ..Default::default()
    }
}

fn copy_config_step(working_dir_volume: &str) -> Container {
    Container {
        name: "copy-config".to_string(),
        image: Some(BUSYBOX_IMAGE.to_string()),
        args: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp {CONFIG_DIR}/* {WORKING_DIR}/"),
        ]),
        volume_mounts: Some(vec![
            mount(volumes::CONFIG, CONFIG_DIR),
            mount(working_dir_volume, WORKING_DIR),
        ]),
        ..Default::default()
    }
}

fn datapacks_step(bundle_url: &str) -> Container {
    Container {
        name: "install-vanillatweaks".to_string(),
        image: Some(BUSYBOX_IMAGE.to_string()),
        args: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cd {DATAPACKS_DIR} && wget -O vt.zip '{bundle_url}' && unzip vt.zip && rm vt.zip"),
        ]),
        volume_mounts: Some(vec![mount(volumes::DATA_PACKS, DATAPACKS_DIR)]),
        ..Default::default()
    }
}

/// Kubernetes caps container names at one DNS label
const MAX_CONTAINER_NAME: usize = 63;

/// Jar the map renderer plugin is downloaded as
const DYNMAP_JAR: &str = "dynmap";

/// Plugin names become jar file names under the plugins directory
fn validate_plugins(id: &ServerIdentity, plugins: &[PluginSpec]) -> Result<(), Error> {
    let mut seen = BTreeMap::new();
    for (i, plugin) in plugins.iter().enumerate() {
        let field = format!("spec.plugins[{i}].name");
        let name = plugin.name.as_str();
        let reject = |msg: String| Error::compilation_for_field(&id.name, &field, msg);

        if name.trim().is_empty() {
            return Err(reject("plugin name must not be empty".to_string()));
        }
        if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
            return Err(reject(format!(
                "plugin name {name:?} must be a plain file name"
            )));
        }
        let key = name.to_ascii_lowercase();
        if key == DYNMAP_JAR {
            return Err(reject(format!(
                "plugin name {name:?} is reserved for the map renderer"
            )));
        }
        if let Some(first) = seen.insert(key, i) {
            return Err(reject(format!(
                "plugin name {name:?} is already used by spec.plugins[{first}]"
            )));
        }
    }
    Ok(())
}

/// `download-plugin-<index>-<label>`, cut to fit a container name
fn plugin_container_name(index: usize, name: &str) -> String {
    let mut full = format!("download-plugin-{index}-{}", dns_label(name));
    full.truncate(MAX_CONTAINER_NAME);
    full.trim_end_matches('-').to_string()
}

fn plugin_steps(id: &ServerIdentity, plugins: &[PluginSpec]) -> Result<Vec<Container>, Error> {
    validate_plugins(id, plugins)?;
    Ok(plugins
        .iter()
        .enumerate()
        .map(|(i, plugin)| {
            download_step(
                plugin_container_name(i, &plugin.name),
                &plugin.url,
                Some(&plugin.sha256),
                &format!("plugins/{}.jar", plugin.name),
                volumes::PAPER_JAR,
            )
        })
        .collect())
}

fn server_resources() -> ResourceRequirements {
    // No CPU limit, throttling stalls the tick loop.
    ResourceRequirements {
        limits: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("6Gi".to_string()),
        )])),
        requests: Some(BTreeMap::from([
            ("memory".to_string(), Quantity("2.5Gi".to_string())),
            ("cpu".to_string(), Quantity("2".to_string())),
        ])),
        ..Default::default()
    }
}

/// Non-root, read-only root filesystem, no privilege escalation
pub fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        privileged: Some(false),
        run_as_user: Some(SERVER_UID),
        run_as_group: Some(SERVER_UID),
        run_as_non_root: Some(true),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        ..Default::default()
    }
}

/// Volumes, mounts and ports contributed by optional features
#[derive(Default)]
struct Features {
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
    ports: Vec<ContainerPort>,
}

fn optional_features(id: &ServerIdentity, spec: &MinecraftServerSpec) -> Features {
    let mut features = Features::default();

    if spec.monitoring_enabled() {
        features.volumes.push(config_map_volume(
            volumes::PROMETHEUS_EXPORTER_CONFIG,
            id.config_map_name(),
            Some(vec![KeyToPath {
                key: files::PROMETHEUS_EXPORTER.to_string(),
                path: "config.yml".to_string(),
                ..Default::default()
            }]),
        ));
        features.mounts.push(file_mount(
            volumes::PROMETHEUS_EXPORTER_CONFIG,
            &format!("{PLUGINS_DIR}/PrometheusExporter/config.yml"),
            "config.yml",
        ));
        features.ports.push(tcp_port("metrics", METRICS_PORT));
    }

    if let Some(dynmap) = spec.dynmap.as_ref().filter(|d| d.enabled) {
        features.volumes.push(config_map_volume(
            volumes::DYNMAP_CONFIG,
            id.dynmap_name(),
            None,
        ));
        features.volumes.push(claim_or_empty_dir(
            volumes::DYNMAP_RENDER,
            dynmap.persistent_volume_claim.as_ref(),
        ));
        features.mounts.push(file_mount(
            volumes::DYNMAP_CONFIG,
            &format!("{PLUGINS_DIR}/dynmap/{}", files::DYNMAP_CONFIGURATION),
            files::DYNMAP_CONFIGURATION,
        ));
        features.mounts.push(mount(volumes::DYNMAP_RENDER, DYNMAP_TILES_PATH));
        features.ports.push(tcp_port("dynmap", DYNMAP_PORT));
    }

    features
}

fn world_volumes(spec: &MinecraftServerSpec) -> Vec<Volume> {
    let world = spec.world.as_ref();
    vec![
        claim_or_empty_dir(
            volumes::WORLD_OVERWORLD,
            world.and_then(|w| w.overworld.as_ref()),
        ),
        claim_or_empty_dir(volumes::WORLD_NETHER, world.and_then(|w| w.nether.as_ref())),
        claim_or_empty_dir(
            volumes::WORLD_THE_END,
            world.and_then(|w| w.the_end.as_ref()),
        ),
    ]
}

fn paper_pod(
    id: &ServerIdentity,
    spec: &MinecraftServerSpec,
    jar: &Artifact,
    datapack_bundle: Option<&str>,
) -> Result<PodSpec, Error> {
    let mut init = vec![download_step(
        "download",
        &jar.url,
        Some(&jar.sha256),
        "paper.jar",
        volumes::PAPER_JAR,
    )];
    init.extend(plugin_steps(id, &spec.plugins)?);
    if let Some(url) = spec.dynmap.as_ref().and_then(|d| d.plugin_url.as_deref()) {
        init.push(download_step(
            "download-dynmap",
            url,
            spec.dynmap.as_ref().and_then(|d| d.plugin_sha256.as_deref()),
            &format!("plugins/{DYNMAP_JAR}.jar"),
            volumes::PAPER_JAR,
        ));
    }
    init.push(copy_config_step(volumes::PAPER_WORKINGDIR));
    if let Some(url) = datapack_bundle {
        init.push(datapacks_step(url));
    }

    let features = optional_features(id, spec);

    let mut ports = vec![tcp_port("minecraft", MINECRAFT_PORT)];
    ports.extend(features.ports);

    let mut mounts = vec![
        mount(volumes::CONFIG, CONFIG_DIR),
        mount(volumes::PAPER_WORKINGDIR, WORKING_DIR),
        mount(volumes::PAPER_JAR, INSTALL_DIR),
        mount(volumes::WORLD_OVERWORLD, "/var/minecraft/world"),
        mount(volumes::WORLD_NETHER, "/var/minecraft/world_nether"),
        mount(volumes::WORLD_THE_END, "/var/minecraft/world_the_end"),
        mount(volumes::DATA_PACKS, DATAPACKS_DIR),
    ];
    mounts.extend(features.mounts);

    let server = Container {
        name: "minecraft".to_string(),
        image: Some(java_image(spec)),
        args: Some(
            [
                "java",
                "-jar",
                "/usr/local/minecraft/paper.jar",
                "--world-container=/var/minecraft",
                "--plugins=/usr/local/minecraft/plugins",
                "--log-append=false",
                "--nogui",
            ]
            .map(String::from)
            .to_vec(),
        ),
        working_dir: Some(WORKING_DIR.to_string()),
        security_context: Some(restricted_security_context()),
        resources: Some(server_resources()),
        ports: Some(ports),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    let mut pod_volumes = vec![
        config_map_volume(volumes::CONFIG, id.config_map_name(), None),
        empty_dir(volumes::PAPER_JAR),
        empty_dir(volumes::PAPER_WORKINGDIR),
        empty_dir(volumes::DATA_PACKS),
    ];
    pod_volumes.extend(world_volumes(spec));
    pod_volumes.extend(features.volumes);

    Ok(PodSpec {
        init_containers: Some(init),
        containers: vec![server],
        volumes: Some(pod_volumes),
        ..Default::default()
    })
}

fn forge_pod(
    id: &ServerIdentity,
    spec: &MinecraftServerSpec,
    forge: &ForgeSpec,
    installer: &Artifact,
) -> PodSpec {
    let installer_step = Container {
        name: "forge-installer".to_string(),
        image: Some(java_image(spec)),
        args: Some(
            [
                "java",
                "-jar",
                "/usr/local/minecraft/forge-installer.jar",
                "--installServer=/run/minecraft",
            ]
            .map(String::from)
            .to_vec(),
        ),
        working_dir: Some(INSTALL_DIR.to_string()),
        resources: Some(server_resources()),
        volume_mounts: Some(vec![
            mount(volumes::FORGE_INSTALLER_JAR, INSTALL_DIR),
            mount(volumes::FORGE_WORKINGDIR, WORKING_DIR),
            mount(volumes::INSTALLER_TMP, "/tmp"),
        ]),
        ..Default::default()
    };

    let unzip_step = Container {
        name: "unzip-modpack".to_string(),
        image: Some(BUSYBOX_IMAGE.to_string()),
        args: Some(
            ["unzip", "-o", "/usr/local/modpack/modpack.zip", "-d", WORKING_DIR]
                .map(String::from)
                .to_vec(),
        ),
        volume_mounts: Some(vec![
            mount(volumes::MODPACK_ZIP, "/usr/local/modpack"),
            mount(volumes::FORGE_WORKINGDIR, WORKING_DIR),
        ]),
        ..Default::default()
    };

    let init = vec![
        download_step(
            "download-forge-installer",
            &installer.url,
            Some(&installer.sha256),
            "forge-installer.jar",
            volumes::FORGE_INSTALLER_JAR,
        ),
        installer_step,
        download_step(
            "download-modpack",
            &forge.modpack_zip_url,
            Some(&forge.modpack_zip_sha256_sum),
            "modpack.zip",
            volumes::MODPACK_ZIP,
        ),
        unzip_step,
        copy_config_step(volumes::FORGE_WORKINGDIR),
    ];

    let server = Container {
        name: "minecraft".to_string(),
        image: Some(java_image(spec)),
        args: Some(["sh", "run.sh", "--nogui"].map(String::from).to_vec()),
        working_dir: Some(WORKING_DIR.to_string()),
        security_context: Some(restricted_security_context()),
        resources: Some(server_resources()),
        ports: Some(vec![tcp_port("minecraft", MINECRAFT_PORT)]),
        volume_mounts: Some(vec![
            mount(volumes::FORGE_WORKINGDIR, WORKING_DIR),
            mount(volumes::INSTALLER_TMP, "/tmp"),
            mount(volumes::WORLD_OVERWORLD, "/run/minecraft/world"),
            mount(volumes::WORLD_NETHER, "/run/minecraft/world_nether"),
            mount(volumes::WORLD_THE_END, "/run/minecraft/world_the_end"),
            mount(volumes::DATA_PACKS, "/run/minecraft/world/datapacks"),
        ]),
        ..Default::default()
    };

    let mut pod_volumes = vec![
        config_map_volume(volumes::CONFIG, id.config_map_name(), None),
        empty_dir(volumes::FORGE_INSTALLER_JAR),
        empty_dir(volumes::FORGE_WORKINGDIR),
        empty_dir(volumes::INSTALLER_TMP),
        empty_dir(volumes::MODPACK_ZIP),
        empty_dir(volumes::DATA_PACKS),
    ];
    pod_volumes.extend(world_volumes(spec));

    PodSpec {
        init_containers: Some(init),
        containers: vec![server],
        volumes: Some(pod_volumes),
        ..Default::default()
    }
}

/// The server's ReplicaSet
pub fn compile_replica_set(
    id: &ServerIdentity,
    server: &MinecraftServer,
    artifacts: &ResolvedArtifacts,
) -> Result<ReplicaSet, Error> {
    let spec = &server.spec;
    let pod = match &artifacts.server {
        ServerArtifact::Paper(jar) => {
            paper_pod(id, spec, jar, artifacts.datapack_bundle.as_deref())?
        }
        ServerArtifact::Forge(installer) => {
            let forge = spec.forge.as_ref().ok_or_else(|| {
                Error::compilation_for_field(
                    server.name_any(),
                    "spec.forge",
                    "server type Forge requires forge settings",
                )
            })?;
            forge_pod(id, spec, forge, installer)
        }
    };

    Ok(ReplicaSet {
        metadata: id.child_meta(id.replica_set_name()),
        spec: Some(ReplicaSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(id.labels.clone()),
                ..Default::default()
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(id.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(pod),
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
