//! MinecraftServer Custom Resource Definition
//!
//! A MinecraftServer declares one long-running game server. The operator
//! compiles it into a configuration bundle, a ReplicaSet, Services and
//! (optionally) a PodMonitor, all owned by the server object.

use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether the Minecraft EULA has been accepted for this server
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum EulaAcceptance {
    /// The server will refuse to start
    #[default]
    NotAccepted,
    /// The EULA was explicitly accepted
    Accepted,
}

/// Server software distribution
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServerType {
    /// PaperMC, downloaded from the Paper build index
    #[default]
    Paper,
    /// Minecraft Forge with a modpack
    Forge,
}

/// Who may join the server
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AccessMode {
    /// Anyone may join
    #[default]
    Public,
    /// Only players on the allow list may join
    AllowListOnly,
}

/// Default game mode for players
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum GameMode {
    /// Survival
    Survival,
    /// Creative
    Creative,
    /// Adventure
    Adventure,
    /// Spectator
    Spectator,
}

impl GameMode {
    /// Value used in server.properties
    pub fn as_property(&self) -> &'static str {
        match self {
            Self::Survival => "survival",
            Self::Creative => "creative",
            Self::Adventure => "adventure",
            Self::Spectator => "spectator",
        }
    }
}

/// A player entry on the allow or ops list
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Player {
    /// Player name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Player UUID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

/// Persistent world storage, one claim per dimension
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorldSpec {
    /// World generation seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,

    /// Claim holding the overworld
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overworld: Option<PersistentVolumeClaimVolumeSource>,

    /// Claim holding the nether
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nether: Option<PersistentVolumeClaimVolumeSource>,

    /// Claim holding the end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_end: Option<PersistentVolumeClaimVolumeSource>,
}

/// How the game port is exposed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    /// No primary Service
    #[default]
    None,
    /// In-cluster only
    ClusterIP,
    /// Exposed on every node
    NodePort,
    /// Cloud load balancer
    LoadBalancer,
}

impl ServiceType {
    /// Kubernetes Service type, or None when no Service is wanted
    pub fn as_kubernetes(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::ClusterIP => Some("ClusterIP"),
            Self::NodePort => Some("NodePort"),
            Self::LoadBalancer => Some("LoadBalancer"),
        }
    }
}

/// Primary Service configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerServiceSpec {
    /// Service type
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,

    /// Fixed node port for the game port (NodePort/LoadBalancer only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_node_port: Option<i32>,
}

/// A VanillaTweaks datapack selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct VanillaTweaksDatapack {
    /// Datapack name as listed on vanillatweaks.net
    pub name: String,
    /// Category the datapack belongs to
    pub category: String,
}

/// VanillaTweaks content
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VanillaTweaksSpec {
    /// Datapacks to install into the world
    #[serde(default)]
    pub datapacks: Vec<VanillaTweaksDatapack>,
}

/// An extra plugin jar downloaded into the plugins directory
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PluginSpec {
    /// Short name, used for the jar file and init container
    pub name: String,
    /// Download URL
    pub url: String,
    /// Expected SHA-256 of the jar
    pub sha256: String,
}

/// Metrics collection mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum MonitoringType {
    /// No metrics
    #[default]
    Disabled,
    /// Prometheus exporter plugin plus a PodMonitor
    PrometheusServiceMonitor,
}

/// Monitoring configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MonitoringSpec {
    /// Metrics collection mode
    #[serde(rename = "type", default)]
    pub monitoring_type: MonitoringType,
}

/// Map renderer configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynmapSpec {
    /// Whether the map renderer is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Claim holding rendered tiles; emptyDir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,

    /// Plugin jar download URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_url: Option<String>,

    /// Plugin jar SHA-256
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_sha256: Option<String>,
}

/// Forge installation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForgeSpec {
    /// Forge version, e.g. "40.1.0"
    pub forge_version: String,
    /// SHA-256 of the Forge installer jar
    pub forge_installer_sha256_sum: String,
    /// Modpack zip URL
    pub modpack_zip_url: String,
    /// SHA-256 of the modpack zip
    pub modpack_zip_sha256_sum: String,
}

/// Lifecycle state of a MinecraftServer
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServerState {
    /// Children are still being created or corrected
    #[default]
    Pending,
    /// Every child resource has settled
    Running,
    /// The spec could not be compiled
    Error,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Status of a MinecraftServer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServerStatus {
    /// Current state
    #[serde(default)]
    pub state: ServerState,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Specification for a MinecraftServer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "minecraft.jameslaverack.com",
    version = "v1alpha1",
    kind = "MinecraftServer",
    plural = "minecraftservers",
    shortname = "mcs",
    namespaced,
    status = "MinecraftServerStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.minecraftVersion"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServerSpec {
    /// EULA acceptance
    #[serde(default)]
    pub eula: EulaAcceptance,

    /// Minecraft version, e.g. "1.18.2", or an alias such as "latest"
    pub minecraft_version: String,

    /// Server distribution
    #[serde(rename = "type", default)]
    pub server_type: ServerType,

    /// Pin a Paper build instead of using the newest one for the version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_build: Option<u32>,

    /// Java major version for the runtime image (default 17)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_version: Option<String>,

    /// Who may join
    #[serde(default)]
    pub access_mode: AccessMode,

    /// Players allowed to join when access is restricted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_list: Vec<Player>,

    /// Server operators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops_list: Vec<Player>,

    /// Persistent world storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<WorldSpec>,

    /// Message of the day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,

    /// Default game mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<GameMode>,

    /// Maximum concurrent players (0 leaves the server default)
    #[serde(default)]
    pub max_players: u32,

    /// View distance in chunks (0 leaves the server default)
    #[serde(default)]
    pub view_distance: u32,

    /// Primary Service; absent means no Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServerServiceSpec>,

    /// VanillaTweaks datapacks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vanilla_tweaks: Option<VanillaTweaksSpec>,

    /// Additional plugin jars
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,

    /// Metrics collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,

    /// Map renderer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynmap: Option<DynmapSpec>,

    /// Forge installation (required for type Forge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forge: Option<ForgeSpec>,
}

impl MinecraftServerSpec {
    /// Whether Prometheus monitoring is requested
    pub fn monitoring_enabled(&self) -> bool {
        matches!(
            self.monitoring,
            Some(MonitoringSpec {
                monitoring_type: MonitoringType::PrometheusServiceMonitor
            })
        )
    }

    /// Whether the map renderer is requested
    pub fn dynmap_enabled(&self) -> bool {
        self.dynmap.as_ref().is_some_and(|d| d.enabled)
    }

    /// Kubernetes Service type for the primary endpoint, None when undesired
    pub fn primary_service_type(&self) -> Option<&'static str> {
        self.service
            .as_ref()
            .and_then(|s| s.service_type.as_kubernetes())
    }
}
