//! Configuration bundles: the server's files, and the map renderer's

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Serialize;

use minecraft_common::crd::{EulaAcceptance, MinecraftServerSpec, Player};
use minecraft_common::{Error, DYNMAP_PORT, METRICS_PORT};
use minecraft_versions::vanilla_tweaks;

use super::properties::server_properties;
use super::ServerIdentity;

/// File names inside the server bundle
pub mod files {
    /// Game settings
    pub const SERVER_PROPERTIES: &str = "server.properties";
    /// EULA acceptance marker
    pub const EULA: &str = "eula.txt";
    /// Allow list
    pub const WHITELIST: &str = "whitelist.json";
    /// Operators
    pub const OPS: &str = "ops.json";
    /// Datapack selection
    pub const VANILLA_TWEAKS: &str = "vanilla_tweaks.json";
    /// Prometheus exporter plugin settings
    pub const PROMETHEUS_EXPORTER: &str = "prometheus_exporter_config.yaml";
    /// Map renderer settings (map-render bundle)
    pub const DYNMAP_CONFIGURATION: &str = "configuration.txt";
}

/// Where the map renderer stores its tiles inside the pod
pub const DYNMAP_TILES_PATH: &str = "/var/dynmap/tiles";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpEntry<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    uuid: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
    level: u8,
    bypasses_player_limit: &'static str,
}

impl<'a> From<&'a Player> for OpEntry<'a> {
    fn from(player: &'a Player) -> Self {
        Self {
            uuid: &player.uuid,
            name: &player.name,
            level: 4,
            bypasses_player_limit: "false",
        }
    }
}

#[derive(Serialize)]
struct VanillaTweaksFile<'a> {
    version: &'a str,
    packs: BTreeMap<String, Vec<String>>,
}

/// Per-metric switches of the Prometheus exporter plugin
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExporterMetrics {
    pub jvm_threads: bool,
    pub jvm_gc: bool,
    pub players_total: bool,
    pub entities_total: bool,
    pub living_entities_total: bool,
    pub loaded_chunks_total: bool,
    pub jvm_memory: bool,
    pub players_online_total: bool,
    pub tps: bool,
    pub tick_duration_average: bool,
    pub tick_duration_median: bool,
    pub tick_duration_min: bool,
    pub tick_duration_max: bool,
    pub player_online: bool,
    pub player_statistic: bool,
}

impl Default for ExporterMetrics {
    // The plugin's own defaults; per-player series stay off.
    fn default() -> Self {
        Self {
            jvm_threads: true,
            jvm_gc: true,
            players_total: true,
            entities_total: true,
            living_entities_total: true,
            loaded_chunks_total: true,
            jvm_memory: true,
            players_online_total: true,
            tps: true,
            tick_duration_average: true,
            tick_duration_median: true,
            tick_duration_min: false,
            tick_duration_max: true,
            player_online: false,
            player_statistic: false,
        }
    }
}

/// Prometheus exporter plugin configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrometheusExporterConfig {
    /// Bind address; the plugin defaults to localhost, which is unreachable from a scraper
    pub host: String,
    /// Listen port
    pub port: i32,
    /// Enabled series
    pub enable_metrics: ExporterMetrics,
}

impl Default for PrometheusExporterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: METRICS_PORT,
            enable_metrics: ExporterMetrics::default(),
        }
    }
}

#[derive(Serialize)]
struct DynmapStorage {
    #[serde(rename = "type")]
    storage_type: &'static str,
    tilespath: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct DynmapConfiguration {
    storage: DynmapStorage,
    webserver_bindaddress: &'static str,
    webserver_port: i32,
}

fn to_json<T: Serialize + ?Sized>(file: &str, value: &T) -> Result<String, Error> {
    serde_json::to_string(value)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", format!("{file}: {e}")))
}

fn to_yaml<T: Serialize>(file: &str, value: &T) -> Result<String, Error> {
    serde_yaml::to_string(value)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", format!("{file}: {e}")))
}

/// Files of the server bundle
///
/// `minecraft_version` is the resolved version; datapack selection is keyed by
/// its major.minor prefix.
pub fn config_bundle_data(
    spec: &MinecraftServerSpec,
    minecraft_version: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let mut data = BTreeMap::new();

    data.insert(
        files::SERVER_PROPERTIES.to_string(),
        server_properties(spec).render(),
    );

    let eula = spec.eula == EulaAcceptance::Accepted;
    data.insert(files::EULA.to_string(), format!("eula={eula}\n"));

    if !spec.allow_list.is_empty() {
        data.insert(
            files::WHITELIST.to_string(),
            to_json(files::WHITELIST, &spec.allow_list)?,
        );
    }

    if !spec.ops_list.is_empty() {
        let ops: Vec<OpEntry<'_>> = spec.ops_list.iter().map(OpEntry::from).collect();
        data.insert(files::OPS.to_string(), to_json(files::OPS, &ops)?);
    }

    if let Some(tweaks) = &spec.vanilla_tweaks {
        let file = VanillaTweaksFile {
            version: vanilla_tweaks::minor_version(minecraft_version),
            packs: vanilla_tweaks::packs_by_category(
                tweaks
                    .datapacks
                    .iter()
                    .map(|d| (d.category.as_str(), d.name.as_str())),
            ),
        };
        data.insert(
            files::VANILLA_TWEAKS.to_string(),
            to_json(files::VANILLA_TWEAKS, &file)?,
        );
    }

    if spec.monitoring_enabled() {
        data.insert(
            files::PROMETHEUS_EXPORTER.to_string(),
            to_yaml(files::PROMETHEUS_EXPORTER, &PrometheusExporterConfig::default())?,
        );
    }

    Ok(data)
}

/// The server's configuration bundle
pub fn compile_config_map(
    id: &ServerIdentity,
    spec: &MinecraftServerSpec,
    minecraft_version: &str,
) -> Result<ConfigMap, Error> {
    Ok(ConfigMap {
        metadata: id.child_meta(id.config_map_name()),
        data: Some(config_bundle_data(spec, minecraft_version)?),
        ..Default::default()
    })
}

/// The map renderer's configuration bundle
pub fn compile_dynmap_config_map(id: &ServerIdentity) -> Result<ConfigMap, Error> {
    let config = DynmapConfiguration {
        storage: DynmapStorage {
            storage_type: "filetree",
            tilespath: DYNMAP_TILES_PATH,
        },
        webserver_bindaddress: "0.0.0.0",
        webserver_port: DYNMAP_PORT,
    };
    let data = BTreeMap::from([(
        files::DYNMAP_CONFIGURATION.to_string(),
        to_yaml(files::DYNMAP_CONFIGURATION, &config)?,
    )]);

    Ok(ConfigMap {
        metadata: id.child_meta(id.dynmap_name()),
        data: Some(data),
        ..Default::default()
    })
}
