//! Artifact resolution against the version index
//!
//! The compiler is pure, so everything it needs from the network is resolved
//! up front into [`ResolvedArtifacts`]. Each reconcile pass wraps the shared
//! index in a fresh [`PassCache`]: identical lookups within one pass reach the
//! network once, and nothing is remembered across passes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::Mutex;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use minecraft_common::crd::{MinecraftServer, ServerType};
use minecraft_common::Error;
use minecraft_versions::{forge, mojang, Artifact, VersionError, VersionIndexClient};

/// Version lookups the compiler depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionIndex: Send + Sync {
    /// Resolve aliases such as `latest` to a concrete version id
    async fn resolve_version(&self, requested: &str) -> Result<String, VersionError>;

    /// Newest Paper build for a version
    async fn latest_paper_build(&self, version: &str) -> Result<u32, VersionError>;

    /// Server jar of one Paper build
    async fn paper_download(&self, version: &str, build: u32) -> Result<Artifact, VersionError>;

    /// Download URL of a datapack bundle; `packs` are (category, name) pairs
    async fn vanilla_tweaks_bundle(
        &self,
        version: &str,
        packs: &[(String, String)],
    ) -> Result<String, VersionError>;
}

#[async_trait]
impl VersionIndex for VersionIndexClient {
    async fn resolve_version(&self, requested: &str) -> Result<String, VersionError> {
        if !mojang::is_alias(requested) {
            return Ok(requested.to_string());
        }
        self.version_manifest().await?.resolve(requested)
    }

    async fn latest_paper_build(&self, version: &str) -> Result<u32, VersionError> {
        VersionIndexClient::latest_paper_build(self, version).await
    }

    async fn paper_download(&self, version: &str, build: u32) -> Result<Artifact, VersionError> {
        VersionIndexClient::paper_download(self, version, build).await
    }

    async fn vanilla_tweaks_bundle(
        &self,
        version: &str,
        packs: &[(String, String)],
    ) -> Result<String, VersionError> {
        VersionIndexClient::vanilla_tweaks_bundle(self, version, packs).await
    }
}

/// Memoizes successful lookups for the duration of one pass
pub struct PassCache {
    inner: Arc<dyn VersionIndex>,
    versions: Mutex<HashMap<String, String>>,
    builds: Mutex<HashMap<String, u32>>,
    downloads: Mutex<HashMap<(String, u32), Artifact>>,
    bundles: Mutex<HashMap<(String, Vec<(String, String)>), String>>,
}

impl PassCache {
    /// Empty cache over `inner`
    pub fn new(inner: Arc<dyn VersionIndex>) -> Self {
        Self {
            inner,
            versions: Mutex::new(HashMap::new()),
            builds: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
            bundles: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VersionIndex for PassCache {
    async fn resolve_version(&self, requested: &str) -> Result<String, VersionError> {
        if let Some(hit) = self.versions.lock().get(requested) {
            return Ok(hit.clone());
        }
        let resolved = self.inner.resolve_version(requested).await?;
        self.versions
            .lock()
            .insert(requested.to_string(), resolved.clone());
        Ok(resolved)
    }

    async fn latest_paper_build(&self, version: &str) -> Result<u32, VersionError> {
        if let Some(hit) = self.builds.lock().get(version) {
            return Ok(*hit);
        }
        let build = self.inner.latest_paper_build(version).await?;
        self.builds.lock().insert(version.to_string(), build);
        Ok(build)
    }

    async fn paper_download(&self, version: &str, build: u32) -> Result<Artifact, VersionError> {
        let key = (version.to_string(), build);
        if let Some(hit) = self.downloads.lock().get(&key) {
            return Ok(hit.clone());
        }
        let artifact = self.inner.paper_download(version, build).await?;
        self.downloads.lock().insert(key, artifact.clone());
        Ok(artifact)
    }

    async fn vanilla_tweaks_bundle(
        &self,
        version: &str,
        packs: &[(String, String)],
    ) -> Result<String, VersionError> {
        let key = (version.to_string(), packs.to_vec());
        if let Some(hit) = self.bundles.lock().get(&key) {
            return Ok(hit.clone());
        }
        let link = self.inner.vanilla_tweaks_bundle(version, packs).await?;
        self.bundles.lock().insert(key, link.clone());
        Ok(link)
    }
}

/// How the server binary gets into the pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerArtifact {
    /// A ready-to-run Paper jar
    Paper(Artifact),
    /// A Forge installer that builds the server in an init step
    Forge(Artifact),
}

impl ServerArtifact {
    /// Whether the server loads Bukkit plugins (metrics exporter, map renderer)
    pub fn hosts_plugins(&self) -> bool {
        matches!(self, Self::Paper(_))
    }
}

/// Everything the compiler needs from outside the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedArtifacts {
    /// Concrete version id (aliases resolved)
    pub minecraft_version: String,
    /// Server binary source
    pub server: ServerArtifact,
    /// Datapack bundle URL, when datapacks were requested
    pub datapack_bundle: Option<String>,
}

fn unavailable(server: &MinecraftServer, err: VersionError) -> Error {
    Error::upstream_unavailable(server.name_any(), err.to_string())
}

/// Resolve the artifacts `server` needs through `index`
///
/// Index failures become retryable compilation errors: the spec may be fine
/// and the data may appear later. A Forge server without forge settings is a
/// permanent error.
pub async fn resolve_artifacts(
    server: &MinecraftServer,
    index: &dyn VersionIndex,
) -> Result<ResolvedArtifacts, Error> {
    let spec = &server.spec;
    let version = index
        .resolve_version(&spec.minecraft_version)
        .await
        .map_err(|e| unavailable(server, e))?;

    let server_artifact = match spec.server_type {
        ServerType::Paper => {
            let build = match spec.paper_build {
                Some(build) => build,
                None => index
                    .latest_paper_build(&version)
                    .await
                    .map_err(|e| unavailable(server, e))?,
            };
            let jar = index
                .paper_download(&version, build)
                .await
                .map_err(|e| unavailable(server, e))?;
            debug!(version = %version, build, "Resolved Paper build");
            ServerArtifact::Paper(jar)
        }
        ServerType::Forge => {
            let forge_spec = spec.forge.as_ref().ok_or_else(|| {
                Error::compilation_for_field(
                    server.name_any(),
                    "spec.forge",
                    "server type Forge requires forge settings",
                )
            })?;
            let url = forge::installer_url(&version, &forge_spec.forge_version).map_err(|e| {
                Error::compilation_for_field(server.name_any(), "spec.forge.forgeVersion", e.to_string())
            })?;
            ServerArtifact::Forge(Artifact {
                url,
                sha256: forge_spec.forge_installer_sha256_sum.clone(),
            })
        }
    };

    let packs: Vec<(String, String)> = spec
        .vanilla_tweaks
        .iter()
        .flat_map(|vt| vt.datapacks.iter())
        .map(|d| (d.category.clone(), d.name.clone()))
        .collect();
    let datapack_bundle = if packs.is_empty() {
        None
    } else {
        Some(
            index
                .vanilla_tweaks_bundle(&version, &packs)
                .await
                .map_err(|e| unavailable(server, e))?,
        )
    };

    Ok(ResolvedArtifacts {
        minecraft_version: version,
        server: server_artifact,
        datapack_bundle,
    })
}
