//! Paper build index ("bibliothek") response types

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::VersionError;
use crate::Artifact;

/// Public Paper build index
pub const PAPER_API_BASE: &str = "https://api.papermc.io/v2/projects/paper";

/// `GET /versions/{version}`
#[derive(Debug, Deserialize)]
pub struct VersionResponse {
    /// Published build numbers, in no guaranteed order
    #[serde(default)]
    pub builds: Vec<u32>,
}

/// `GET /versions/{version}/builds/{build}`
#[derive(Debug, Deserialize)]
pub struct BuildResponse {
    /// Downloads keyed by purpose ("application", "mojang-mappings", ...)
    #[serde(default)]
    pub downloads: BTreeMap<String, Download>,
}

/// One downloadable file of a build
#[derive(Debug, Deserialize)]
pub struct Download {
    /// File name, used as the last URL segment
    pub name: String,
    /// SHA-256 of the file
    pub sha256: String,
}

/// Highest published build for a version
pub fn latest_build(version: &str, response: &VersionResponse) -> Result<u32, VersionError> {
    response
        .builds
        .iter()
        .copied()
        .max()
        .ok_or_else(|| VersionError::NoBuilds {
            version: version.to_string(),
        })
}

/// Server jar of a build
pub fn application_artifact(
    base: &str,
    version: &str,
    build: u32,
    response: &BuildResponse,
) -> Result<Artifact, VersionError> {
    let app = response
        .downloads
        .get("application")
        .ok_or_else(|| VersionError::MissingDownload {
            version: version.to_string(),
            build,
        })?;
    Ok(Artifact {
        url: format!(
            "{}/versions/{}/builds/{}/downloads/{}",
            base.trim_end_matches('/'),
            version,
            build,
            app.name
        ),
        sha256: app.sha256.clone(),
    })
}
