//! Mojang launcher version manifest

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::VersionError;

/// Launcher manifest listing every published version
pub const VERSION_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Top level of the manifest
#[derive(Debug, Deserialize)]
pub struct VersionManifest {
    /// Pointers to the newest release and snapshot
    pub latest: Latest,
    /// Every published version
    pub versions: Vec<ManifestVersion>,
}

/// Newest version ids
#[derive(Debug, Deserialize)]
pub struct Latest {
    /// Newest release id
    pub release: String,
    /// Newest snapshot id
    pub snapshot: String,
}

/// A single manifest entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestVersion {
    /// Version id, e.g. "1.19.3"
    pub id: String,
    /// Release channel
    #[serde(rename = "type")]
    pub version_type: VersionType,
    /// When the version was released
    pub release_time: DateTime<Utc>,
}

/// Release channel of a version
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    /// Stable release
    Release,
    /// Weekly snapshot
    Snapshot,
    /// Pre-release alpha
    OldAlpha,
    /// Pre-release beta
    OldBeta,
}

fn is_latest_release(alias: &str) -> bool {
    matches!(
        alias,
        "latest" | "release" | "latest_release" | "latest-release" | "LatestRelease" | "latestRelease"
    )
}

fn is_latest_snapshot(alias: &str) -> bool {
    matches!(
        alias,
        "snapshot" | "latest_snapshot" | "latest-snapshot" | "LatestSnapshot" | "latestSnapshot"
    )
}

/// Whether a requested version is an alias needing the manifest to resolve
pub fn is_alias(requested: &str) -> bool {
    is_latest_release(requested) || is_latest_snapshot(requested)
}

impl VersionManifest {
    /// Entry with exactly this id
    pub fn find_exact(&self, id: &str) -> Option<&ManifestVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Resolve an alias or exact id to a published version id
    pub fn resolve(&self, requested: &str) -> Result<String, VersionError> {
        let id = if is_latest_release(requested) {
            self.latest.release.as_str()
        } else if is_latest_snapshot(requested) {
            self.latest.snapshot.as_str()
        } else {
            requested
        };
        self.find_exact(id)
            .map(|v| v.id.clone())
            .ok_or_else(|| VersionError::UnknownVersion {
                version: requested.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> VersionManifest {
        serde_json::from_str(
            r#"{
  "latest": {"release": "1.19.3", "snapshot": "23w03a"},
  "versions": [
    {"id": "23w03a", "type": "snapshot", "url": "https://piston-meta.mojang.com/v1/packages/a/23w03a.json", "time": "2023-01-18T13:08:21+00:00", "releaseTime": "2023-01-18T13:03:14+00:00", "sha1": "a", "complianceLevel": 1},
    {"id": "1.19.3", "type": "release", "url": "https://piston-meta.mojang.com/v1/packages/b/1.19.3.json", "time": "2023-01-18T13:08:21+00:00", "releaseTime": "2022-12-07T08:17:18+00:00", "sha1": "b", "complianceLevel": 1},
    {"id": "1.18.2", "type": "release", "url": "https://piston-meta.mojang.com/v1/packages/c/1.18.2.json", "time": "2023-01-18T13:08:21+00:00", "releaseTime": "2022-02-28T10:42:45+00:00", "sha1": "c", "complianceLevel": 1}
  ]
}"#,
        )
        .expect("parse manifest")
    }

    #[test]
    fn latest_aliases_resolve() {
        let m = manifest();
        assert_eq!(m.resolve("latest").expect("resolve"), "1.19.3");
        assert_eq!(m.resolve("latestRelease").expect("resolve"), "1.19.3");
        assert_eq!(m.resolve("snapshot").expect("resolve"), "23w03a");
    }

    #[test]
    fn exact_ids_pass_through() {
        let m = manifest();
        assert_eq!(m.resolve("1.18.2").expect("resolve"), "1.18.2");
        assert_eq!(
            m.find_exact("1.18.2").map(|v| v.version_type),
            Some(VersionType::Release)
        );
    }

    #[test]
    fn unknown_version_is_an_error() {
        assert!(matches!(
            manifest().resolve("1.0.0-nope"),
            Err(VersionError::UnknownVersion { .. })
        ));
    }

    #[test]
    fn alias_detection() {
        assert!(is_alias("latest-snapshot"));
        assert!(!is_alias("1.18.2"));
    }
}
