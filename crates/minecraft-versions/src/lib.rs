//! Version index lookups for Minecraft server artifacts
//!
//! Resolves human-readable versions into concrete downloads: the Paper build
//! index for server jars, the Mojang launcher manifest for version aliases,
//! the Forge maven for installers, and VanillaTweaks for datapack bundles.
//!
//! Every network call is fallible and is retried only for transient failures.

#![deny(missing_docs)]

pub mod error;
pub mod forge;
pub mod mojang;
pub mod paper;
pub mod vanilla_tweaks;

use std::time::Duration;

use minecraft_common::retry::{retry_with_backoff, RetryConfig};
use serde::de::DeserializeOwned;
use tracing::debug;

pub use error::VersionError;
pub use mojang::VersionManifest;

/// A downloadable file with its integrity checksum
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Download URL
    pub url: String,
    /// Expected SHA-256 of the file
    pub sha256: String,
}

/// Base URLs of the services queried
#[derive(Clone, Debug)]
pub struct Endpoints {
    /// Paper project API root
    pub paper: String,
    /// Mojang launcher manifest
    pub mojang_manifest: String,
    /// VanillaTweaks site root
    pub vanilla_tweaks: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            paper: paper::PAPER_API_BASE.to_string(),
            mojang_manifest: mojang::VERSION_MANIFEST_URL.to_string(),
            vanilla_tweaks: vanilla_tweaks::VANILLA_TWEAKS_BASE.to_string(),
        }
    }
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for every version index this operator talks to
#[derive(Clone, Debug)]
pub struct VersionIndexClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    retry: RetryConfig,
}

impl VersionIndexClient {
    /// Client against the public services
    pub fn new() -> Result<Self, VersionError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("minecraft-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| VersionError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self::with_client(http, Endpoints::default()))
    }

    /// Client with a caller-provided HTTP client and endpoints
    pub fn with_client(http: reqwest::Client, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry schedule
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, VersionError> {
        let http = &self.http;
        retry_with_backoff(&self.retry, url, VersionError::is_transient, move || async move {
            debug!(url = %url, "Querying version index");
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|source| VersionError::Http {
                    url: url.to_string(),
                    source,
                })?;
            decode(url, response).await
        })
        .await
    }

    /// Newest Paper build published for `version`
    pub async fn latest_paper_build(&self, version: &str) -> Result<u32, VersionError> {
        let url = format!("{}/versions/{}", self.endpoints.paper, version);
        let response: paper::VersionResponse = self.get_json(&url).await?;
        paper::latest_build(version, &response)
    }

    /// Server jar of a specific Paper build
    pub async fn paper_download(&self, version: &str, build: u32) -> Result<Artifact, VersionError> {
        let url = format!("{}/versions/{}/builds/{}", self.endpoints.paper, version, build);
        let response: paper::BuildResponse = self.get_json(&url).await?;
        paper::application_artifact(&self.endpoints.paper, version, build, &response)
    }

    /// The Mojang launcher manifest
    pub async fn version_manifest(&self) -> Result<VersionManifest, VersionError> {
        self.get_json(&self.endpoints.mojang_manifest).await
    }

    /// Download URL of a VanillaTweaks bundle holding `packs` (category, name)
    pub async fn vanilla_tweaks_bundle(
        &self,
        version: &str,
        packs: &[(String, String)],
    ) -> Result<String, VersionError> {
        let url = format!(
            "{}{}",
            self.endpoints.vanilla_tweaks,
            vanilla_tweaks::ZIP_DATAPACKS_PATH
        );
        let grouped =
            vanilla_tweaks::packs_by_category(packs.iter().map(|(c, n)| (c.as_str(), n.as_str())));
        let form = vanilla_tweaks::request_form(version, &grouped).map_err(|e| {
            VersionError::Decode {
                url: url.clone(),
                message: e.to_string(),
            }
        })?;

        let http = &self.http;
        let (url, form) = (url.as_str(), &form);
        let response: vanilla_tweaks::BundleResponse =
            retry_with_backoff(&self.retry, url, VersionError::is_transient, move || async move {
                let response = http
                    .post(url)
                    .form(form)
                    .send()
                    .await
                    .map_err(|source| VersionError::Http {
                        url: url.to_string(),
                        source,
                    })?;
                decode(url, response).await
            })
            .await?;

        let link = vanilla_tweaks::bundle_url(response)?;
        debug!(version = %version, link = %link, "VanillaTweaks bundle built");
        Ok(link)
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T, VersionError> {
    let status = response.status();
    if !status.is_success() {
        return Err(VersionError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await.map_err(|source| VersionError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|e| VersionError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoints_are_public_services() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.paper, "https://api.papermc.io/v2/projects/paper");
        assert!(endpoints.mojang_manifest.ends_with("version_manifest_v2.json"));
        assert_eq!(endpoints.vanilla_tweaks, "https://vanillatweaks.net");
    }

    #[test]
    fn client_builds() {
        assert!(VersionIndexClient::new().is_ok());
    }
}
