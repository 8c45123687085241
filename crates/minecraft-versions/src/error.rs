//! Version index errors

use thiserror::Error;

/// Failure resolving a version to a downloadable artifact
#[derive(Debug, Error)]
pub enum VersionError {
    /// Transport failure (DNS, connect, timeout, TLS)
    #[error("request to {url} failed: {source}")]
    Http {
        /// URL requested
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// URL requested
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body did not have the expected shape
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// URL requested
        url: String,
        /// What was wrong
        message: String,
    },

    /// The version exists but has no published builds
    #[error("no Paper builds published for version {version}")]
    NoBuilds {
        /// Requested version
        version: String,
    },

    /// The build has no server jar download
    #[error("Paper build {build} of {version} has no application download")]
    MissingDownload {
        /// Requested version
        version: String,
        /// Requested build
        build: u32,
    },

    /// The version is not in the Mojang manifest
    #[error("unknown Minecraft version {version}")]
    UnknownVersion {
        /// Requested version
        version: String,
    },

    /// The datapack service refused to build the bundle
    #[error("VanillaTweaks rejected the datapack request: {message}")]
    VanillaTweaks {
        /// Status or reason reported
        message: String,
    },

    /// A URL could not be constructed from the inputs
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl VersionError {
    /// Whether another attempt may succeed without any input changing
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = VersionError::Status {
            url: "https://api.papermc.io".to_string(),
            status: 502,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn not_found_is_permanent() {
        let err = VersionError::Status {
            url: "https://api.papermc.io".to_string(),
            status: 404,
        };
        assert!(!err.is_transient());
        assert!(!VersionError::NoBuilds {
            version: "1.0".to_string()
        }
        .is_transient());
    }
}
