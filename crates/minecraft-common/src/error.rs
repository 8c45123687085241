//! Error types for the Minecraft operator
//!
//! Errors carry enough context (entity name, field path, resource kind) to be
//! actionable from a log line alone. The variants map onto how the caller
//! should react: store errors are retried by re-invocation, conflicts are
//! retried immediately by the lease protocol, and compilation errors wait for
//! either a spec change or for upstream data to become available.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Optimistic-concurrency write lost against a newer version
    #[error("conflict writing {kind} {name}: object changed since it was read")]
    Conflict {
        /// Resource kind being written
        kind: String,
        /// Name of the object
        name: String,
    },

    /// Desired state could not be compiled into child resources
    #[error("compilation error for {entity}: {message}")]
    Compilation {
        /// Name of the entity whose spec failed to compile
        entity: String,
        /// Description of what's missing or unresolvable
        message: String,
        /// The spec field at fault (e.g., "spec.world.overworld")
        field: Option<String>,
        /// Whether upstream data may still appear without a spec change
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "lease")
        context: String,
    },
}

impl Error {
    /// Create a conflict error for an object of the given kind
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a permanent compilation error pointing at a spec field
    ///
    /// Used when the spec itself is incomplete, so only a spec change can fix it.
    pub fn compilation_for_field(
        entity: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Compilation {
            entity: entity.into(),
            message: msg.into(),
            field: Some(field.into()),
            retryable: false,
        }
    }

    /// Create a compilation error caused by unavailable upstream data
    ///
    /// The spec may be fine; the version index or a download site failed.
    pub fn upstream_unavailable(entity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Compilation {
            entity: entity.into(),
            message: msg.into(),
            field: None,
            retryable: true,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the caller should requeue with backoff rather than wait for a change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    // 409 and 429 are races and throttling; other 4xx are our fault
                    ae.code == 409 || ae.code == 429 || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Self::Conflict { .. } => true,
            Self::Compilation { retryable, .. } => *retryable,
            Self::Serialization { .. } => false,
            Self::Internal { .. } => true,
        }
    }

    /// Whether this error reports the entity's spec as unresolvable
    pub fn is_compilation(&self) -> bool {
        matches!(self, Self::Compilation { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a missing world volume can only be fixed by editing the spec,
    /// so the controller must not hammer the API retrying it.
    #[test]
    fn story_spec_gap_is_not_retried() {
        let err = Error::compilation_for_field("survival", "spec.world.overworld", "missing claim");
        assert!(!err.is_retryable());
        assert!(err.is_compilation());
        assert!(err.to_string().contains("survival"));
    }

    /// Story: the Paper build index being down is transient, so the pass is
    /// retried with backoff even though nothing in the spec changed.
    #[test]
    fn story_upstream_outage_is_retried() {
        let err = Error::upstream_unavailable("survival", "api.papermc.io timed out");
        assert!(err.is_retryable());
        assert!(err.is_compilation());
    }

    #[test]
    fn kube_client_errors_are_permanent() {
        assert!(!Error::from(api_error(403)).is_retryable());
        assert!(!Error::from(api_error(422)).is_retryable());
    }

    #[test]
    fn kube_conflicts_and_server_errors_are_retryable() {
        assert!(Error::from(api_error(409)).is_retryable());
        assert!(Error::from(api_error(429)).is_retryable());
        assert!(Error::from(api_error(503)).is_retryable());
    }

    #[test]
    fn conflict_names_the_object() {
        let err = Error::conflict("MinecraftServer", "survival");
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "conflict writing MinecraftServer survival: object changed since it was read"
        );
    }

    #[test]
    fn serialization_errors_carry_kind() {
        let err = Error::serialization_for_kind("ConfigMap", "bad yaml");
        match err {
            Error::Serialization { kind, message } => {
                assert_eq!(kind.as_deref(), Some("ConfigMap"));
                assert_eq!(message, "bad yaml");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn internal_default_context() {
        let err = Error::internal("boom");
        assert_eq!(err.to_string(), "internal error [unknown]: boom");
        let err = Error::internal_with_context("lease", "boom");
        assert_eq!(err.to_string(), "internal error [lease]: boom");
    }
}
