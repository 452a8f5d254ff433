//! Error types for the reconciler crate.
//!
//! Errors fall into two groups. Infrastructure failures (package manager,
//! persistence, resolver, inspector, cluster API, type mapping) are transient:
//! the host retries the whole operation later. Precondition violations are
//! fatal for the current invocation. Drift is never an error.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Package-manager backend call failed.
    #[error("package manager {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    /// Record persistence failed.
    #[error("persisting record ({operation}) failed: {reason}")]
    Persistence { operation: String, reason: String },

    /// Package coordinates could not be resolved.
    #[error("resolving package: {reason}")]
    Resolver { reason: String },

    /// Chart inspection service failed.
    #[error("chart inspector: {reason}")]
    Inspector { reason: String },

    /// Cluster API call failed.
    #[error("cluster api {operation} failed: {reason}")]
    ClusterApi { operation: String, reason: String },

    /// Resource type or scope lookup failed.
    #[error("mapping {gvk}: {reason}")]
    Mapping { gvk: String, reason: String },

    /// Permission bundle could not be generated.
    #[error("generating permissions: {reason}")]
    Permission { reason: String },

    /// Release manifest could not be decoded.
    #[error(transparent)]
    Decode(#[from] composition_digest::Error),

    /// Rendered manifest could not be post-processed.
    #[error("post-rendering manifest: {reason}")]
    PostRender { reason: String },

    /// Update ran without an installed release.
    #[error("release '{name}' not found")]
    ReleaseNotFound { name: String },

    /// Release survived an uninstall.
    #[error("composition not deleted, release {name} still exists")]
    ReleaseStillExists { name: String },

    /// Record content is unusable.
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The invocation deadline expired.
    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u128 },

    /// An error wrapped with the step that produced it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a resolver error.
    pub fn resolver(reason: impl Into<String>) -> Self {
        Self::Resolver {
            reason: reason.into(),
        }
    }

    /// Create an inspector error.
    pub fn inspector(reason: impl Into<String>) -> Self {
        Self::Inspector {
            reason: reason.into(),
        }
    }

    /// Create a cluster API error.
    pub fn cluster_api(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClusterApi {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a mapping error.
    pub fn mapping(gvk: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            gvk: gvk.into(),
            reason: reason.into(),
        }
    }

    /// Create a permission error.
    pub fn permission(reason: impl Into<String>) -> Self {
        Self::Permission {
            reason: reason.into(),
        }
    }

    /// Create a post-render error.
    pub fn post_render(reason: impl Into<String>) -> Self {
        Self::PostRender {
            reason: reason.into(),
        }
    }

    /// Create a release not found error.
    pub fn release_not_found(name: impl Into<String>) -> Self {
        Self::ReleaseNotFound { name: name.into() }
    }

    /// Create a release still exists error.
    pub fn release_still_exists(name: impl Into<String>) -> Self {
        Self::ReleaseStillExists { name: name.into() }
    }

    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap with the step that failed.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers removed.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the host should retry the operation later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Self::Backend { .. }
                | Self::Persistence { .. }
                | Self::Resolver { .. }
                | Self::Inspector { .. }
                | Self::ClusterApi { .. }
                | Self::Mapping { .. }
                | Self::DeadlineExceeded { .. }
        )
    }
}

/// Attach step context to a fallible result.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with `context`.
    ///
    /// # Errors
    ///
    /// Returns the wrapped error.
    fn context(self, context: &str) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::backend("upgrade", "connection refused");
        assert!(err.to_string().contains("upgrade"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_context_prefixes_message() {
        let err = Error::backend("upgrade", "timeout").context("upgrading helm chart");
        assert_eq!(
            err.to_string(),
            "upgrading helm chart: package manager upgrade failed: timeout"
        );
    }

    #[test]
    fn test_transient_classification_looks_through_context() {
        let transient = Error::persistence("update", "conflict").context("updating record");
        assert!(transient.is_transient());

        let fatal = Error::release_still_exists("demo").context("deleting");
        assert!(!fatal.is_transient());
        assert!(!Error::release_not_found("demo").is_transient());
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<()> = Err(Error::resolver("no definition"));
        let err = result.context("getting package info").err();
        assert_eq!(
            err.map(|e| e.to_string()),
            Some("getting package info: resolving package: no definition".to_string())
        );
    }
}
