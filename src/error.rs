//! Error types for the Skiff provider.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while serving the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Schema translation for a resource type failed; the whole resource
    /// type is unavailable (never a partial schema).
    #[error("schema translation failed for resource type {resource_type:?} ({} naming conflicts)", .diagnostics.len())]
    SchemaConflict {
        /// The resource type whose descriptors could not be translated.
        resource_type: String,
        /// One diagnostic per reserved-name or naming collision.
        diagnostics: Vec<Diagnostic>,
    },

    /// The remote instance store could not be reached or rejected the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request against the remote instance store timed out.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// An import ID was not of the form `resource_type.label`.
    #[error("invalid import id {0:?}: expected \"resource_type.label\" (e.g. \"httpserver.main\")")]
    ImportFormat(String),

    /// An import ID named a different resource type than the one it was
    /// imported into.
    #[error("import id {id:?} has resource type {actual:?}, but this resource is {expected:?}; use the matching resource type or correct the import id")]
    ResourceTypeMismatch {
        /// The full import ID as supplied.
        id: String,
        /// The resource type bound to the controller.
        expected: String,
        /// The type segment found in the import ID.
        actual: String,
    },

    /// An operation was attempted before the provider was configured with a
    /// store handle.
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The requested resource type is not known to this provider.
    #[error("unknown resource type: {0}")]
    UnknownResource(String),

    /// The host sent a request the provider cannot act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A create operation failed, possibly leaving an orphaned instance.
    #[error(transparent)]
    Create(#[from] CreateError),
}

/// Failure of a create operation.
///
/// Carries the primary error plus, when the compensating destroy of the
/// partially-created instance also failed, a separate [`CleanupError`] so the
/// operator is warned about the orphan without the primary error being
/// obscured.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CreateError {
    /// The error that failed the create.
    pub error: Box<ProviderError>,
    /// Set when the best-effort destroy of the new instance also failed.
    pub cleanup: Option<CleanupError>,
}

impl CreateError {
    /// Wrap a primary error with no cleanup failure.
    pub fn new(error: ProviderError) -> Self {
        Self {
            error: Box::new(error),
            cleanup: None,
        }
    }
}

/// A compensating destroy that failed after a failed create, leaving an
/// instance behind on the server.
#[derive(Debug, Error)]
#[error("instance {identity} was created but could not be destroyed after the operation failed: {cause}; the instance may need manual removal")]
pub struct CleanupError {
    /// Fully-qualified identity of the orphaned instance.
    pub identity: String,
    /// Why the destroy failed.
    pub cause: Box<ProviderError>,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::DeadlineExceeded(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::SchemaConflict { .. } => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::Transport(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::ImportFormat(_) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::ResourceTypeMismatch { .. } => {
                tonic::Status::invalid_argument(err.to_string())
            }
            ProviderError::NotConfigured(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("serialization error: {}", err))
            }
            ProviderError::Create(err) => tonic::Status::from(*err.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::UnknownResource("httpserver".to_string());
        assert_eq!(format!("{}", err), "unknown resource type: httpserver");

        let err = ProviderError::ImportFormat("badid".to_string());
        assert!(format!("{}", err).contains("\"badid\""));
        assert!(format!("{}", err).contains("resource_type.label"));

        let err = ProviderError::ResourceTypeMismatch {
            id: "httpstatic.docs".to_string(),
            expected: "httpserver".to_string(),
            actual: "httpstatic".to_string(),
        };
        let rendered = format!("{}", err);
        assert!(rendered.contains("httpstatic.docs"));
        assert!(rendered.contains("\"httpserver\""));
    }

    #[test]
    fn test_error_to_status() {
        let err = ProviderError::Transport("connection refused".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);

        let err = ProviderError::NotConfigured("no store".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let err = ProviderError::DeadlineExceeded("10s elapsed".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

        let err = ProviderError::UnknownResource("queue".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn test_create_error_passes_through_primary_cause() {
        let err = CreateError::new(ProviderError::Transport("apply failed".to_string()));
        assert_eq!(format!("{}", err), "transport error: apply failed");
        assert!(err.cleanup.is_none());

        let status: tonic::Status = ProviderError::Create(err).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn test_cleanup_error_names_the_orphan() {
        let cleanup = CleanupError {
            identity: "httpserver.skf_0a1b2c3d".to_string(),
            cause: Box::new(ProviderError::Transport("destroy refused".to_string())),
        };
        let rendered = format!("{}", cleanup);
        assert!(rendered.contains("httpserver.skf_0a1b2c3d"));
        assert!(rendered.contains("manual removal"));
    }

    #[test]
    fn test_schema_conflict_counts_diagnostics() {
        let err = ProviderError::SchemaConflict {
            resource_type: "httpserver".to_string(),
            diagnostics: vec![
                Diagnostic::error("Attribute naming collision"),
                Diagnostic::error("Reserved attribute name"),
            ],
        };
        assert!(format!("{}", err).contains("2 naming conflicts"));
    }
}
