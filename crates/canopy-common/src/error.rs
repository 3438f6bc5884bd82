//! Error types for the Canopy control plane
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the context needed to act on it: the shoot it
//! concerns, the resource that raced, or every failure of a partial batch.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Canopy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for resource specs (malformed window, version, quantity)
    #[error("validation error for {shoot}: {message}")]
    Validation {
        /// Key of the shoot with invalid configuration
        shoot: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.maintenance.timeWindow.begin")
        field: Option<String>,
    },

    /// Optimistic-concurrency write lost against a newer resource version
    #[error("conflict writing {resource}: {message}")]
    Conflict {
        /// The resource that was written (`namespace/name`)
        resource: String,
        /// Description of the conflict
        message: String,
    },

    /// Resource does not exist (anymore)
    #[error("{resource} not found")]
    NotFound {
        /// The resource that was looked up (`namespace/name`)
        resource: String,
    },

    /// A guarded invariant was violated; requires operator attention
    #[error("invariant violated for {shoot}: {message}")]
    InvariantViolation {
        /// Key of the affected shoot
        shoot: String,
        /// Description of the violated invariant
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// A bounded wait ran out of time
    #[error("timeout [{operation}]: {message}")]
    Timeout {
        /// Operation that was waiting
        operation: String,
        /// Description of what was awaited
        message: String,
    },

    /// An operation was cancelled by its caller
    #[error("cancelled [{operation}]")]
    Cancelled {
        /// Operation that was cancelled
        operation: String,
    },

    /// Several independent sub-operations failed
    #[error("{context}: {}", join_errors(errors))]
    Aggregate {
        /// What the batch was doing
        context: String,
        /// Every failure, in completion order
        errors: Vec<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "maintenance", "pipeline")
        context: String,
    },
}

fn join_errors(errors: &[Error]) -> String {
    let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("[{}]", rendered.join("; "))
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            shoot: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with shoot context
    pub fn validation_for(shoot: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            shoot: shoot.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with shoot context and field path
    pub fn validation_for_field(
        shoot: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            shoot: shoot.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error for the given resource
    pub fn conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given resource
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invariant violation for the given shoot
    pub fn invariant(shoot: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvariantViolation {
            shoot: shoot.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Bundle several failures into one error
    pub fn aggregate(context: impl Into<String>, errors: Vec<Error>) -> Self {
        Self::Aggregate {
            context: context.into(),
            errors,
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

    /// Whether a write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Whether the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, invariant and serialization errors require a fix and are
    /// never retried. Kubernetes errors are retried unless they are 4xx
    /// (conflicts excepted).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                self.is_conflict()
                    || !matches!(
                        source,
                        kube::Error::Api(ae) if (400..500).contains(&ae.code)
                    )
            }
            Error::Validation { .. } => false,
            Error::Conflict { .. } => true,
            Error::NotFound { .. } => false,
            Error::InvariantViolation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => false,
            Error::Aggregate { errors, .. } => errors.iter().any(Error::is_retryable),
            Error::Internal { .. } => true,
        }
    }

    /// Get the shoot key if this error is associated with a specific shoot
    pub fn shoot(&self) -> Option<&str> {
        match self {
            Error::Validation { shoot, .. } => Some(shoot),
            Error::InvariantViolation { shoot, .. } => Some(shoot),
            _ => None,
        }
    }
}

/// Turn a not-found error into `Ok(None)`.
///
/// Used where an object deleted concurrently by its owner is a benign race.
pub fn ignore_not_found<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: validation errors carry the shoot and field that need fixing
    #[test]
    fn story_validation_errors_point_at_the_field() {
        let err = Error::validation_for_field(
            "garden-dev/web",
            "spec.maintenance.timeWindow.begin",
            "invalid time",
        );
        assert!(err.to_string().contains("garden-dev/web"));
        assert_eq!(err.shoot(), Some("garden-dev/web"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.maintenance.timeWindow.begin"))
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: a lost optimistic-concurrency race is recognised in both forms
    #[test]
    fn story_conflicts_are_detected_from_api_and_local_errors() {
        assert!(Error::conflict("garden-dev/web", "resourceVersion changed").is_conflict());
        assert!(api_error(409).is_conflict());
        assert!(!api_error(500).is_conflict());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(422).is_retryable());
        assert!(api_error(503).is_retryable());
    }

    /// Story: objects deleted concurrently do not fail a batch
    #[test]
    fn story_not_found_is_ignored_when_asked() {
        let ok: Result<u8, Error> = Ok(1);
        assert_eq!(ignore_not_found(ok).unwrap(), Some(1));

        let gone: Result<u8, Error> = Err(Error::not_found("kube-system/token"));
        assert_eq!(ignore_not_found(gone).unwrap(), None);

        let gone_api: Result<u8, Error> = Err(api_error(404));
        assert_eq!(ignore_not_found(gone_api).unwrap(), None);

        let broken: Result<u8, Error> = Err(Error::internal("boom"));
        assert!(ignore_not_found(broken).is_err());
    }

    /// Story: invariant violations are hard failures
    #[test]
    fn story_invariant_violations_are_not_retried() {
        let err = Error::invariant("garden-dev/web", "auto update section changed mid-air");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("mid-air"));
    }

    /// Story: aggregate errors list every failure, not only the first
    #[test]
    fn story_aggregate_lists_every_failure() {
        let err = Error::aggregate(
            "operating system config generation",
            vec![
                Error::timeout("osc/pool-a", "not ready"),
                Error::validation("pool-b has no machine type"),
            ],
        );
        let rendered = err.to_string();
        assert!(rendered.contains("pool-a"));
        assert!(rendered.contains("pool-b"));
        // one timeout makes the batch worth retrying
        assert!(err.is_retryable());
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!Error::cancelled("poll").is_retryable());
    }
}
