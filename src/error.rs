//! Error types for the overcommit operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.cpuOvercommit")
        field: Option<String>,
    },

    /// A templated managed object was malformed
    #[error("template error for {kind}: {message}")]
    Template {
        /// Object kind being templated
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to serialize an admission response JSON patch
    #[error("patch serialization error: {0}")]
    PatchSerialization(#[from] kube::core::admission::SerializePatchError),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "status", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a template error for the given object kind
    pub fn template(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is a Kubernetes 409 resource conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = Error::validation_field("spec.cpuOvercommit", "must be between 0.0001 and 1");
        assert!(err.to_string().contains("must be between"));
    }

    #[test]
    fn template_error_display() {
        let err = Error::template("Issuer", "generated issuer is nil");
        assert!(err.to_string().contains("Issuer"));
    }

    #[test]
    fn non_kube_errors_are_not_conflicts() {
        assert!(!Error::validation("bad ratio").is_conflict());
        assert!(!Error::internal("boom", "test").is_conflict());
    }
}
