//! Error types for HyperIBIS.
//!
//! All errors are strongly typed using thiserror. Structural errors
//! (`ModelError`) indicate a programming error or a genuine data conflict and
//! are always surfaced to the caller. Oracle errors are recovered locally by
//! the extraction pipeline; propagation errors only appear when a caller asks
//! for a strict result.

use thiserror::Error;

use crate::id::{LinkId, ResourceId, SiteId};
use crate::resource::ResourceKind;
use crate::site::SiteRole;
use crate::storage::StorageError;

/// Structural errors raised by the registry, the site model and the link graph.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Duplicate identifier: {id}")]
    DuplicateIdentifier { id: ResourceId },

    #[error("Not found: {what} {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Invalid site configuration for {owner_kind} {owner}: {reason}")]
    InvalidSiteConfiguration {
        owner: ResourceId,
        owner_kind: ResourceKind,
        reason: String,
    },

    #[error("Type mismatch: site {site} has role {actual}, expected {expected}")]
    TypeMismatch {
        site: SiteId,
        actual: SiteRole,
        expected: &'static str,
    },

    #[error("Self loop: {emitter} -> {collector} on owner {owner} would form a one-site cycle")]
    SelfLoop {
        owner: ResourceId,
        emitter: SiteId,
        collector: SiteId,
    },

    #[error("Cardinality violation on {owner}: {reason}")]
    CardinalityViolation { owner: ResourceId, reason: String },

    #[error("Resource {id} is retracted")]
    Retracted { id: ResourceId },

    #[error("Assessment kind {kind} cannot target {target}")]
    InvalidAssessmentTarget { kind: String, target: String },
}

impl ModelError {
    /// Shorthand for a missing resource.
    #[must_use]
    pub fn resource_not_found(id: ResourceId) -> Self {
        Self::NotFound {
            what: "resource",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing site.
    #[must_use]
    pub fn site_not_found(id: SiteId) -> Self {
        Self::NotFound {
            what: "site",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing link.
    #[must_use]
    pub fn link_not_found(id: LinkId) -> Self {
        Self::NotFound {
            what: "link",
            id: id.to_string(),
        }
    }
}

/// Failures reported by an extraction oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("Oracle call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Oracle rate limited: {message}")]
    RateLimited { message: String },

    #[error("Oracle unavailable: {message}")]
    Unavailable { message: String },

    #[error("Malformed oracle output: {reason}")]
    MalformedOutput { reason: String },
}

impl OracleError {
    /// Returns true for failures that may succeed on retry after a backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable { .. }
        )
    }
}

/// Errors raised while driving a document through extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Document source failed for {document_id}: {message}")]
    Source { document_id: String, message: String },

    #[error("Invalid document transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Strict-mode propagation failures.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Propagation did not converge for {} collector(s)", .collectors.len())]
    NonConvergent { collectors: Vec<SiteId> },

    #[error("Propagation was cancelled after {iterations} iteration(s)")]
    Cancelled { iterations: usize },

    #[error("Invalid world assumption: {reason}")]
    InvalidWorld { reason: String },

    #[error("Model kept changing while propagation inputs were read ({attempts} attempts)")]
    UnstableSnapshot { attempts: u32 },
}

/// Validation errors that occur during input or configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Value for '{field}' must be finite, got {value}")]
    NonFiniteValue { field: String, value: f64 },
}

/// Top-level error type for HyperIBIS.
#[derive(Debug, Error)]
pub enum IbisError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Propagation error: {0}")]
    Propagation(#[from] PropagationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl IbisError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a structural model error.
    #[must_use]
    pub const fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Oracle(e) => e.is_transient(),
            Self::Storage(StorageError::ConnectionError(_))
            | Self::Propagation(PropagationError::UnstableSnapshot { .. }) => true,
            _ => false,
        }
    }

    /// Returns the inner model error, if any.
    #[must_use]
    pub const fn as_model(&self) -> Option<&ModelError> {
        match self {
            Self::Model(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for HyperIBIS operations.
pub type IbisResult<T> = Result<T, IbisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_messages() {
        let id = ResourceId::new();
        let msg = ModelError::DuplicateIdentifier { id }.to_string();
        assert!(msg.contains("Duplicate identifier"));
        assert!(msg.contains(&id.to_string()));

        let msg = ModelError::resource_not_found(id).to_string();
        assert!(msg.contains("Not found: resource"));
    }

    #[test]
    fn test_oracle_error_transience() {
        assert!(OracleError::Timeout { duration_ms: 10 }.is_transient());
        assert!(OracleError::RateLimited {
            message: "slow down".to_string()
        }
        .is_transient());
        assert!(!OracleError::MalformedOutput {
            reason: "not json".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_ibis_error_from_model() {
        let err: IbisError = ModelError::Retracted { id: ResourceId::new() }.into();
        assert!(err.is_model());
        assert!(!err.is_retryable());
        assert!(err.as_model().is_some());
    }

    #[test]
    fn test_ibis_error_retryable() {
        let err: IbisError = OracleError::Timeout { duration_ms: 5 }.into();
        assert!(err.is_retryable());

        let err: IbisError = ValidationError::EmptyField {
            field: "title".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err: IbisError = PropagationError::UnstableSnapshot { attempts: 64 }.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_propagation_error_counts_collectors() {
        let err = PropagationError::NonConvergent {
            collectors: vec![SiteId::derive(ResourceId::new(), "c_plus")],
        };
        assert!(err.to_string().contains("1 collector"));
    }

    #[test]
    fn test_internal_error() {
        let err = IbisError::internal("unexpected state");
        assert!(err.to_string().contains("unexpected state"));
    }
}
