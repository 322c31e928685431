//! Error types for service instantiation

use crate::ServiceId;
use thiserror::Error;

/// Errors that can occur while resolving or constructing services
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// A required identifier has neither an instance nor a descriptor in the lineage
    #[error("{message}")]
    MissingService { id: ServiceId, message: String },

    /// Resolution could not make progress, or the visited-node cap was exceeded
    #[error("cyclic dependency between services: {cycle}")]
    CyclicDependency { cycle: String },

    /// A service was requested while it is already being constructed
    #[error("illegal state - RECURSIVELY instantiating service '{id}'")]
    ReentrantInstantiation { id: ServiceId },

    /// The container has been disposed
    #[error("InstantiationService has been disposed")]
    Disposed,

    /// A services accessor was used after its invocation returned
    #[error("service accessor is only valid during the invocation of its target method")]
    AccessorExpired,

    /// Parent scope was dropped
    #[error("Parent scope has been dropped")]
    ParentDropped,

    /// An identifier resolved to a value of another contract type
    #[error("Service '{id}' is not a {expected}")]
    ServiceTypeMismatch {
        id: ServiceId,
        expected: &'static str,
    },

    /// A constructor read a positional argument of the wrong type, or an empty slot
    #[error("Argument {index} of {target} is not a {expected}")]
    InvalidArgument {
        target: &'static str,
        index: usize,
        expected: &'static str,
    },

    /// Plain argument count disagrees with the first service position (strict arity only)
    #[error(
        "[createInstance] First service dependency of {target} at position {expected} conflicts with {actual} static arguments"
    )]
    ArityMismatch {
        target: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Factory failed to create service
    #[error("Failed to create service {type_name}: {reason}")]
    CreationFailed {
        type_name: &'static str,
        reason: String,
    },

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create a MissingService error
    #[inline]
    pub fn missing(id: ServiceId, message: impl Into<String>) -> Self {
        Self::MissingService {
            id,
            message: message.into(),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Create a CyclicDependency error
    #[inline]
    pub fn cyclic(cycle: impl Into<String>) -> Self {
        Self::CyclicDependency {
            cycle: cycle.into(),
        }
    }

    /// Create a ServiceTypeMismatch error
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>(id: ServiceId) -> Self {
        Self::ServiceTypeMismatch {
            id,
            expected: std::any::type_name::<T>(),
        }
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
