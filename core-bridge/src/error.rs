//! Bridge error taxonomy.
//!
//! [`BridgeError`] is what bridge operations return. [`ErrorContext`] is its
//! plain-data form: owned strings only, serializable, safe to store and to
//! send across the dispatch boundary.

use std::fmt;

use bridge_traits::host::HostFault;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant of every bridge failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ThreadAffinityViolation,
    ReentrantAcquisition,
    CrossThreadUse,
    ReferenceTableExhausted,
    TypeMismatch,
    InvalidOperation,
    BuilderReused,
    InsertRejected,
    IdentifierUnparseable,
    NotFound,
    PermissionDenied,
    ResourceUnavailable,
    Malformed,
    HostRuntimeFault,
    Unknown,
    Cancelled,
    Timeout,
    QueueFull,
    DispatchClosed,
}

impl ErrorKind {
    /// Misuse of guards and frames. These indicate a bug in the caller and
    /// are never worth retrying.
    pub fn is_defect(self) -> bool {
        matches!(
            self,
            ErrorKind::ThreadAffinityViolation
                | ErrorKind::ReentrantAcquisition
                | ErrorKind::CrossThreadUse
                | ErrorKind::ReferenceTableExhausted
                | ErrorKind::BuilderReused
        )
    }

    /// Faults raised by the host, recovered into a typed result.
    pub fn is_host_fault(self) -> bool {
        matches!(
            self,
            ErrorKind::PermissionDenied
                | ErrorKind::ResourceUnavailable
                | ErrorKind::Malformed
                | ErrorKind::HostRuntimeFault
                | ErrorKind::Unknown
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Thread affinity violation: {0}")]
    ThreadAffinityViolation(String),

    #[error("Connection already held by this thread")]
    ReentrantAcquisition,

    #[error("Connection handle used off its owning thread: {0}")]
    CrossThreadUse(String),

    #[error("Reference table exhausted: {0}")]
    ReferenceTableExhausted(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Operation builder already built")]
    BuilderReused,

    #[error("Insert rejected: {0}")]
    InsertRejected(String),

    #[error("Identifier unparseable: {0}")]
    IdentifierUnparseable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {detail}")]
    PermissionDenied {
        detail: String,
        fault: Option<HostFault>,
    },

    #[error("Resource unavailable: {detail}")]
    ResourceUnavailable {
        detail: String,
        fault: Option<HostFault>,
    },

    #[error("Malformed request: {detail}")]
    Malformed {
        detail: String,
        fault: Option<HostFault>,
    },

    #[error("Host runtime fault: {detail}")]
    HostRuntimeFault {
        detail: String,
        fault: Option<HostFault>,
    },

    #[error("Unknown bridge failure: {0}")]
    Unknown(String),

    #[error("Call cancelled before it started")]
    Cancelled,

    #[error("Timed out after {0:?} waiting for completion")]
    Timeout(std::time::Duration),

    #[error("Dispatch queue is full")]
    QueueFull,

    #[error("Dispatcher is shut down")]
    DispatchClosed,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ThreadAffinityViolation(_) => ErrorKind::ThreadAffinityViolation,
            BridgeError::ReentrantAcquisition => ErrorKind::ReentrantAcquisition,
            BridgeError::CrossThreadUse(_) => ErrorKind::CrossThreadUse,
            BridgeError::ReferenceTableExhausted(_) => ErrorKind::ReferenceTableExhausted,
            BridgeError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            BridgeError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            BridgeError::BuilderReused => ErrorKind::BuilderReused,
            BridgeError::InsertRejected(_) => ErrorKind::InsertRejected,
            BridgeError::IdentifierUnparseable(_) => ErrorKind::IdentifierUnparseable,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            BridgeError::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            BridgeError::Malformed { .. } => ErrorKind::Malformed,
            BridgeError::HostRuntimeFault { .. } => ErrorKind::HostRuntimeFault,
            BridgeError::Unknown(_) => ErrorKind::Unknown,
            BridgeError::Cancelled => ErrorKind::Cancelled,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            BridgeError::QueueFull => ErrorKind::QueueFull,
            BridgeError::DispatchClosed => ErrorKind::DispatchClosed,
        }
    }

    pub fn is_defect(&self) -> bool {
        self.kind().is_defect()
    }

    /// Host faults recovered into a typed result; the caller may reissue.
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_host_fault()
    }

    pub fn host_fault(&self) -> Option<&HostFault> {
        match self {
            BridgeError::PermissionDenied { fault, .. }
            | BridgeError::ResourceUnavailable { fault, .. }
            | BridgeError::Malformed { fault, .. }
            | BridgeError::HostRuntimeFault { fault, .. } => fault.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn type_mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn permission_denied(detail: impl Into<String>) -> Self {
        BridgeError::PermissionDenied {
            detail: detail.into(),
            fault: None,
        }
    }

    pub fn resource_unavailable(detail: impl Into<String>) -> Self {
        BridgeError::ResourceUnavailable {
            detail: detail.into(),
            fault: None,
        }
    }
}

/// Plain-data description of a failure.
///
/// Holds no host references and no borrowed data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub detail: String,
    pub host_fault: Option<String>,
}

impl ErrorContext {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            host_fault: None,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)?;
        if let Some(fault) = &self.host_fault {
            write!(f, " ({fault})")?;
        }
        Ok(())
    }
}

impl From<&BridgeError> for ErrorContext {
    fn from(err: &BridgeError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
            host_fault: err.host_fault().map(ToString::to_string),
        }
    }
}

impl From<BridgeError> for ErrorContext {
    fn from(err: BridgeError) -> Self {
        ErrorContext::from(&err)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defect_classification() {
        assert!(BridgeError::ReentrantAcquisition.is_defect());
        assert!(BridgeError::CrossThreadUse("t".into()).is_defect());
        assert!(BridgeError::BuilderReused.is_defect());
        assert!(!BridgeError::permission_denied("no").is_defect());
        assert!(BridgeError::permission_denied("no").is_recoverable());
        assert!(ErrorKind::HostRuntimeFault.is_host_fault());
        assert!(!ErrorKind::NotFound.is_host_fault());
    }

    #[test]
    fn test_context_carries_fault_text() {
        let err = BridgeError::PermissionDenied {
            detail: "query denied".to_string(),
            fault: Some(HostFault::new(
                "java.lang.SecurityException",
                Some("Permission Denial".to_string()),
            )),
        };
        let context = ErrorContext::from(&err);
        assert_eq!(context.kind, ErrorKind::PermissionDenied);
        assert_eq!(
            context.host_fault.as_deref(),
            Some("java.lang.SecurityException: Permission Denial")
        );
    }

    #[test]
    fn test_context_serializes_as_plain_data() {
        let context = ErrorContext::new(ErrorKind::NotFound, "no rows");
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["kind"], "NotFound");
        assert_eq!(json["detail"], "no rows");
        assert!(json["host_fault"].is_null());
    }
}
