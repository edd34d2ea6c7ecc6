use thiserror::Error;

/// Failures reported by a host runtime implementation.
///
/// `ExceptionPending` means the host raised an exception that is still
/// pending on the session; its details are retrieved with
/// [`HostSession::take_fault`](crate::host::HostSession::take_fault).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Host exception pending")]
    ExceptionPending,

    #[error("Thread cannot attach to host runtime: {0}")]
    NotAttachable(String),

    #[error("Local reference table exhausted: requested {requested}, available {available}")]
    TableExhausted { requested: usize, available: usize },

    #[error("Invalid host reference: {0}")]
    InvalidReference(u64),

    #[error("Host capability not available: {0}")]
    Unavailable(String),

    #[error("Host operation failed: {0}")]
    OperationFailed(String),
}

pub type Result<T> = std::result::Result<T, HostError>;
