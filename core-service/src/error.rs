use core_bridge::{BridgeError, ErrorContext, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Unexpected response to {operation}: {response}")]
    UnexpectedResponse { operation: String, response: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Bridge error kind, when the failure came from the bridge.
    pub fn bridge_kind(&self) -> Option<ErrorKind> {
        match self {
            CoreError::Bridge(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Serializable form for handing back across a command boundary.
    pub fn context(&self) -> ErrorContext {
        match self {
            CoreError::Bridge(err) => ErrorContext::from(err),
            other => ErrorContext::new(ErrorKind::Unknown, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
