//! Authorization seam.
//!
//! Every request is checked against a [`PermissionGate`] before any host
//! connection is acquired. On Android this is `Context.checkSelfPermission`;
//! desktop and tests use static gates.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What is being asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Host permission name, e.g. `com.ichi2.anki.permission.READ_WRITE_DATABASE`.
    pub permission: String,
    /// Operation kind (`query`, `insert`, ...).
    pub operation: String,
    /// Target locator, rendered as a URI.
    pub locator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionDecision {
    Granted,
    Denied { reason: String },
}

impl PermissionDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionDecision::Granted)
    }
}

/// Decides whether a request may reach the host.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::permission::{PermissionGate, PermissionRequest};
///
/// async fn allowed(gate: &dyn PermissionGate, request: &PermissionRequest) -> bool {
///     matches!(gate.check(request).await, Ok(decision) if decision.is_granted())
/// }
/// ```
#[async_trait::async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(&self, request: &PermissionRequest) -> Result<PermissionDecision>;
}

/// Gate that grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl PermissionGate for AllowAll {
    async fn check(&self, _request: &PermissionRequest) -> Result<PermissionDecision> {
        Ok(PermissionDecision::Granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[core_async::test]
    async fn test_allow_all() {
        let request = PermissionRequest {
            permission: "p".to_string(),
            operation: "query".to_string(),
            locator: "content://a/notes".to_string(),
        };
        assert!(AllowAll.check(&request).await.unwrap().is_granted());
    }
}
