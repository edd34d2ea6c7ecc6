//! Static permission gate for desktop and tests.

use std::collections::HashSet;

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::permission::{PermissionDecision, PermissionGate, PermissionRequest};
use parking_lot::RwLock;
use tracing::debug;

/// Grants a fixed set of permissions.
///
/// Desktop has no runtime permission model, so the host configures up front
/// which permissions count as granted. Grants can be changed at runtime to
/// simulate a user revoking access.
#[derive(Debug, Default)]
pub struct StaticPermissionGate {
    granted: RwLock<HashSet<String>>,
}

impl StaticPermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn granting(permissions: &[&str]) -> Self {
        let gate = Self::new();
        for permission in permissions {
            gate.grant(permission);
        }
        gate
    }

    pub fn grant(&self, permission: &str) {
        self.granted.write().insert(permission.to_string());
    }

    pub fn revoke(&self, permission: &str) {
        self.granted.write().remove(permission);
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn check(&self, request: &PermissionRequest) -> Result<PermissionDecision> {
        if self.granted.read().contains(&request.permission) {
            return Ok(PermissionDecision::Granted);
        }
        debug!(permission = %request.permission, operation = %request.operation, "Permission not granted");
        Ok(PermissionDecision::Denied {
            reason: format!("permission {} not granted", request.permission),
        })
    }
}
