//! Runtime permission checks through the application `Context`.

use async_trait::async_trait;
use bridge_traits::error::{HostError, Result};
use bridge_traits::permission::{PermissionDecision, PermissionGate, PermissionRequest};
use jni::objects::{GlobalRef, JValue};
use jni::JavaVM;
use tracing::debug;

use crate::env::{app_context, java_vm, jni_error, take_exception};

/// `PackageManager.PERMISSION_GRANTED`.
const PERMISSION_GRANTED: i32 = 0;

/// Grants a request when `Context.checkSelfPermission` does.
pub struct SelfPermissionGate {
    vm: &'static JavaVM,
    context: GlobalRef,
}

impl SelfPermissionGate {
    pub fn from_context() -> Result<Self> {
        let vm = java_vm()?;
        let env = vm
            .attach_current_thread()
            .map_err(|err| HostError::NotAttachable(err.to_string()))?;
        let context = env.new_global_ref(app_context()?).map_err(jni_error)?;
        Ok(Self { vm, context })
    }

    fn is_granted(&self, permission: &str) -> Result<bool> {
        let mut env = self
            .vm
            .attach_current_thread()
            .map_err(|err| HostError::NotAttachable(err.to_string()))?;
        let name = env.new_string(permission).map_err(jni_error)?;
        let status = env
            .call_method(
                self.context.as_obj(),
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValue::Object(&name)],
            )
            .and_then(|value| value.i());
        let _ = env.delete_local_ref(name);
        match status {
            Ok(status) => Ok(status == PERMISSION_GRANTED),
            Err(err) => Err(match take_exception(&mut env) {
                Some(fault) => HostError::OperationFailed(fault.to_string()),
                None => jni_error(err),
            }),
        }
    }
}

#[async_trait]
impl PermissionGate for SelfPermissionGate {
    async fn check(&self, request: &PermissionRequest) -> Result<PermissionDecision> {
        if self.is_granted(&request.permission)? {
            return Ok(PermissionDecision::Granted);
        }
        debug!(permission = %request.permission, operation = %request.operation, "Permission not granted");
        Ok(PermissionDecision::Denied {
            reason: format!("permission {} not granted to this app", request.permission),
        })
    }
}

impl std::fmt::Debug for SelfPermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfPermissionGate").finish_non_exhaustive()
    }
}
