//! JavaVM-backed host runtime.

use std::thread;

use bridge_traits::error::{HostError, Result};
use bridge_traits::host::{HostRuntime, HostSession};
use jni::objects::GlobalRef;
use jni::JavaVM;
use tracing::debug;

use crate::env::{app_context, java_vm, jni_error, take_exception};
use crate::session::AndroidSession;

/// The app's `ContentResolver`, reachable from any attached thread.
pub struct AndroidHost {
    vm: &'static JavaVM,
    resolver: GlobalRef,
    name: String,
}

impl AndroidHost {
    /// Builds the host from the process-wide NDK context.
    pub fn from_context() -> Result<Self> {
        let vm = java_vm()?;
        let context = app_context()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|err| HostError::NotAttachable(err.to_string()))?;

        let resolver = env
            .call_method(
                &context,
                "getContentResolver",
                "()Landroid/content/ContentResolver;",
                &[],
            )
            .and_then(|value| value.l());
        let resolver = match resolver {
            Ok(resolver) => resolver,
            Err(err) => {
                let fault = take_exception(&mut env);
                return Err(HostError::Unavailable(match fault {
                    Some(fault) => format!("getContentResolver failed: {fault}"),
                    None => format!("getContentResolver failed: {err}"),
                }));
            }
        };
        let resolver = env.new_global_ref(&resolver).map_err(jni_error)?;

        debug!("Android host ready");
        Ok(Self {
            vm,
            resolver,
            name: "android".to_string(),
        })
    }
}

impl HostRuntime for AndroidHost {
    fn attach(&self) -> Result<Box<dyn HostSession>> {
        let current = thread::current();
        let env = self
            .vm
            .attach_current_thread()
            .map_err(|err| HostError::NotAttachable(err.to_string()))?;
        debug!(thread = ?current.name(), "Thread attached to JavaVM");
        Ok(Box::new(AndroidSession::new(
            env,
            self.resolver.clone(),
            current.id(),
        )))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for AndroidHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndroidHost").field("name", &self.name).finish()
    }
}
