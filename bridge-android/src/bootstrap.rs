//! Wires the Android bridge implementations together.
//!
//! Host shells call [`build_android_bridges`] once the activity glue has
//! initialized the NDK context, then hand the trait objects to
//! `core-runtime`'s `BridgeConfig`.

use std::sync::Arc;

use bridge_traits::error::Result;
use bridge_traits::{HostRuntime, PermissionGate};

use crate::{AndroidHost, SelfPermissionGate};

/// Android bridge objects ready for injection into the core.
pub struct AndroidBridgeSet {
    /// JavaVM-backed content resolver access.
    pub host_runtime: Arc<dyn HostRuntime>,
    /// `checkSelfPermission`-backed gate.
    pub permission_gate: Arc<dyn PermissionGate>,
}

pub fn build_android_bridges() -> Result<AndroidBridgeSet> {
    Ok(AndroidBridgeSet {
        host_runtime: Arc::new(AndroidHost::from_context()?),
        permission_gate: Arc::new(SelfPermissionGate::from_context()?),
    })
}
