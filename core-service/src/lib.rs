//! Core service façade and bootstrap helpers.
//!
//! This crate wires a host runtime and permission gate into the content
//! bridge and exposes typed CRUD calls against the FlashCards provider.
//! Desktop builds enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`), whereas Android builds enable the `android` feature and
//! rely on the JNI adapters from `bridge-android`.

pub mod contract;
pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::ContentService;

pub use core_bridge::{
    AffectedRows, ContentRequest, ContentResponse, ErrorContext, ErrorKind, Filter,
    InsertedItem, ResourceLocator, SortSpec, Value, ValueKind, ValueMap,
};
pub use core_runtime::config::{BridgeConfig, BridgeConfigBuilder, ThreadAffinity};

/// Starts a service on the in-memory desktop host.
///
/// ```
/// # #[cfg(feature = "desktop-shims")]
/// # fn example() -> core_service::Result<()> {
/// let service = core_service::bootstrap_desktop()?;
/// assert_eq!(service.authority(), core_service::contract::AUTHORITY);
/// # Ok(())
/// # }
/// ```
#[cfg(all(feature = "desktop-shims", not(target_os = "android")))]
pub fn bootstrap_desktop() -> Result<ContentService> {
    let config = BridgeConfig::builder().build()?;
    ContentService::new(&config)
}

/// Starts a service on the app's JavaVM, checking permissions with
/// `Context.checkSelfPermission`.
#[cfg(all(feature = "android", target_os = "android"))]
pub fn bootstrap_android() -> Result<ContentService> {
    let bridges = bridge_android::build_android_bridges()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    let config = BridgeConfig::builder()
        .host_runtime(bridges.host_runtime)
        .permission_gate(bridges.permission_gate)
        .build()?;
    ContentService::new(&config)
}
