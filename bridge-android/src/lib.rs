//! Android Bridge Implementations
//!
//! JNI-backed implementations of the `bridge-traits` host seam for apps
//! running inside the Android runtime.
//!
//! # Platform Support
//!
//! This crate is compiled only for `target_os = "android"`. The JavaVM and
//! the application `Context` are taken from `ndk-context`, which the
//! activity glue initializes before native code runs.
//!
//! # Implementations
//!
//! - [`AndroidHost`]: `HostRuntime` attaching threads to the JavaVM and talking
//!   to the app's `ContentResolver`
//! - [`SelfPermissionGate`]: `PermissionGate` backed by `Context.checkSelfPermission`
//!
//! # Examples
//!
//! ```ignore
//! use bridge_android::build_android_bridges;
//! use core_runtime::config::BridgeConfig;
//!
//! let bridges = build_android_bridges()?;
//! let config = BridgeConfig::builder()
//!     .host_runtime(bridges.host_runtime)
//!     .permission_gate(bridges.permission_gate)
//!     .build()?;
//! ```

#![cfg(target_os = "android")]

pub mod bootstrap;
mod env;
pub mod host;
pub mod permission;
mod session;

pub use bootstrap::{build_android_bridges, AndroidBridgeSet};
pub use host::AndroidHost;
pub use permission::SelfPermissionGate;
