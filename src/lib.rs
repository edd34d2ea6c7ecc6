//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service` and the platform bridges). Host
//! applications can depend on `content-bridge-workspace` and enable
//! `desktop-shims` or `android` without wiring each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "android"))]
pub use core_service::*;
