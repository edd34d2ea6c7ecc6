//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the content bridge:
//! - Logging and tracing infrastructure
//! - Configuration management
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the configuration surface (host runtime, permission gate,
//! worker pool and frame sizing) and the logging conventions used throughout
//! the workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BridgeConfig, BridgeConfigBuilder, ThreadAffinity};
pub use error::{Error, Result};
