//! # Bridge Configuration Module
//!
//! Provides configuration management for the content bridge.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `BridgeConfig` that holds the host runtime, the authorization gate and the
//! tuning knobs of the dispatch pool and reference frames. It enforces
//! fail-fast validation so a misconfigured bridge never reaches the host.
//!
//! ## Required Dependencies
//!
//! - `HostRuntime` - Connection into the managed host
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `PermissionGate` - Authorization check per request (default: allow all)
//! - `LoggerSink` - Host log forwarding (default: none)
//!
//! When the `desktop-shims` feature is enabled, an in-memory host exposing the
//! configured authority is injected automatically if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::BridgeConfig;
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::builder()
//!     .host_runtime(Arc::new(my_host))
//!     .worker_threads(4)
//!     .call_timeout(std::time::Duration::from_secs(5))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::BridgeConfig;
//!
//! // Fails: the flush threshold cannot exceed the frame capacity
//! let config = BridgeConfig::builder()
//!     .frame_capacity(16)
//!     .flush_threshold(32)
//!     .build()
//!     .expect("Should fail - invalid frame settings");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AllowAll, HostRuntime, LoggerSink, PermissionGate};
use std::sync::Arc;
use std::time::Duration;

/// Authority of the FlashCards content provider.
pub const DEFAULT_AUTHORITY: &str = "com.ichi2.anki.flashcards";

/// Permission required to read and write through the FlashCards provider.
pub const DEFAULT_PERMISSION: &str = "com.ichi2.anki.permission.READ_WRITE_DATABASE";

/// References reserved by a top-level frame. Matches the host's default local frame.
pub const DEFAULT_FRAME_CAPACITY: usize = 512;

/// Which threads may acquire a host connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadAffinity {
    /// Only threads of the bridge's dedicated worker pool.
    #[default]
    WorkerOnly,
    /// Any thread that is not driving an async runtime.
    AnyBlocking,
}

/// Configuration for the content bridge.
///
/// Use [`BridgeConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Managed host the bridge talks to
    pub host_runtime: Arc<dyn HostRuntime>,

    /// Consulted before any request reaches the host
    pub permission_gate: Arc<dyn PermissionGate>,

    /// Host log forwarding (optional)
    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    /// Authority used for relative locators
    pub authority: String,

    /// Permission checked for every request
    pub permission: String,

    /// Size of the dedicated worker pool
    pub worker_threads: usize,

    /// Requests that may wait for a free worker
    pub queue_capacity: usize,

    /// References reserved by each top-level frame
    pub frame_capacity: usize,

    /// Live references that force an intermediate flush
    pub flush_threshold: usize,

    /// Deadline for waiting on a call's completion
    pub call_timeout: Option<Duration>,

    /// Threads allowed to acquire a connection
    pub thread_affinity: ThreadAffinity,

    /// Upper bound on rows materialized per query
    pub max_rows: Option<usize>,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("host_runtime", &self.host_runtime.name())
            .field("permission_gate", &"PermissionGate { ... }")
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("authority", &self.authority)
            .field("permission", &self.permission)
            .field("worker_threads", &self.worker_threads)
            .field("queue_capacity", &self.queue_capacity)
            .field("frame_capacity", &self.frame_capacity)
            .field("flush_threshold", &self.flush_threshold)
            .field("call_timeout", &self.call_timeout)
            .field("thread_affinity", &self.thread_affinity)
            .field("max_rows", &self.max_rows)
            .finish()
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.authority.trim().is_empty() {
            return Err(Error::Config("Authority cannot be empty".to_string()));
        }

        if self.authority.contains('/') {
            return Err(Error::Config(format!(
                "Authority must not contain '/': {}",
                self.authority
            )));
        }

        if self.permission.trim().is_empty() {
            return Err(Error::Config("Permission cannot be empty".to_string()));
        }

        if self.worker_threads == 0 {
            return Err(Error::Config(
                "At least one worker thread is required".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.frame_capacity == 0 {
            return Err(Error::Config(
                "Frame capacity must be greater than 0".to_string(),
            ));
        }

        if self.flush_threshold == 0 || self.flush_threshold > self.frame_capacity {
            return Err(Error::Config(format!(
                "Flush threshold must be within 1..={} (frame capacity), got {}",
                self.frame_capacity, self.flush_threshold
            )));
        }

        if matches!(self.call_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(Error::Config(
                "Call timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_rows == Some(0) {
            return Err(Error::Config(
                "Row limit must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn host_runtime_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HostRuntime".to_string(),
        message: "HostRuntime implementation is required to reach the content provider. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the in-memory host. \
                 Android: inject the JNI host from bridge-android."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_host_runtime(authority: &str) -> Result<Arc<dyn HostRuntime>> {
    use bridge_desktop::MemoryHost;

    let host: Arc<dyn HostRuntime> = Arc::new(MemoryHost::builder().provider(authority).build());
    Ok(host)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_host_runtime(_authority: &str) -> Result<Arc<dyn HostRuntime>> {
    Err(host_runtime_missing_error())
}

/// Builder for constructing [`BridgeConfig`] instances.
#[derive(Default)]
pub struct BridgeConfigBuilder {
    host_runtime: Option<Arc<dyn HostRuntime>>,
    permission_gate: Option<Arc<dyn PermissionGate>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    authority: Option<String>,
    permission: Option<String>,
    worker_threads: Option<usize>,
    queue_capacity: Option<usize>,
    frame_capacity: Option<usize>,
    flush_threshold: Option<usize>,
    call_timeout: Option<Duration>,
    thread_affinity: ThreadAffinity,
    max_rows: Option<usize>,
}

impl BridgeConfigBuilder {
    pub fn host_runtime(mut self, host: Arc<dyn HostRuntime>) -> Self {
        self.host_runtime = Some(host);
        self
    }

    pub fn permission_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.permission_gate = Some(gate);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    /// Sets the authority used for relative locators.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::BridgeConfig;
    ///
    /// let builder = BridgeConfig::builder().authority("com.example.provider");
    /// ```
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the frame capacity. Unless set explicitly, the flush threshold
    /// follows at seven eighths of it.
    pub fn frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = Some(capacity);
        self
    }

    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = Some(threshold);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn thread_affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.thread_affinity = affinity;
        self
    }

    pub fn max_rows(mut self, rows: usize) -> Self {
        self.max_rows = Some(rows);
        self
    }

    /// Builds the final `BridgeConfig` instance.
    ///
    /// Returns an error if the host runtime is missing (and no desktop default
    /// is available) or if any setting is out of range.
    pub fn build(self) -> Result<BridgeConfig> {
        let authority = self
            .authority
            .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string());

        let host_runtime = match self.host_runtime {
            Some(host) => host,
            None => provide_default_host_runtime(&authority)?,
        };

        let frame_capacity = self.frame_capacity.unwrap_or(DEFAULT_FRAME_CAPACITY);
        let flush_threshold = self
            .flush_threshold
            .unwrap_or_else(|| (frame_capacity - frame_capacity / 8).max(1));

        let config = BridgeConfig {
            host_runtime,
            permission_gate: self
                .permission_gate
                .unwrap_or_else(|| Arc::new(AllowAll)),
            logger_sink: self.logger_sink,
            authority,
            permission: self
                .permission
                .unwrap_or_else(|| DEFAULT_PERMISSION.to_string()),
            worker_threads: self.worker_threads.unwrap_or(2),
            queue_capacity: self.queue_capacity.unwrap_or(256),
            frame_capacity,
            flush_threshold,
            call_timeout: self.call_timeout,
            thread_affinity: self.thread_affinity,
            max_rows: self.max_rows,
        };

        config.validate()?;

        Ok(config)
    }
}
