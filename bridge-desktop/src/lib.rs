//! # Desktop Bridge Implementations
//!
//! In-process host runtime for desktop development and tests.
//!
//! ## Overview
//!
//! Desktop has no managed runtime to talk to, so this crate provides one:
//! - [`MemoryHost`] implements `HostRuntime` with per-thread sessions, a
//!   bounded local reference table with frames, and URI-addressed content
//!   providers backed by an in-memory store
//! - [`StaticPermissionGate`] implements `PermissionGate` from a fixed grant list
//! - [`ConsoleLogger`] implements `LoggerSink` on stdout
//!
//! `MemoryHost` keeps a ledger of attachments and reference lifetimes, and
//! supports fault injection ([`HostOp`], [`Fault`]) so failure paths can be
//! exercised deterministically.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{MemoryHost, StaticPermissionGate};
//! use std::sync::Arc;
//!
//! let host = MemoryHost::builder()
//!     .provider("com.ichi2.anki.flashcards")
//!     .attachable_threads("bridge-worker")
//!     .build();
//! let gate = StaticPermissionGate::granting(&["com.ichi2.anki.permission.READ_WRITE_DATABASE"]);
//! // Use in core configuration
//! ```

mod host;
mod logger;
mod permission;
mod session;
pub mod store;

pub use host::{
    Fault, HostOp, HostStats, LedgerEvent, MemoryHost, MemoryHostBuilder, BASE_FRAME_CAPACITY,
    DEFAULT_TABLE_CAPACITY,
};
pub use logger::ConsoleLogger;
pub use permission::StaticPermissionGate;
pub use session::MemorySession;
pub use store::{Cell, Row};
