//! # Host Bridge Traits
//!
//! Contract between the content bridge core and a managed host runtime.
//!
//! ## Overview
//!
//! The host owns a content store reachable through URI-addressed CRUD calls
//! (a content provider). Native code reaches it through a per-thread session
//! that hands out opaque object references from a bounded local table. This
//! crate defines that seam; each platform ships a concrete adapter.
//!
//! ## Traits
//!
//! ### Host Runtime
//! - [`HostRuntime`](host::HostRuntime) - Attaches the calling thread and returns a session
//! - [`HostSession`](host::HostSession) - Thread-bound access: reference frames, value boxing, provider calls, cursors
//!
//! ### Authorization
//! - [`PermissionGate`](permission::PermissionGate) - Consulted before a request reaches the host
//!
//! ### Utilities
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In-memory host |
//! | Android  | `bridge-android`    | ✅ JNI |
//!
//! ## Threading
//!
//! [`HostRuntime`](host::HostRuntime) is `Send + Sync` and may be shared
//! freely. [`HostSession`](host::HostSession) is deliberately not `Send`: a
//! session belongs to the thread that attached it and is detached on that
//! thread.
//!
//! ## Error Handling
//!
//! Session calls return [`HostError`](error::HostError). A call that makes the
//! host raise returns `HostError::ExceptionPending`; the caller must then take
//! the fault with [`take_fault`](host::HostSession::take_fault) before issuing
//! any further host call.
//!
//! ## Examples
//!
//! ```ignore
//! use bridge_traits::host::{HostRef, HostRuntime};
//!
//! fn count_notes(runtime: &dyn HostRuntime) -> bridge_traits::error::Result<usize> {
//!     let mut session = runtime.attach()?;
//!     session.push_frame(16)?;
//!     let uri = session.parse_uri("content://com.ichi2.anki.flashcards/notes")?;
//!     let cursor = session.query(uri, HostRef::NULL, HostRef::NULL, HostRef::NULL, HostRef::NULL)?;
//!     let mut rows = 0;
//!     while session.cursor_next(cursor)? {
//!         rows += 1;
//!     }
//!     session.cursor_close(cursor)?;
//!     session.pop_frame()?;
//!     session.detach();
//!     Ok(rows)
//! }
//! ```

pub mod error;
pub mod host;
pub mod log;
pub mod permission;

pub use error::HostError;

pub use host::{HostFault, HostRef, HostRuntime, HostSession, HostType};
pub use log::{LogEntry, LogLevel, LoggerSink};
pub use permission::{AllowAll, PermissionDecision, PermissionGate, PermissionRequest};
