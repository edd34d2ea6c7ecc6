//! # Content Bridge Core
//!
//! Issues CRUD requests against a host-owned content provider from native
//! code, with deterministic lifetimes for everything that crosses the
//! boundary.
//!
//! ## Overview
//!
//! A call flows leaf-first through:
//!
//! - [`guard`] - Thread-bound [`ConnectionHandle`](guard::ConnectionHandle), one per thread, detached exactly once
//! - [`frame`] - [`ReferenceFrame`](frame::ReferenceFrame) tracking every host reference until release
//! - [`codec`] - [`Value`](value::Value) to host object conversion and back
//! - [`operation`] - Single-use [`OperationBuilder`](operation::OperationBuilder) producing immutable descriptors
//! - [`executor`] - Runs descriptors; queries yield a frame-bound [`ResultSet`](executor::ResultSet)
//! - [`translate`] - Host exception classification into [`BridgeError`]
//! - [`dispatch`] - Async [`DispatchAdapter`](dispatch::DispatchAdapter) re-homing calls onto worker threads
//!
//! ## Threading
//!
//! Nothing below [`dispatch`] suspends. A call acquires its connection,
//! opens its frame, executes and tears down on one worker thread, then
//! hands a plain-data result back through a oneshot channel.
//!
//! ## Usage
//!
//! ```ignore
//! use core_bridge::dispatch::{ContentRequest, DispatchAdapter};
//! use core_bridge::value::ValueMap;
//!
//! let adapter = DispatchAdapter::new(&config)?;
//! let response = adapter
//!     .call(ContentRequest::insert(
//!         "notes",
//!         ValueMap::new().with("flds", "Q\u{1f}A").with("tags", "").with("did", 1i64),
//!     ))
//!     .await?;
//! ```

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod frame;
pub mod guard;
pub mod locator;
pub mod operation;
pub mod translate;
pub mod value;

pub use dispatch::{CallState, ContentRequest, ContentResponse, DispatchAdapter, PendingCall};
pub use error::{BridgeError, ErrorContext, ErrorKind, Result};
pub use executor::{AffectedRows, Execution, InsertedItem, OperationExecutor, ResultSet};
pub use frame::{FrameLimits, FrameStats, RefKind, ReferenceFrame, TrackedRef};
pub use guard::{ConnectionHandle, HandleGuard, ThreadContext};
pub use locator::ResourceLocator;
pub use operation::{Filter, OperationBuilder, OperationDescriptor, OperationKind, SortSpec};
pub use translate::{ErrorTranslator, FaultRule};
pub use value::{Value, ValueKind, ValueMap};
