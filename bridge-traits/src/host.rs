//! Host Runtime Abstractions
//!
//! A [`HostRuntime`] attaches native threads to the managed host and returns a
//! [`HostSession`]. Everything the session hands out is a [`HostRef`], an
//! opaque slot in the session's local reference table. References are valid
//! only on the session that produced them and only until they are deleted or
//! the frame that contains them is popped.

use std::fmt;
use std::thread::ThreadId;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque handle to a host-managed object.
///
/// `HostRef::NULL` stands for the host's null reference: an absent value, a
/// declined insert, or an unavailable cursor depending on the call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostRef(u64);

impl HostRef {
    pub const NULL: HostRef = HostRef(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "HostRef(null)")
        } else {
            write!(f, "HostRef({:#x})", self.0)
        }
    }
}

/// Runtime type of a host object, as far as the bridge cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostType {
    Null,
    String,
    Long,
    Integer,
    Double,
    ByteArray,
    /// Any other class; carries the class name.
    Other(String),
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Null => write!(f, "null"),
            HostType::String => write!(f, "java.lang.String"),
            HostType::Long => write!(f, "java.lang.Long"),
            HostType::Integer => write!(f, "java.lang.Integer"),
            HostType::Double => write!(f, "java.lang.Double"),
            HostType::ByteArray => write!(f, "byte[]"),
            HostType::Other(class) => write!(f, "{class}"),
        }
    }
}

/// Description of a host exception, detached from any host reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFault {
    /// Fully qualified exception class, e.g. `java.lang.SecurityException`.
    pub class_name: String,
    /// Result of `getMessage()`, when the host provided one.
    pub message: Option<String>,
}

impl HostFault {
    pub fn new(class_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message,
        }
    }

    /// Class name without its package.
    pub fn simple_name(&self) -> &str {
        self.class_name
            .rsplit(['.', '$'])
            .next()
            .unwrap_or(&self.class_name)
    }
}

impl fmt::Display for HostFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message),
            None => write!(f, "{}", self.class_name),
        }
    }
}

/// Entry point into the host. Shared by every thread of the process.
pub trait HostRuntime: Send + Sync {
    /// Attaches the calling thread and returns its session.
    ///
    /// Fails with `HostError::NotAttachable` when the thread may not talk to
    /// the host at all.
    fn attach(&self) -> Result<Box<dyn HostSession>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Thread-bound connection into the host runtime.
///
/// Not `Send`: a session lives and dies on the thread that attached it.
/// Every method that makes the host raise returns
/// `HostError::ExceptionPending`; the exception stays pending until
/// [`take_fault`](HostSession::take_fault) is called.
pub trait HostSession {
    /// Thread this session was attached on.
    fn thread_id(&self) -> ThreadId;

    // ----- local reference table -----

    /// Opens a local frame with room for `capacity` references.
    fn push_frame(&mut self, capacity: usize) -> Result<()>;

    /// Pops the innermost local frame, freeing whatever it still holds.
    fn pop_frame(&mut self) -> Result<()>;

    /// Frees a single local reference.
    fn delete_ref(&mut self, obj: HostRef) -> Result<()>;

    // ----- value boxing -----

    fn new_string(&mut self, value: &str) -> Result<HostRef>;
    fn new_long(&mut self, value: i64) -> Result<HostRef>;
    fn new_integer(&mut self, value: i32) -> Result<HostRef>;
    fn new_byte_array(&mut self, value: &[u8]) -> Result<HostRef>;

    /// Allocates a `String[]` of `len` null entries.
    fn new_string_array(&mut self, len: usize) -> Result<HostRef>;

    /// Stores `item` at `index` of an array from [`new_string_array`] or
    /// [`new_content_values_array`]. The array keeps the object alive, so the
    /// caller may delete its own reference to `item` right after.
    ///
    /// [`new_string_array`]: HostSession::new_string_array
    /// [`new_content_values_array`]: HostSession::new_content_values_array
    fn set_array_element(&mut self, array: HostRef, index: usize, item: HostRef) -> Result<()>;

    fn type_of(&mut self, obj: HostRef) -> Result<HostType>;
    fn read_string(&mut self, obj: HostRef) -> Result<String>;
    fn read_long(&mut self, obj: HostRef) -> Result<i64>;
    fn read_integer(&mut self, obj: HostRef) -> Result<i32>;
    fn read_byte_array(&mut self, obj: HostRef) -> Result<Vec<u8>>;

    // ----- key/value containers -----

    fn new_content_values(&mut self) -> Result<HostRef>;

    /// Stores `value` under `key`. A null `value` stores an explicit null.
    fn put_value(&mut self, values: HostRef, key: HostRef, value: HostRef) -> Result<()>;

    /// Allocates a `ContentValues[]` of `len` null entries.
    fn new_content_values_array(&mut self, len: usize) -> Result<HostRef>;

    // ----- content provider -----

    fn parse_uri(&mut self, uri: &str) -> Result<HostRef>;

    /// Last path segment of a URI, if it has one.
    fn uri_last_segment(&mut self, uri: HostRef) -> Result<Option<String>>;

    /// Returns the new item's URI, or `HostRef::NULL` when the provider declined.
    fn insert(&mut self, uri: HostRef, values: HostRef) -> Result<HostRef>;

    fn bulk_insert(&mut self, uri: HostRef, values: HostRef) -> Result<i32>;

    /// Returns a cursor, or `HostRef::NULL` when no provider answered.
    fn query(
        &mut self,
        uri: HostRef,
        projection: HostRef,
        selection: HostRef,
        selection_args: HostRef,
        sort_order: HostRef,
    ) -> Result<HostRef>;

    fn update(
        &mut self,
        uri: HostRef,
        values: HostRef,
        selection: HostRef,
        selection_args: HostRef,
    ) -> Result<i32>;

    fn delete(&mut self, uri: HostRef, selection: HostRef, selection_args: HostRef)
        -> Result<i32>;

    // ----- cursors -----

    fn cursor_columns(&mut self, cursor: HostRef) -> Result<Vec<String>>;

    /// Advances the cursor; `false` once it is past the last row.
    fn cursor_next(&mut self, cursor: HostRef) -> Result<bool>;

    /// Boxes column `index` of the current row. SQL null yields `HostRef::NULL`.
    fn cursor_value(&mut self, cursor: HostRef, index: usize) -> Result<HostRef>;

    fn cursor_close(&mut self, cursor: HostRef) -> Result<()>;

    // ----- faults -----

    /// Describes and clears the pending exception, if any.
    fn take_fault(&mut self) -> Option<HostFault>;

    /// Detaches the thread from the host. Consumes the session.
    fn detach(self: Box<Self>);
}
