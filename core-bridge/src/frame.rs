//! Scoped tracking of host local references.
//!
//! A [`ReferenceFrame`] pushes a local frame on the host and records every
//! reference created inside it in an arena. Each reference is released
//! exactly once: explicitly through [`ReferenceFrame::release`], in a flush
//! of retired references, or when the frame closes. Closing walks the arena
//! in reverse acquisition order, keeps going past failed releases and
//! reports the first failure.
//!
//! Frames nest through [`ReferenceFrame::subframe`]. A child mutably borrows
//! its parent, so it is always closed first.

use std::sync::atomic::{AtomicU64, Ordering};

use bridge_traits::error::Result as HostResult;
use bridge_traits::host::{HostRef, HostSession};
use tracing::{debug, trace, warn};

use crate::error::{BridgeError, Result};
use crate::guard::ConnectionHandle;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Size limits of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// References the frame may hold at once.
    pub capacity: usize,
    /// Held references at which retired ones are flushed before allocating more.
    pub flush_threshold: usize,
}

impl FrameLimits {
    /// Clamps the threshold into `1..=capacity`.
    pub fn new(capacity: usize, flush_threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            flush_threshold: flush_threshold.clamp(1, capacity),
        }
    }

    /// Threshold at seven eighths of `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, capacity - capacity / 8)
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self::with_capacity(core_runtime::config::DEFAULT_FRAME_CAPACITY)
    }
}

/// What releasing a reference involves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Local,
    /// Closed on the host before its reference is deleted.
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefState {
    Live,
    Retired,
    Released,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    raw: HostRef,
    kind: RefKind,
    state: RefState,
}

/// Index of a reference inside the frame that tracked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackedRef {
    frame: u64,
    index: usize,
    raw: HostRef,
}

impl TrackedRef {
    pub fn raw(&self) -> HostRef {
        self.raw
    }

    pub fn frame_id(&self) -> u64 {
        self.frame
    }
}

/// Counters for one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub tracked: usize,
    pub released: usize,
    pub flushes: usize,
    pub peak_held: usize,
}

pub struct ReferenceFrame<'h> {
    handle: &'h mut ConnectionHandle,
    id: u64,
    depth: usize,
    limits: FrameLimits,
    entries: Vec<Entry>,
    held: usize,
    retired: usize,
    stats: FrameStats,
    closed: bool,
}

impl<'h> ReferenceFrame<'h> {
    /// Opens a top-level frame on `handle`.
    pub fn open(handle: &'h mut ConnectionHandle, limits: FrameLimits) -> Result<Self> {
        Self::push(handle, limits, 0)
    }

    fn push(handle: &'h mut ConnectionHandle, limits: FrameLimits, depth: usize) -> Result<Self> {
        let pushed = handle.session()?.push_frame(limits.capacity);
        pushed.map_err(|err| handle.fail(err))?;

        let id = NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed);
        debug!(frame = id, depth, capacity = limits.capacity, "Reference frame opened");
        Ok(Self {
            handle,
            id,
            depth,
            limits,
            entries: Vec::new(),
            held: 0,
            retired: 0,
            stats: FrameStats::default(),
            closed: false,
        })
    }

    /// Opens a child frame. The child must be closed (or dropped) before
    /// this frame can be used again.
    pub fn subframe(&mut self, capacity: usize) -> Result<ReferenceFrame<'_>> {
        self.ensure_open()?;
        ReferenceFrame::push(&mut *self.handle, FrameLimits::with_capacity(capacity), self.depth + 1)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn limits(&self) -> FrameLimits {
        self.limits
    }

    /// References currently occupying the frame, retired ones included.
    pub fn held(&self) -> usize {
        self.held
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Runs a host call that creates no local reference.
    pub fn call<T>(&mut self, op: impl FnOnce(&mut dyn HostSession) -> HostResult<T>) -> Result<T> {
        self.ensure_open()?;
        self.host(op)
    }

    /// Runs a host call that returns a new local reference and tracks it.
    ///
    /// A null result is `Ok(None)` and is not tracked.
    pub fn acquire(
        &mut self,
        kind: RefKind,
        op: impl FnOnce(&mut dyn HostSession) -> HostResult<HostRef>,
    ) -> Result<Option<TrackedRef>> {
        self.ensure_open()?;
        self.make_room()?;
        let raw = self.host(op)?;
        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(self.push_entry(raw, kind)))
    }

    /// Like [`acquire`](Self::acquire) for calls that never legitimately
    /// return null.
    pub fn acquire_local(
        &mut self,
        op: impl FnOnce(&mut dyn HostSession) -> HostResult<HostRef>,
    ) -> Result<TrackedRef> {
        self.acquire(RefKind::Local, op)?
            .ok_or_else(|| BridgeError::HostRuntimeFault {
                detail: "host returned null for a new local reference".to_string(),
                fault: None,
            })
    }

    /// Tracks a reference obtained outside the frame's own calls.
    pub fn track(&mut self, raw: HostRef) -> Result<TrackedRef> {
        self.track_as(raw, RefKind::Local)
    }

    pub fn track_cursor(&mut self, raw: HostRef) -> Result<TrackedRef> {
        self.track_as(raw, RefKind::Cursor)
    }

    fn track_as(&mut self, raw: HostRef, kind: RefKind) -> Result<TrackedRef> {
        self.ensure_open()?;
        if raw.is_null() {
            return Err(BridgeError::InvalidOperation(
                "cannot track a null reference".to_string(),
            ));
        }
        self.make_room()?;
        Ok(self.push_entry(raw, kind))
    }

    /// The raw reference behind `tracked`, if it is still held.
    pub fn get(&self, tracked: TrackedRef) -> Result<HostRef> {
        let index = self.locate(tracked)?;
        match self.entries[index].state {
            RefState::Released => Err(BridgeError::InvalidOperation(
                "reference already released".to_string(),
            )),
            _ => Ok(tracked.raw),
        }
    }

    /// Releases one reference now.
    pub fn release(&mut self, tracked: TrackedRef) -> Result<()> {
        self.ensure_open()?;
        let index = self.locate(tracked)?;
        if self.entries[index].state == RefState::Released {
            return Err(BridgeError::InvalidOperation(
                "reference already released".to_string(),
            ));
        }
        self.release_entry(index)
    }

    /// Marks a reference as no longer needed. It stays valid until the next
    /// flush or until the frame closes.
    pub fn retire(&mut self, tracked: TrackedRef) -> Result<()> {
        self.ensure_open()?;
        let index = self.locate(tracked)?;
        let entry = &mut self.entries[index];
        if entry.state != RefState::Live {
            return Err(BridgeError::InvalidOperation(
                "reference is not live".to_string(),
            ));
        }
        entry.state = RefState::Retired;
        self.retired += 1;
        Ok(())
    }

    /// Releases every retired reference, newest first.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.retired == 0 {
            return Ok(());
        }
        let mut first_fault = None;
        for index in (0..self.entries.len()).rev() {
            if self.entries[index].state != RefState::Retired {
                continue;
            }
            if let Err(err) = self.release_entry(index) {
                warn!(frame = self.id, error = %err, "Release failed during flush");
                first_fault.get_or_insert(err);
            }
        }
        self.stats.flushes += 1;
        trace!(frame = self.id, held = self.held, "Retired references flushed");
        first_fault.map_or(Ok(()), Err)
    }

    /// Releases everything still held and pops the host frame.
    pub fn close(mut self) -> Result<FrameStats> {
        self.close_inner()?;
        Ok(self.stats.clone())
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_fault = None;
        for index in (0..self.entries.len()).rev() {
            if self.entries[index].state == RefState::Released {
                continue;
            }
            if let Err(err) = self.release_entry(index) {
                warn!(frame = self.id, error = %err, "Release failed during frame teardown");
                first_fault.get_or_insert(err);
            }
        }
        if let Err(err) = self.host(|session| session.pop_frame()) {
            warn!(frame = self.id, error = %err, "Host frame pop failed");
            first_fault.get_or_insert(err);
        }

        debug!(
            frame = self.id,
            depth = self.depth,
            tracked = self.stats.tracked,
            released = self.stats.released,
            "Reference frame closed"
        );
        first_fault.map_or(Ok(()), Err)
    }

    fn host<T>(&mut self, op: impl FnOnce(&mut dyn HostSession) -> HostResult<T>) -> Result<T> {
        let result = op(self.handle.session()?);
        result.map_err(|err| self.handle.fail(err))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BridgeError::InvalidOperation(format!(
                "frame {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn locate(&self, tracked: TrackedRef) -> Result<usize> {
        if tracked.frame != self.id {
            return Err(BridgeError::InvalidOperation(format!(
                "reference belongs to frame {}, not frame {}",
                tracked.frame, self.id
            )));
        }
        if tracked.index >= self.entries.len() {
            return Err(BridgeError::InvalidOperation(format!(
                "unknown reference index {}",
                tracked.index
            )));
        }
        Ok(tracked.index)
    }

    fn make_room(&mut self) -> Result<()> {
        if self.held >= self.limits.flush_threshold && self.retired > 0 {
            self.flush()?;
        }
        if self.held >= self.limits.capacity {
            return Err(self.exhausted());
        }
        Ok(())
    }

    fn exhausted(&self) -> BridgeError {
        BridgeError::ReferenceTableExhausted(format!(
            "frame {} holds {} of {} references",
            self.id, self.held, self.limits.capacity
        ))
    }

    fn push_entry(&mut self, raw: HostRef, kind: RefKind) -> TrackedRef {
        let index = self.entries.len();
        self.entries.push(Entry {
            raw,
            kind,
            state: RefState::Live,
        });
        self.held += 1;
        self.stats.tracked += 1;
        self.stats.peak_held = self.stats.peak_held.max(self.held);
        trace!(frame = self.id, index, obj = ?raw, ?kind, "Reference tracked");
        TrackedRef {
            frame: self.id,
            index,
            raw,
        }
    }

    /// Releases entry `index`. The entry counts as released even when the
    /// host call fails: the frame pop reclaims whatever is left.
    fn release_entry(&mut self, index: usize) -> Result<()> {
        let Entry { raw, kind, state } = self.entries[index];
        self.entries[index].state = RefState::Released;
        self.held -= 1;
        if state == RefState::Retired {
            self.retired -= 1;
        }
        self.stats.released += 1;

        let closed = match kind {
            RefKind::Cursor => self.host(|session| session.cursor_close(raw)),
            RefKind::Local => Ok(()),
        };
        let deleted = self.host(|session| session.delete_ref(raw));
        trace!(frame = self.id, index, obj = ?raw, "Reference released");
        closed.and(deleted)
    }
}

impl Drop for ReferenceFrame<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            warn!(frame = self.id, error = %err, "Frame closed on drop with a fault");
        }
    }
}

impl std::fmt::Debug for ReferenceFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceFrame")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("held", &self.held)
            .field("closed", &self.closed)
            .finish()
    }
}
