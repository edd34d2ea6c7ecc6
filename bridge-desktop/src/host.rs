//! In-process host runtime.
//!
//! [`MemoryHost`] behaves like a managed runtime exposing content providers:
//! threads attach to get a session, sessions hand out references from a
//! bounded local table, provider calls can raise exceptions that stay pending
//! until taken. Everything that happens is written to a ledger so lifetime
//! guarantees can be checked from the outside.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use bridge_traits::error::{HostError, Result};
use bridge_traits::host::{HostFault, HostRef, HostRuntime, HostSession};
use parking_lot::Mutex;
use tracing::debug;

use crate::session::MemorySession;
use crate::store::{ContentStore, Row, StoreError};

/// Slots in a session's local reference table.
pub const DEFAULT_TABLE_CAPACITY: usize = 1024;

/// Slots available before any frame is pushed.
pub const BASE_FRAME_CAPACITY: usize = 16;

/// Host calls that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    Attach,
    Query,
    Insert,
    BulkInsert,
    Update,
    Delete,
    CursorNext,
    CursorValue,
    CursorClose,
    DeleteRef,
    PopFrame,
}

/// What an injected fault does.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Raise a host exception.
    Throw(HostFault),
    /// Insert returns a null URI, query returns a null cursor.
    Decline,
    /// Fail at the runtime level without an exception.
    Fail(HostError),
}

impl Fault {
    pub fn throw(class_name: &str, message: &str) -> Self {
        Fault::Throw(HostFault::new(class_name, Some(message.to_string())))
    }
}

#[derive(Debug)]
struct FaultRule {
    op: HostOp,
    fault: Fault,
    remaining: Option<usize>,
}

/// Counters kept by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    pub attaches: usize,
    pub detaches: usize,
    pub live_sessions: usize,
    pub peak_sessions: usize,
    pub refs_created: usize,
    pub refs_deleted: usize,
    pub refs_freed_by_pop: usize,
    pub refs_leaked_at_detach: usize,
    pub frames_pushed: usize,
    pub frames_popped: usize,
    pub cursors_opened: usize,
    pub cursors_closed: usize,
}

impl HostStats {
    /// References that were neither deleted nor freed with their frame.
    pub fn refs_outstanding(&self) -> usize {
        self.refs_created - self.refs_deleted - self.refs_freed_by_pop
    }
}

/// One entry in the host ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Attached { session: u64, thread: ThreadId },
    Created { session: u64, obj: HostRef },
    Deleted { session: u64, obj: HostRef },
    FreedByPop { session: u64, obj: HostRef },
    Detached { session: u64, leaked: usize },
}

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    pub(crate) stats: HostStats,
    pub(crate) events: Vec<LedgerEvent>,
}

impl Ledger {
    pub(crate) fn record(&mut self, event: LedgerEvent) {
        match &event {
            LedgerEvent::Attached { .. } => {
                self.stats.attaches += 1;
                self.stats.live_sessions += 1;
                self.stats.peak_sessions = self.stats.peak_sessions.max(self.stats.live_sessions);
            }
            LedgerEvent::Created { .. } => self.stats.refs_created += 1,
            LedgerEvent::Deleted { .. } => self.stats.refs_deleted += 1,
            LedgerEvent::FreedByPop { .. } => self.stats.refs_freed_by_pop += 1,
            LedgerEvent::Detached { leaked, .. } => {
                self.stats.detaches += 1;
                self.stats.live_sessions -= 1;
                self.stats.refs_leaked_at_detach += leaked;
            }
        }
        self.events.push(event);
    }
}

pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) table_capacity: usize,
    attach_prefix: Option<String>,
    pub(crate) store: Mutex<ContentStore>,
    faults: Mutex<Vec<FaultRule>>,
    pub(crate) ledger: Mutex<Ledger>,
    next_session: AtomicU64,
}

impl Shared {
    /// Returns the fault armed for `op`, consuming one use of it.
    pub(crate) fn next_fault(&self, op: HostOp) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let index = faults.iter().position(|rule| rule.op == op)?;
        let fault = faults[index].fault.clone();
        if let Some(remaining) = faults[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Some(fault)
    }
}

/// Builder for [`MemoryHost`].
#[derive(Debug)]
pub struct MemoryHostBuilder {
    name: String,
    table_capacity: usize,
    attach_prefix: Option<String>,
    store: ContentStore,
}

impl Default for MemoryHostBuilder {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            table_capacity: DEFAULT_TABLE_CAPACITY,
            attach_prefix: None,
            store: ContentStore::default(),
        }
    }
}

impl MemoryHostBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn table_capacity(mut self, capacity: usize) -> Self {
        self.table_capacity = capacity;
        self
    }

    /// Registers a provider whose collections accept any column.
    pub fn provider(mut self, authority: &str) -> Self {
        self.store.register_provider(authority);
        self
    }

    /// Registers a collection with a fixed column set.
    pub fn collection(mut self, authority: &str, collection: &str, columns: &[&str]) -> Self {
        self.store.register_collection(authority, collection, columns);
        self
    }

    /// Only threads whose name starts with `prefix` may attach.
    pub fn attachable_threads(mut self, prefix: impl Into<String>) -> Self {
        self.attach_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> MemoryHost {
        MemoryHost {
            shared: Arc::new(Shared {
                name: self.name,
                table_capacity: self.table_capacity,
                attach_prefix: self.attach_prefix,
                store: Mutex::new(self.store),
                faults: Mutex::new(Vec::new()),
                ledger: Mutex::new(Ledger::default()),
                next_session: AtomicU64::new(1),
            }),
        }
    }
}

/// Simulated managed runtime with in-memory content providers.
///
/// Cloning shares the same runtime.
#[derive(Clone)]
pub struct MemoryHost {
    shared: Arc<Shared>,
}

impl MemoryHost {
    pub fn builder() -> MemoryHostBuilder {
        MemoryHostBuilder::default()
    }

    /// Arms `fault` for every future `op` until cleared.
    pub fn inject(&self, op: HostOp, fault: Fault) {
        self.shared.faults.lock().push(FaultRule {
            op,
            fault,
            remaining: None,
        });
    }

    /// Arms `fault` for the next `op` only.
    pub fn inject_once(&self, op: HostOp, fault: Fault) {
        self.shared.faults.lock().push(FaultRule {
            op,
            fault,
            remaining: Some(1),
        });
    }

    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
    }

    pub fn stats(&self) -> HostStats {
        self.shared.ledger.lock().stats.clone()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.shared.ledger.lock().events.clone()
    }

    /// Events belonging to one session, in order.
    pub fn session_events(&self, session: u64) -> Vec<LedgerEvent> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                LedgerEvent::Attached { session: s, .. }
                | LedgerEvent::Created { session: s, .. }
                | LedgerEvent::Deleted { session: s, .. }
                | LedgerEvent::FreedByPop { session: s, .. }
                | LedgerEvent::Detached { session: s, .. } => *s == session,
            })
            .collect()
    }

    /// References whose release did not free the newest live reference of
    /// their session. Empty when every session released strictly last in,
    /// first out.
    pub fn out_of_order_releases(&self) -> Vec<HostRef> {
        let mut live: HashMap<u64, Vec<HostRef>> = HashMap::new();
        let mut out_of_order = Vec::new();
        for event in self.events() {
            match event {
                LedgerEvent::Created { session, obj } => live.entry(session).or_default().push(obj),
                LedgerEvent::Deleted { session, obj } | LedgerEvent::FreedByPop { session, obj } => {
                    let stack = live.entry(session).or_default();
                    if stack.last() == Some(&obj) {
                        stack.pop();
                    } else {
                        out_of_order.push(obj);
                        if let Some(position) = stack.iter().rposition(|held| *held == obj) {
                            stack.remove(position);
                        }
                    }
                }
                LedgerEvent::Attached { .. } | LedgerEvent::Detached { .. } => {}
            }
        }
        out_of_order
    }

    /// Threads that attached, keyed by session id.
    pub fn session_threads(&self) -> HashMap<u64, ThreadId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LedgerEvent::Attached { session, thread } => Some((session, thread)),
                _ => None,
            })
            .collect()
    }

    /// Writes a row directly into the store. Returns the row's URI.
    pub fn seed(&self, uri: &str, row: Row) -> std::result::Result<String, StoreError> {
        self.shared.store.lock().insert(uri, row)
    }

    pub fn row_count(&self, authority: &str, collection: &str) -> usize {
        self.shared.store.lock().row_count(authority, collection)
    }
}

impl std::fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHost")
            .field("name", &self.shared.name)
            .field("table_capacity", &self.shared.table_capacity)
            .finish()
    }
}

impl HostRuntime for MemoryHost {
    fn attach(&self) -> Result<Box<dyn HostSession>> {
        let current = thread::current();
        if let Some(prefix) = &self.shared.attach_prefix {
            let name = current.name().unwrap_or_default();
            if !name.starts_with(prefix.as_str()) {
                return Err(HostError::NotAttachable(format!(
                    "thread '{name}' is not allowed to attach to {}",
                    self.shared.name
                )));
            }
        }
        match self.shared.next_fault(HostOp::Attach) {
            Some(Fault::Fail(err)) => return Err(err),
            Some(Fault::Throw(fault)) => return Err(HostError::NotAttachable(fault.to_string())),
            Some(Fault::Decline) | None => {}
        }

        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        self.shared.ledger.lock().record(LedgerEvent::Attached {
            session: id,
            thread: current.id(),
        });
        debug!(host = %self.shared.name, session = id, thread = ?current.name(), "Thread attached");
        Ok(Box::new(MemorySession::new(id, current.id(), Arc::clone(&self.shared))))
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach_counts() {
        let host = MemoryHost::builder().provider("a").build();
        let session = host.attach().unwrap();
        assert_eq!(host.stats().live_sessions, 1);
        session.detach();

        let stats = host.stats();
        assert_eq!(stats.attaches, 1);
        assert_eq!(stats.detaches, 1);
        assert_eq!(stats.live_sessions, 0);
    }

    #[test]
    fn test_attach_prefix_enforced() {
        let host = MemoryHost::builder().attachable_threads("bridge-worker").build();
        let err = host.attach().err().unwrap();
        assert!(matches!(err, HostError::NotAttachable(_)));

        let handle = thread::Builder::new()
            .name("bridge-worker-0".to_string())
            .spawn({
                let host = host.clone();
                move || host.attach().map(|session| session.detach()).is_ok()
            })
            .unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_out_of_order_release_detected() {
        let host = MemoryHost::builder().build();
        let mut session = host.attach().unwrap();
        let first = session.new_string("a").unwrap();
        let second = session.new_string("b").unwrap();
        session.delete_ref(second).unwrap();
        session.delete_ref(first).unwrap();
        assert!(host.out_of_order_releases().is_empty());

        let third = session.new_string("c").unwrap();
        let fourth = session.new_string("d").unwrap();
        session.delete_ref(third).unwrap();
        session.delete_ref(fourth).unwrap();
        session.detach();
        assert_eq!(host.out_of_order_releases(), vec![third]);
    }

    #[test]
    fn test_inject_once_consumed() {
        let host = MemoryHost::builder().build();
        host.inject_once(HostOp::Attach, Fault::Fail(HostError::Unavailable("down".into())));
        assert!(host.attach().is_err());
        assert!(host.attach().is_ok_and(|session| {
            session.detach();
            true
        }));
    }
}
