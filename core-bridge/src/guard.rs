//! Scoped, thread-bound access to the host runtime.
//!
//! A [`ConnectionHandle`] wraps one attached host session. It is created by
//! [`HandleGuard::acquire`], lives on the acquiring thread only, and detaches
//! from the host exactly once when dropped. At most one handle exists per
//! thread at any time.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use bridge_traits::error::HostError;
use bridge_traits::host::{HostRuntime, HostSession};
use core_async::pool;
use core_async::runtime::in_async_context;
use core_runtime::config::ThreadAffinity;
use tracing::{debug, error};

use crate::error::{BridgeError, Result};
use crate::translate::ErrorTranslator;

thread_local! {
    static CONNECTION_HELD: Cell<bool> = const { Cell::new(false) };
}

/// Snapshot of the thread a call is about to run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContext {
    thread: ThreadId,
    name: Option<String>,
    worker: Option<usize>,
    in_async_runtime: bool,
}

impl ThreadContext {
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            thread: current.id(),
            name: current.name().map(str::to_string),
            worker: pool::current_worker_index(),
            in_async_runtime: in_async_context(),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the thread belongs to the bridge's worker pool.
    pub fn is_bridge_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Whether the thread is driving an async runtime.
    pub fn in_async_runtime(&self) -> bool {
        self.in_async_runtime
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("'{name}' ({:?})", self.thread),
            None => format!("{:?}", self.thread),
        }
    }
}

/// Hands out [`ConnectionHandle`]s under a thread affinity policy.
///
/// Cheap to share: the guard itself holds no host state.
#[derive(Clone)]
pub struct HandleGuard {
    runtime: Arc<dyn HostRuntime>,
    affinity: ThreadAffinity,
    translator: Arc<ErrorTranslator>,
}

impl HandleGuard {
    pub fn new(runtime: Arc<dyn HostRuntime>, affinity: ThreadAffinity) -> Self {
        Self {
            runtime,
            affinity,
            translator: Arc::new(ErrorTranslator::default()),
        }
    }

    pub fn with_translator(mut self, translator: ErrorTranslator) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Attaches the calling thread to the host.
    ///
    /// `context` must describe the calling thread; a context captured on
    /// another thread is rejected.
    pub fn acquire(&self, context: &ThreadContext) -> Result<ConnectionHandle> {
        let current = thread::current().id();
        if context.thread != current {
            return Err(BridgeError::ThreadAffinityViolation(format!(
                "context captured on {} used to acquire on {:?}",
                context.describe(),
                current
            )));
        }
        if context.in_async_runtime {
            return Err(BridgeError::ThreadAffinityViolation(format!(
                "thread {} is driving an async runtime",
                context.describe()
            )));
        }
        if self.affinity == ThreadAffinity::WorkerOnly && !context.is_bridge_worker() {
            return Err(BridgeError::ThreadAffinityViolation(format!(
                "thread {} is not a bridge worker",
                context.describe()
            )));
        }
        if CONNECTION_HELD.with(Cell::get) {
            error!(thread = %context.describe(), "Second connection requested on one thread");
            return Err(BridgeError::ReentrantAcquisition);
        }

        let session = self
            .runtime
            .attach()
            .map_err(|err| self.translator.translate_host_error(err, None))?;

        CONNECTION_HELD.with(|held| held.set(true));
        debug!(host = self.runtime.name(), thread = %context.describe(), "Connection acquired");

        Ok(ConnectionHandle {
            session: Some(session),
            owner: current,
            host: self.runtime.name().to_string(),
            translator: Arc::clone(&self.translator),
            _thread_bound: PhantomData,
        })
    }

    /// Runs `f` with a connection for the calling thread and releases it
    /// afterwards, whatever `f` returns.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut ConnectionHandle) -> Result<T>,
    ) -> Result<T> {
        let mut handle = self.acquire(&ThreadContext::current())?;
        let result = f(&mut handle);
        handle.release();
        result
    }
}

impl fmt::Debug for HandleGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleGuard")
            .field("host", &self.runtime.name())
            .field("affinity", &self.affinity)
            .finish()
    }
}

/// Exclusive connection to the host for one call.
///
/// Neither `Clone` nor `Send`. Dropping it detaches the thread.
pub struct ConnectionHandle {
    session: Option<Box<dyn HostSession>>,
    owner: ThreadId,
    host: String,
    translator: Arc<ErrorTranslator>,
    _thread_bound: PhantomData<*const ()>,
}

impl ConnectionHandle {
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_released(&self) -> bool {
        self.session.is_none()
    }

    /// The host session, checked against the owning thread.
    pub fn session(&mut self) -> Result<&mut dyn HostSession> {
        let current = thread::current().id();
        if current != self.owner {
            error!(owner = ?self.owner, current = ?current, "Connection handle used off its thread");
            return Err(BridgeError::CrossThreadUse(format!(
                "handle owned by {:?} used on {:?}",
                self.owner, current
            )));
        }
        match self.session.as_mut() {
            Some(session) => Ok(&mut **session),
            None => Err(BridgeError::InvalidOperation(
                "connection already released".to_string(),
            )),
        }
    }

    /// Translates a failed session call, taking any pending host exception.
    pub(crate) fn fail(&mut self, err: HostError) -> BridgeError {
        let fault = match (&err, self.session.as_mut()) {
            (HostError::ExceptionPending, Some(session)) if thread::current().id() == self.owner => {
                session.take_fault()
            }
            _ => None,
        };
        self.translator.translate_host_error(err, fault)
    }

    /// Detaches from the host now instead of at drop.
    pub fn release(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.detach();
        CONNECTION_HELD.with(|held| held.set(false));
        debug!(host = %self.host, thread = ?self.owner, "Connection released");
    }

    #[cfg(test)]
    pub(crate) fn forge_owner(&mut self, owner: ThreadId) {
        self.owner = owner;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("host", &self.host)
            .field("owner", &self.owner)
            .field("released", &self.session.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{LedgerEvent, MemoryHost};
    use core_async::pool::AffinePool;
    use std::sync::mpsc;

    fn guard(host: &Arc<MemoryHost>, affinity: ThreadAffinity) -> HandleGuard {
        HandleGuard::new(Arc::clone(host) as Arc<dyn HostRuntime>, affinity)
    }

    #[test]
    fn test_worker_only_rejects_plain_thread() {
        let host = Arc::new(MemoryHost::builder().build());
        let err = guard(&host, ThreadAffinity::WorkerOnly)
            .acquire(&ThreadContext::current())
            .unwrap_err();
        assert!(matches!(err, BridgeError::ThreadAffinityViolation(_)));
        assert_eq!(host.stats().attaches, 0);
    }

    #[test]
    fn test_worker_thread_acquires() {
        let host = Arc::new(MemoryHost::builder().build());
        let guard = guard(&host, ThreadAffinity::WorkerOnly);
        let pool = AffinePool::builder().threads(1).build().unwrap();
        let (tx, rx) = mpsc::channel();
        pool.try_execute(move || {
            let result = guard.with_connection(|handle| {
                handle.session()?;
                Ok(handle.owner())
            });
            tx.send(result.map(|owner| owner == thread::current().id()))
                .unwrap();
        })
        .unwrap();

        assert_eq!(rx.recv().unwrap(), Ok(true));
        drop(pool);
        let stats = host.stats();
        assert_eq!(stats.attaches, 1);
        assert_eq!(stats.detaches, 1);
    }

    #[test]
    fn test_foreign_context_rejected() {
        let host = Arc::new(MemoryHost::builder().build());
        let foreign = thread::spawn(ThreadContext::current).join().unwrap();
        let err = guard(&host, ThreadAffinity::AnyBlocking)
            .acquire(&foreign)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ThreadAffinityViolation(_)));
    }

    #[test]
    fn test_async_thread_rejected() {
        let host = Arc::new(MemoryHost::builder().build());
        let guard = guard(&host, ThreadAffinity::AnyBlocking);
        let result = core_async::runtime::block_on(async move {
            guard.acquire(&ThreadContext::current()).map(|_| ())
        });
        assert!(matches!(result, Err(BridgeError::ThreadAffinityViolation(_))));
    }

    #[test]
    fn test_reentrant_acquisition_rejected() {
        let host = Arc::new(MemoryHost::builder().build());
        let guard = guard(&host, ThreadAffinity::AnyBlocking);
        let context = ThreadContext::current();

        let first = guard.acquire(&context).unwrap();
        assert_eq!(
            guard.acquire(&context).unwrap_err(),
            BridgeError::ReentrantAcquisition
        );
        drop(first);

        // Released handles free the slot for the thread.
        let second = guard.acquire(&context).unwrap();
        second.release();
        assert_eq!(host.stats().attaches, 2);
        assert_eq!(host.stats().detaches, 2);
    }

    #[test]
    fn test_released_exactly_once_on_failure() {
        let host = Arc::new(MemoryHost::builder().build());
        let guard = guard(&host, ThreadAffinity::AnyBlocking);

        let result: Result<()> = guard.with_connection(|_| {
            Err(BridgeError::InvalidOperation("boom".to_string()))
        });
        assert!(result.is_err());

        let detaches = host
            .events()
            .into_iter()
            .filter(|event| matches!(event, LedgerEvent::Detached { .. }))
            .count();
        assert_eq!(detaches, 1);
        assert_eq!(host.stats().live_sessions, 0);
    }

    #[test]
    fn test_cross_thread_use_detected() {
        let host = Arc::new(MemoryHost::builder().build());
        let guard = guard(&host, ThreadAffinity::AnyBlocking);
        let mut handle = guard.acquire(&ThreadContext::current()).unwrap();

        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        handle.forge_owner(other);
        assert!(matches!(
            handle.session(),
            Err(BridgeError::CrossThreadUse(_))
        ));
    }

    #[test]
    fn test_attach_refusal_is_affinity_violation() {
        let host = Arc::new(MemoryHost::builder().attachable_threads("bridge-worker").build());
        let err = guard(&host, ThreadAffinity::AnyBlocking)
            .acquire(&ThreadContext::current())
            .unwrap_err();
        assert!(matches!(err, BridgeError::ThreadAffinityViolation(_)));

        // The failed attach must not leave the thread marked as holding a handle.
        let host = Arc::new(MemoryHost::builder().build());
        let handle = guard(&host, ThreadAffinity::AnyBlocking)
            .acquire(&ThreadContext::current())
            .unwrap();
        handle.release();
    }
}
