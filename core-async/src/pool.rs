//! Dedicated worker threads for synchronous, thread-affine work.
//!
//! Async executor threads may migrate a task between polls, so anything that
//! must stay on one OS thread for its whole duration (a host connection, for
//! example) is shipped to an [`AffinePool`] instead. Each job runs start to
//! finish on a single named worker thread and never suspends.
//!
//! ## Overview
//!
//! - Fixed number of workers, created up front
//! - Bounded job queue; a full queue is reported, not waited on
//! - [`is_worker_thread`] lets callee code verify where it runs
//! - Dropping the pool drains queued jobs and joins every worker

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

thread_local! {
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Returns `true` when the calling thread belongs to an [`AffinePool`].
pub fn is_worker_thread() -> bool {
    current_worker_index().is_some()
}

/// Index of the pool worker running the calling thread, if any.
pub fn current_worker_index() -> Option<usize> {
    WORKER_INDEX.with(|slot| slot.get())
}

/// Reasons a job could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The bounded queue is at capacity.
    QueueFull,
    /// The pool has been shut down.
    Closed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::QueueFull => write!(f, "worker queue is full"),
            PoolError::Closed => write!(f, "worker pool is shut down"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Builder for [`AffinePool`].
#[derive(Debug, Clone)]
pub struct AffinePoolBuilder {
    threads: usize,
    queue_capacity: usize,
    name: String,
}

impl Default for AffinePoolBuilder {
    fn default() -> Self {
        Self {
            threads: 2,
            queue_capacity: 256,
            name: "bridge-worker".to_string(),
        }
    }
}

impl AffinePoolBuilder {
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Thread name prefix; workers are named `{prefix}-{index}`.
    pub fn name(mut self, prefix: impl Into<String>) -> Self {
        self.name = prefix.into();
        self
    }

    /// Spawns the worker threads.
    ///
    /// Zero threads or zero capacity are clamped to one.
    pub fn build(self) -> std::io::Result<AffinePool> {
        let threads = self.threads.max(1);
        let (sender, receiver) = bounded(self.queue_capacity.max(1));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", self.name, index))
                .spawn(move || worker_loop(index, receiver))?;
            workers.push(handle);
        }

        debug!(threads, name = %self.name, "Affine pool started");
        Ok(AffinePool {
            sender,
            workers,
            name: self.name,
        })
    }
}

/// Fixed-size pool of named worker threads.
pub struct AffinePool {
    sender: Sender<Message>,
    workers: Vec<JoinHandle<()>>,
    name: String,
}

impl AffinePool {
    pub fn builder() -> AffinePoolBuilder {
        AffinePoolBuilder::default()
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Queues `job` without blocking.
    pub fn try_execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.workers.is_empty() {
            return Err(PoolError::Closed);
        }
        match self.sender.try_send(Message::Run(Box::new(job))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PoolError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::Closed),
        }
    }

    /// Stops accepting work, lets queued jobs finish and joins the workers.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in 0..self.workers.len() {
            // Blocking send: shutdown markers queue behind pending jobs.
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!(pool = %self.name, "Worker thread panicked during shutdown");
            }
        }
        debug!(pool = %self.name, "Affine pool stopped");
    }
}

impl fmt::Debug for AffinePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinePool")
            .field("name", &self.name)
            .field("threads", &self.workers.len())
            .field("queued", &self.sender.len())
            .finish()
    }
}

impl Drop for AffinePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, receiver: Receiver<Message>) {
    WORKER_INDEX.with(|slot| slot.set(Some(index)));
    trace!(index, "Worker started");

    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(job) => {
                // A panicking job must not take the worker down with it.
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(index, "Job panicked on worker thread");
                }
            }
            Message::Shutdown => break,
        }
    }

    trace!(index, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn caller_is_not_a_worker() {
        assert!(!is_worker_thread());
        assert_eq!(current_worker_index(), None);
    }

    #[test]
    fn jobs_run_on_named_workers() {
        let pool = AffinePool::builder().threads(2).name("test-worker").build().unwrap();
        let (tx, rx) = mpsc::channel();
        pool.try_execute(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send((is_worker_thread(), name)).unwrap();
        })
        .unwrap();

        let (is_worker, name) = rx.recv().unwrap();
        assert!(is_worker);
        assert!(name.unwrap().starts_with("test-worker-"));
    }

    #[test]
    fn full_queue_is_reported() {
        let pool = AffinePool::builder().threads(1).queue_capacity(1).build().unwrap();
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();

        pool.try_execute(move || {
            started_tx.send(()).unwrap();
            let _ = block_rx.recv();
        })
        .unwrap();
        started_rx.recv().unwrap();

        pool.try_execute(|| {}).unwrap();
        assert_eq!(pool.try_execute(|| {}), Err(PoolError::QueueFull));
        block_tx.send(()).unwrap();
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = AffinePool::builder().threads(1).queue_capacity(16).build().unwrap();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.try_execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(pool.try_execute(|| {}), Err(PoolError::Closed));
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let pool = AffinePool::builder().threads(1).build().unwrap();
        pool.try_execute(|| panic!("boom")).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.try_execute(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
    }
}
