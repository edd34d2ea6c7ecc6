//! Async abstraction layer for the content bridge.
//!
//! All core-* and bridge-* crates depend on this crate instead of depending on
//! tokio directly. Besides the usual task/time/sync re-exports it provides
//! [`pool::AffinePool`], a fixed set of named OS threads that bridge calls are
//! re-homed onto. Host connections are thread-affine, so work that touches the
//! host never runs on an async executor thread.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Time-related operations (sleep, duration, timeout)
//! - `sync`: Synchronization primitives (Mutex, RwLock, channels)
//! - `runtime`: Blocking entry points and runtime-context detection
//! - `pool`: Dedicated worker threads for synchronous, thread-affine work
//!
//! # Examples
//!
//! ```rust
//! use core_async::pool::AffinePool;
//! use core_async::sync::oneshot;
//!
//! async fn example() {
//!     let pool = AffinePool::builder().threads(2).build().unwrap();
//!     let (tx, rx) = oneshot::channel();
//!     pool.try_execute(move || {
//!         let _ = tx.send(core_async::pool::is_worker_thread());
//!     })
//!     .unwrap();
//!     assert!(rx.await.unwrap());
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod pool;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
