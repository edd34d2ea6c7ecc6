//! Runtime utilities that abstract over the underlying async executor.
//!
//! We wrap Tokio's runtime primitives so that downstream crates never need to
//! depend on Tokio directly.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion using a lightweight runtime.
///
/// Intended for entry points and tests. Panics if called from inside another
/// runtime, which is the same contract as Tokio's `block_on`.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Returns `true` when the calling thread is currently driving an async runtime.
///
/// Code that must not suspend (host calls, blocking channel receives) uses this
/// to refuse to run on executor threads.
pub fn in_async_context() -> bool {
    Handle::try_current().is_ok()
}
