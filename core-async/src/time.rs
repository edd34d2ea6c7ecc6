//! Time-related utilities.
//!
//! Sleeping and deadlines for async callers. `timeout` is how dispatch
//! deadlines are layered on top of a pending bridge call: it bounds the wait,
//! it never interrupts the call itself.

pub use tokio::time::{interval, sleep, sleep_until, timeout, Interval, Sleep, Timeout};

pub use tokio::time::error::Elapsed;

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
