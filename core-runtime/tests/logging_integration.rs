//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::log::{LogEntry, LogLevel, LoggerSink};
use core_async::pool::AffinePool;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::sync::{mpsc, Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CollectingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

// Global subscriber: this is the only test in this binary that installs one.
#[test]
fn test_worker_events_reach_host_sink() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());
    init_logging(config).expect("first initialization succeeds");

    // A second initialization is refused.
    assert!(init_logging(LoggingConfig::default()).is_err());

    let pool = AffinePool::builder().threads(1).build().unwrap();
    let (tx, rx) = mpsc::channel();
    pool.try_execute(move || {
        tracing::debug!(target: "core_bridge::frame", released = 2, "Frame closed");
        tx.send(()).unwrap();
    })
    .unwrap();
    rx.recv().unwrap();

    let entries = sink.entries.lock().unwrap();
    let entry = entries
        .iter()
        .find(|entry| entry.message == "Frame closed")
        .expect("worker event forwarded");
    assert_eq!(entry.level, LogLevel::Debug);
    assert_eq!(entry.fields.get("released"), Some(&"2".to_string()));
}
