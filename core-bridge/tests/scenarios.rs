//! End-to-end calls through the dispatch adapter against the in-memory host.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_desktop::{Fault, HostOp, LedgerEvent, MemoryHost};
use bridge_traits::error::Result as HostResult;
use bridge_traits::{HostRuntime, HostSession};
use core_bridge::{
    AffectedRows, BridgeError, CallState, ContentRequest, ContentResponse, DispatchAdapter,
    ErrorKind, SortSpec, Value, ValueMap,
};
use core_runtime::config::{BridgeConfig, DEFAULT_FRAME_CAPACITY};

const AUTHORITY: &str = "com.ichi2.anki.flashcards";

fn host() -> Arc<MemoryHost> {
    Arc::new(
        MemoryHost::builder()
            .provider(AUTHORITY)
            .collection(AUTHORITY, "notes", &["flds", "tags", "did"])
            .attachable_threads("bridge-worker")
            .build(),
    )
}

fn adapter_with(runtime: Arc<dyn HostRuntime>, workers: usize, queue: usize) -> DispatchAdapter {
    let config = BridgeConfig::builder()
        .host_runtime(runtime)
        .authority(AUTHORITY)
        .worker_threads(workers)
        .queue_capacity(queue)
        .build()
        .unwrap();
    DispatchAdapter::new(&config).unwrap()
}

fn note(fields: &str, tags: &str) -> ValueMap {
    ValueMap::new()
        .with("flds", fields)
        .with("tags", tags)
        .with("did", 1i64)
}

async fn insert(adapter: &DispatchAdapter, values: ValueMap) -> i64 {
    match adapter.call(ContentRequest::insert("notes", values)).await.unwrap() {
        ContentResponse::Inserted { id, .. } => id,
        other => panic!("unexpected response {other:?}"),
    }
}

/// Every reference released in a session was created in that session.
fn assert_sessions_isolated(host: &MemoryHost) {
    let mut created: HashMap<u64, HashSet<u64>> = HashMap::new();
    for event in host.events() {
        match event {
            LedgerEvent::Created { session, obj } => {
                created.entry(session).or_default().insert(obj.raw());
            }
            LedgerEvent::Deleted { session, obj } | LedgerEvent::FreedByPop { session, obj } => {
                let owned = created.get(&session).map(|refs| refs.contains(&obj.raw()));
                assert_eq!(owned, Some(true), "session {session} released {obj:?}");
            }
            LedgerEvent::Detached { leaked, .. } => assert_eq!(leaked, 0),
            LedgerEvent::Attached { .. } => {}
        }
    }
}

/// Host whose first attach blocks until released, pinning a worker.
struct GatedHost {
    inner: MemoryHost,
    started: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl GatedHost {
    fn new(inner: MemoryHost) -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let host = Arc::new(Self {
            inner,
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        (host, started_rx, release_tx)
    }
}

impl HostRuntime for GatedHost {
    fn attach(&self) -> HostResult<Box<dyn HostSession>> {
        let gate = self.release.lock().unwrap().take();
        if let Some(release) = gate {
            if let Some(started) = self.started.lock().unwrap().take() {
                let _ = started.send(());
            }
            let _ = release.recv();
        }
        self.inner.attach()
    }

    fn name(&self) -> &str {
        "gated"
    }
}

#[core_async::test]
async fn test_insert_note_returns_positive_id() {
    let host = host();
    let adapter = adapter_with(host.clone(), 2, 16);

    let id = insert(&adapter, note("Q\u{1f}A", "")).await;

    assert!(id > 0);
    assert_eq!(host.row_count(AUTHORITY, "notes"), 1);
    let stats = host.stats();
    assert_eq!(stats.refs_outstanding(), 0);
    assert_eq!(stats.attaches, stats.detaches);
    assert_sessions_isolated(&host);
}

#[core_async::test]
async fn test_tag_query_keys_follow_projection() {
    let host = host();
    let adapter = adapter_with(host.clone(), 2, 16);
    let first = insert(&adapter, note("Front\u{1f}Back", "important")).await;
    insert(&adapter, note("Other\u{1f}Side", "later")).await;
    let third = insert(&adapter, note("Last\u{1f}One", "important later")).await;

    let response = adapter
        .call(
            ContentRequest::query("notes")
                .projection(["tags", "_id", "flds"])
                .filter("tag:important", Vec::<String>::new()),
        )
        .await
        .unwrap();

    let ContentResponse::Rows { rows } = response else {
        panic!("expected rows, got {response:?}");
    };
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.keys().collect::<Vec<_>>(), ["tags", "_id", "flds"]);
    }
    let ids: Vec<i64> = rows
        .iter()
        .map(|row| row.get_i64("_id").unwrap().unwrap())
        .collect();
    assert_eq!(ids, [first, third]);
    assert_eq!(rows[0].get("flds"), Some(&Value::Text("Front\u{1f}Back".to_string())));

    let stats = host.stats();
    assert_eq!(stats.cursors_opened, stats.cursors_closed);
    assert_eq!(stats.refs_outstanding(), 0);
}

#[core_async::test]
async fn test_update_matching_nothing_reports_zero() {
    let host = host();
    let adapter = adapter_with(host.clone(), 2, 16);
    let id = insert(&adapter, note("Q\u{1f}A", "")).await;

    let response = adapter
        .call(
            ContentRequest::update(
                format!("notes/{id}/cards/0"),
                ValueMap::new().with("deck_id", 2i64),
            )
            .filter("ord = ?", ["5"]),
        )
        .await
        .unwrap();

    assert_eq!(response, ContentResponse::Affected { count: 0 });
    let err = AffectedRows(0).require_any("card 0").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[core_async::test]
async fn test_update_and_delete_by_item() {
    let host = host();
    let adapter = adapter_with(host.clone(), 2, 16);
    let id = insert(&adapter, note("Q\u{1f}A", "")).await;

    let updated = adapter
        .call(ContentRequest::update(
            format!("notes/{id}"),
            ValueMap::new().with("tags", "edited"),
        ))
        .await
        .unwrap();
    assert_eq!(updated, ContentResponse::Affected { count: 1 });

    let deleted = adapter
        .call(ContentRequest::delete(format!("notes/{id}")))
        .await
        .unwrap();
    assert_eq!(deleted, ContentResponse::Affected { count: 1 });
    assert_eq!(host.row_count(AUTHORITY, "notes"), 0);
}

#[core_async::test]
async fn test_bulk_insert_counts_rows() {
    let host = host();
    let adapter = adapter_with(host.clone(), 2, 16);
    let rows = (0..5).map(|i| note(&format!("Q{i}\u{1f}A{i}"), "bulk")).collect();

    let response = adapter
        .call(ContentRequest::bulk_insert("notes", rows))
        .await
        .unwrap();

    assert_eq!(response, ContentResponse::BulkInserted { count: 5 });
    assert_eq!(host.row_count(AUTHORITY, "notes"), 5);
    assert_eq!(host.stats().refs_outstanding(), 0);
}

#[core_async::test]
async fn test_bulk_insert_larger_than_frame_capacity() {
    let host = host();
    let adapter = adapter_with(host.clone(), 1, 4);
    let total = DEFAULT_FRAME_CAPACITY + 88;
    let rows = (0..total).map(|i| note(&format!("Q{i}\u{1f}A{i}"), "bulk")).collect();

    let response = adapter
        .call(ContentRequest::bulk_insert("notes", rows))
        .await
        .unwrap();

    assert_eq!(response, ContentResponse::BulkInserted { count: total });
    assert_eq!(host.row_count(AUTHORITY, "notes"), total);
    assert_eq!(host.stats().refs_outstanding(), 0);
    assert!(host.out_of_order_releases().is_empty());
}

#[core_async::test]
async fn test_each_call_releases_newest_first() {
    let host = host();
    let adapter = adapter_with(host.clone(), 1, 16);
    let id = insert(&adapter, note("Q\u{1f}A", "keep")).await;

    adapter
        .call(
            ContentRequest::query("notes")
                .projection(["_id", "flds"])
                .filter("tags = ?", ["keep"])
                .sort(SortSpec::descending("_id")),
        )
        .await
        .unwrap();
    adapter
        .call(ContentRequest::update(format!("notes/{id}"), ValueMap::new().with("tags", "moved")))
        .await
        .unwrap();
    adapter
        .call(ContentRequest::delete(format!("notes/{id}")))
        .await
        .unwrap();

    assert_eq!(host.out_of_order_releases(), Vec::new());
    let stats = host.stats();
    assert_eq!(stats.refs_outstanding(), 0);
    assert_eq!(stats.refs_created, stats.refs_deleted + stats.refs_freed_by_pop);
}

#[core_async::test]
async fn test_host_security_fault_releases_everything() {
    let host = host();
    let adapter = adapter_with(host.clone(), 2, 16);
    host.inject(
        HostOp::Query,
        Fault::throw(
            "java.lang.SecurityException",
            "Permission Denial: reading com.ichi2.anki.provider.CardContentProvider",
        ),
    );

    let err = adapter
        .call(ContentRequest::query("notes").projection(["_id", "flds"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(
        err.host_fault().map(|fault| fault.simple_name()),
        Some("SecurityException")
    );
    let stats = host.stats();
    assert_eq!(stats.refs_outstanding(), 0);
    assert_eq!(stats.cursors_opened, stats.cursors_closed);
    assert_eq!(stats.frames_pushed, stats.frames_popped);
    assert_eq!(stats.attaches, 1);
    assert_eq!(stats.detaches, 1);
    assert_sessions_isolated(&host);
}

#[core_async::test]
async fn test_unknown_authority_is_unavailable() {
    let host = host();
    let adapter = adapter_with(host.clone(), 1, 4);

    let err = adapter
        .call(ContentRequest::query("content://com.example.missing/notes"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    assert!(err.is_recoverable());
    assert_eq!(host.stats().live_sessions, 0);
}

#[core_async::test]
async fn test_failure_mid_iteration_detaches_once() {
    let host = host();
    let adapter = adapter_with(host.clone(), 1, 4);
    insert(&adapter, note("Q\u{1f}A", "")).await;
    host.inject_once(
        HostOp::CursorValue,
        Fault::throw("java.lang.IllegalStateException", "Couldn't read row 0"),
    );

    let err = adapter
        .call(ContentRequest::query("notes"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HostRuntimeFault);
    let stats = host.stats();
    assert_eq!(stats.attaches, 2);
    assert_eq!(stats.detaches, 2);
    assert_eq!(stats.cursors_opened, stats.cursors_closed);
    assert_eq!(stats.refs_outstanding(), 0);
}

#[core_async::test]
async fn test_concurrent_calls_use_isolated_sessions() {
    const CALLS: usize = 8;
    let host = host();
    let adapter = adapter_with(host.clone(), 4, 16);

    let mut pending = Vec::with_capacity(CALLS);
    for i in 0..CALLS {
        let values = note(&format!("Q{i}\u{1f}A{i}"), "");
        pending.push(adapter.submit(ContentRequest::insert("notes", values)).await);
    }
    let mut ids = HashSet::new();
    for call in pending {
        match call.wait().await.unwrap() {
            ContentResponse::Inserted { id, .. } => assert!(ids.insert(id)),
            other => panic!("unexpected response {other:?}"),
        }
    }

    assert_eq!(ids.len(), CALLS);
    let threads = host.session_threads();
    assert_eq!(threads.len(), CALLS);
    let distinct: HashSet<_> = threads.values().collect();
    assert!(distinct.len() <= adapter.workers());

    let stats = host.stats();
    assert_eq!(stats.attaches, CALLS);
    assert_eq!(stats.detaches, CALLS);
    assert_eq!(stats.refs_outstanding(), 0);
    assert_sessions_isolated(&host);
}

#[core_async::test]
async fn test_cancel_while_queued() {
    let (gated, started, release) = GatedHost::new((*host()).clone());
    let adapter = adapter_with(gated.clone(), 1, 4);

    let running = adapter
        .submit(ContentRequest::insert("notes", note("Q\u{1f}A", "")))
        .await;
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    let queued = adapter.submit(ContentRequest::query("notes")).await;

    assert_eq!(running.state(), CallState::Running);
    assert!(!running.cancel());
    assert_eq!(queued.state(), CallState::Queued);
    assert!(queued.cancel());
    assert_eq!(queued.state(), CallState::Cancelled);
    assert!(!queued.cancel());

    release.send(()).unwrap();
    assert!(matches!(
        running.wait().await,
        Ok(ContentResponse::Inserted { .. })
    ));
    assert!(matches!(queued.wait().await, Err(BridgeError::Cancelled)));
    assert_eq!(gated.inner.stats().attaches, 1);
}

#[core_async::test]
async fn test_wait_timeout_leaves_call_running() {
    let (gated, started, release) = GatedHost::new((*host()).clone());
    let adapter = adapter_with(gated.clone(), 1, 4);

    let call = adapter
        .submit(ContentRequest::insert("notes", note("Q\u{1f}A", "")))
        .await;
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let err = call.wait_timeout(Duration::from_millis(20)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    release.send(()).unwrap();
    for _ in 0..200 {
        if gated.inner.stats().detaches == 1 {
            break;
        }
        core_async::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gated.inner.row_count(AUTHORITY, "notes"), 1);
    assert_eq!(gated.inner.stats().refs_outstanding(), 0);
}

#[core_async::test]
async fn test_queue_full_rejects_without_running() {
    let (gated, started, release) = GatedHost::new((*host()).clone());
    let adapter = adapter_with(gated.clone(), 1, 1);

    let running = adapter.submit(ContentRequest::query("notes")).await;
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    let waiting = adapter.submit(ContentRequest::query("notes")).await;
    let rejected = adapter.submit(ContentRequest::query("notes")).await;

    assert_eq!(adapter.queued(), 1);
    assert_eq!(rejected.state(), CallState::Failed);
    assert!(matches!(rejected.wait().await, Err(BridgeError::QueueFull)));

    release.send(()).unwrap();
    assert!(running.wait().await.is_ok());
    assert!(waiting.wait().await.is_ok());
    assert_eq!(gated.inner.stats().attaches, 2);
}

/// Host whose first attach panics.
struct PanicOnceHost {
    inner: MemoryHost,
    armed: AtomicBool,
}

impl HostRuntime for PanicOnceHost {
    fn attach(&self) -> HostResult<Box<dyn HostSession>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("attach blew up");
        }
        self.inner.attach()
    }

    fn name(&self) -> &str {
        "panic-once"
    }
}

#[core_async::test]
async fn test_panicking_call_ends_failed() {
    let host = Arc::new(PanicOnceHost {
        inner: (*host()).clone(),
        armed: AtomicBool::new(true),
    });
    let adapter = adapter_with(host.clone(), 1, 4);

    let call = adapter
        .submit(ContentRequest::insert("notes", note("Q\u{1f}A", "")))
        .await;
    for _ in 0..200 {
        if call.state().is_terminal() {
            break;
        }
        core_async::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(call.state(), CallState::Failed);
    let err = call.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostRuntimeFault);

    // The worker survived and takes the next call.
    insert(&adapter, note("Q2\u{1f}A2", "")).await;
    assert_eq!(host.inner.row_count(AUTHORITY, "notes"), 1);
}
