//! Async entry point into the bridge.
//!
//! [`DispatchAdapter::submit`] is called from async code. It checks the
//! permission gate, then ships the call to a dedicated worker thread where
//! the connection, frame, builder and executor run start to finish without
//! suspending. The caller gets a [`PendingCall`] that resolves through a
//! oneshot channel once the worker is done.
//!
//! A call moves `Queued -> Running -> {Completed, Failed}`, or
//! `Queued -> Cancelled` when [`PendingCall::cancel`] wins the race against
//! the worker picking it up. Running calls cannot be cancelled.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::permission::{PermissionDecision, PermissionGate, PermissionRequest};
use core_async::pool::{AffinePool, PoolError};
use core_async::sync::oneshot;
use core_runtime::config::BridgeConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{BridgeError, Result};
use crate::executor::{Execution, OperationExecutor};
use crate::frame::{FrameLimits, ReferenceFrame};
use crate::guard::HandleGuard;
use crate::locator::ResourceLocator;
use crate::operation::{Filter, OperationBuilder, OperationDescriptor, OperationKind, SortSpec};
use crate::translate::ErrorTranslator;
use crate::value::ValueMap;

/// Request payload as it arrives from the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub kind: OperationKind,
    /// Absolute `content://` URI, or a path under the configured authority.
    pub locator: String,
    #[serde(default)]
    pub projection: Vec<String>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub values: Option<ValueMap>,
    #[serde(default)]
    pub rows: Option<Vec<ValueMap>>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default)]
    pub row_limit: Option<usize>,
}

impl ContentRequest {
    pub fn new(kind: OperationKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            projection: Vec::new(),
            filter: None,
            values: None,
            rows: None,
            sort: Vec::new(),
            row_limit: None,
        }
    }

    pub fn query(locator: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, locator)
    }

    pub fn insert(locator: impl Into<String>, values: ValueMap) -> Self {
        Self::new(OperationKind::Insert, locator).values(values)
    }

    pub fn update(locator: impl Into<String>, values: ValueMap) -> Self {
        Self::new(OperationKind::Update, locator).values(values)
    }

    pub fn delete(locator: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, locator)
    }

    pub fn bulk_insert(locator: impl Into<String>, rows: Vec<ValueMap>) -> Self {
        Self {
            rows: Some(rows),
            ..Self::new(OperationKind::BulkInsert, locator)
        }
    }

    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter<I, S>(mut self, template: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = Some(Filter {
            template: template.into(),
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn values(mut self, values: ValueMap) -> Self {
        self.values = Some(values);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn row_limit(mut self, rows: usize) -> Self {
        self.row_limit = Some(rows);
        self
    }

    /// Validates the request into a descriptor, resolving relative
    /// locators against `authority`.
    pub fn to_descriptor(&self, authority: &str) -> Result<OperationDescriptor> {
        let mut builder = OperationBuilder::new(self.kind);
        builder.for_resource(ResourceLocator::resolve(authority, &self.locator)?)?;
        if !self.projection.is_empty() {
            builder.with_projection(self.projection.iter().cloned())?;
        }
        if let Some(filter) = &self.filter {
            builder.with_filter(filter.template.clone(), filter.args.iter().cloned())?;
        }
        if let Some(values) = &self.values {
            builder.with_values(values.clone())?;
        }
        if let Some(rows) = &self.rows {
            builder.with_rows(rows.clone())?;
        }
        for term in &self.sort {
            builder.with_sort(term.clone())?;
        }
        if let Some(rows) = self.row_limit {
            builder.with_row_limit(rows)?;
        }
        builder.build()
    }
}

/// Success payload. Plain data only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentResponse {
    Inserted { id: i64, locator: String },
    Rows { rows: Vec<ValueMap> },
    Affected { count: usize },
    BulkInserted { count: usize },
}

/// Lifecycle of a submitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl CallState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CallState::Queued,
            1 => CallState::Running,
            2 => CallState::Completed,
            3 => CallState::Failed,
            _ => CallState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CallState::Queued | CallState::Running)
    }
}

#[derive(Debug)]
struct CallCell {
    state: AtomicU8,
}

impl CallCell {
    fn new(state: CallState) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(state as u8),
        })
    }

    fn get(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: CallState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: CallState, to: CallState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Marks a running call as failed if its job unwinds before finishing.
struct RunningCall {
    id: u64,
    cell: Arc<CallCell>,
}

impl Drop for RunningCall {
    fn drop(&mut self) {
        if self.cell.transition(CallState::Running, CallState::Failed) {
            error!(call = self.id, "Call aborted on its worker");
        }
    }
}

type CallResult = Result<ContentResponse>;

/// Handle to a submitted call.
pub struct PendingCall {
    id: u64,
    cell: Arc<CallCell>,
    outcome: Outcome,
    default_timeout: Option<Duration>,
}

enum Outcome {
    Ready(CallResult),
    Waiting(oneshot::Receiver<CallResult>),
}

impl PendingCall {
    fn failed(id: u64, err: BridgeError) -> Self {
        Self {
            id,
            cell: CallCell::new(CallState::Failed),
            outcome: Outcome::Ready(Err(err)),
            default_timeout: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.cell.get()
    }

    /// Cancels the call if no worker has started it. Returns whether the
    /// cancellation took effect.
    pub fn cancel(&self) -> bool {
        let cancelled = self.cell.transition(CallState::Queued, CallState::Cancelled);
        if cancelled {
            debug!(call = self.id, "Call cancelled while queued");
        } else {
            warn!(call = self.id, state = ?self.cell.get(), "Cancellation refused");
        }
        cancelled
    }

    /// Waits for the outcome, bounded by the configured call timeout.
    pub async fn wait(self) -> CallResult {
        match self.default_timeout {
            Some(limit) => self.wait_timeout(limit).await,
            None => self.resolve().await,
        }
    }

    /// Waits at most `limit`. On timeout the call keeps running on its
    /// worker; only the wait is abandoned.
    pub async fn wait_timeout(self, limit: Duration) -> CallResult {
        let id = self.id;
        match core_async::time::timeout(limit, self.resolve()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(call = id, ?limit, "Gave up waiting for call");
                Err(BridgeError::Timeout(limit))
            }
        }
    }

    async fn resolve(self) -> CallResult {
        match self.outcome {
            Outcome::Ready(result) => result,
            Outcome::Waiting(receiver) => match receiver.await {
                Ok(result) => result,
                Err(_) => match self.cell.get() {
                    CallState::Cancelled => Err(BridgeError::Cancelled),
                    CallState::Failed => Err(BridgeError::HostRuntimeFault {
                        detail: format!("call {} aborted on its worker", self.id),
                        fault: None,
                    }),
                    _ => Err(BridgeError::DispatchClosed),
                },
            },
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("state", &self.cell.get())
            .finish()
    }
}

/// Routes requests from async callers onto the bridge's worker threads.
pub struct DispatchAdapter {
    pool: AffinePool,
    guard: HandleGuard,
    gate: Arc<dyn PermissionGate>,
    translator: ErrorTranslator,
    executor: OperationExecutor,
    limits: FrameLimits,
    authority: String,
    permission: String,
    call_timeout: Option<Duration>,
    next_id: AtomicU64,
}

impl DispatchAdapter {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Self::with_translator(config, ErrorTranslator::default())
    }

    pub fn with_translator(config: &BridgeConfig, translator: ErrorTranslator) -> Result<Self> {
        let pool = AffinePool::builder()
            .threads(config.worker_threads)
            .queue_capacity(config.queue_capacity)
            .name("bridge-worker")
            .build()
            .map_err(|err| {
                BridgeError::resource_unavailable(format!("cannot start bridge workers: {err}"))
            })?;

        debug!(
            host = config.host_runtime.name(),
            workers = pool.size(),
            authority = %config.authority,
            "Dispatch adapter started"
        );
        Ok(Self {
            pool,
            guard: HandleGuard::new(config.host_runtime.clone(), config.thread_affinity)
                .with_translator(translator.clone()),
            gate: config.permission_gate.clone(),
            translator,
            executor: OperationExecutor::new().with_max_rows(config.max_rows),
            limits: FrameLimits::new(config.frame_capacity, config.flush_threshold),
            authority: config.authority.clone(),
            permission: config.permission.clone(),
            call_timeout: config.call_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Calls waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Validates, authorizes and queues `request`.
    ///
    /// Failures before the call is queued come back as an already failed
    /// [`PendingCall`]; a denied request never reaches the host.
    pub async fn submit(&self, request: ContentRequest) -> PendingCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = match request.to_descriptor(&self.authority) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                debug!(call = id, error = %err, "Request rejected before dispatch");
                return PendingCall::failed(id, err);
            }
        };

        if let Err(err) = self.authorize(&descriptor).await {
            warn!(call = id, kind = %descriptor.kind(), error = %err, "Request not authorized");
            return PendingCall::failed(id, err);
        }

        let cell = CallCell::new(CallState::Queued);
        let (sender, receiver) = oneshot::channel();
        let job = {
            let cell = Arc::clone(&cell);
            let guard = self.guard.clone();
            let executor = self.executor.clone();
            let limits = self.limits;
            move || {
                if !cell.transition(CallState::Queued, CallState::Running) {
                    let _ = sender.send(Err(BridgeError::Cancelled));
                    return;
                }
                let running = RunningCall { id, cell };
                let result = run_call(&guard, &executor, limits, &descriptor);
                let cell = &running.cell;
                cell.set(if result.is_ok() {
                    CallState::Completed
                } else {
                    CallState::Failed
                });
                if sender.send(result).is_err() {
                    debug!(call = id, "Caller stopped waiting before completion");
                }
            }
        };

        match self.pool.try_execute(job) {
            Ok(()) => {
                debug!(call = id, queued = self.pool.queued(), "Call queued");
                PendingCall {
                    id,
                    cell,
                    outcome: Outcome::Waiting(receiver),
                    default_timeout: self.call_timeout,
                }
            }
            Err(PoolError::QueueFull) => {
                warn!(call = id, "Dispatch queue full");
                PendingCall::failed(id, BridgeError::QueueFull)
            }
            Err(PoolError::Closed) => PendingCall::failed(id, BridgeError::DispatchClosed),
        }
    }

    /// Submits `request` and waits for its outcome.
    pub async fn call(&self, request: ContentRequest) -> Result<ContentResponse> {
        self.submit(request).await.wait().await
    }

    async fn authorize(&self, descriptor: &OperationDescriptor) -> Result<()> {
        let request = PermissionRequest {
            permission: self.permission.clone(),
            operation: descriptor.kind().to_string(),
            locator: descriptor.locator().to_string(),
        };
        match self.gate.check(&request).await {
            Ok(PermissionDecision::Granted) => Ok(()),
            Ok(PermissionDecision::Denied { reason }) => Err(BridgeError::permission_denied(
                format!("{} on {} denied: {reason}", request.operation, request.locator),
            )),
            Err(err) => Err(self.translator.translate_host_error(err, None)),
        }
    }
}

impl fmt::Debug for DispatchAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchAdapter")
            .field("pool", &self.pool)
            .field("guard", &self.guard)
            .field("authority", &self.authority)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Runs one call on the current thread: connection, frame, execution,
/// teardown.
fn run_call(
    guard: &HandleGuard,
    executor: &OperationExecutor,
    limits: FrameLimits,
    operation: &OperationDescriptor,
) -> CallResult {
    guard.with_connection(|handle| {
        let mut frame = ReferenceFrame::open(handle, limits)?;
        let outcome = executor
            .execute(&mut frame, operation)
            .and_then(into_response);
        let teardown = frame.close();
        let response = outcome?;
        teardown?;
        Ok(response)
    })
}

fn into_response(execution: Execution<'_, '_>) -> CallResult {
    Ok(match execution {
        Execution::Inserted(item) => ContentResponse::Inserted {
            id: item.id,
            locator: item.locator.to_string(),
        },
        Execution::Rows(rows) => ContentResponse::Rows {
            rows: rows.collect_rows()?,
        },
        Execution::Affected(affected) => ContentResponse::Affected {
            count: affected.count(),
        },
        Execution::BulkInserted(count) => ContentResponse::BulkInserted { count },
    })
}
