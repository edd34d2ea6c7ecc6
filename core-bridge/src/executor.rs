//! Runs operation descriptors against the host.
//!
//! Every host object the executor creates is tracked in the caller's
//! [`ReferenceFrame`] and released newest first: a reference is only
//! released once everything acquired after it is gone. Query arguments
//! therefore live until the cursor closes. Host failures come back already
//! translated, since all host access goes through the frame.

use bridge_traits::host::HostRef;
use core_runtime::logging::redact_if_sensitive;
use tracing::{debug, trace, warn};

use crate::codec;
use crate::error::{BridgeError, Result};
use crate::frame::{ReferenceFrame, RefKind, TrackedRef};
use crate::locator::ResourceLocator;
use crate::operation::{OperationDescriptor, OperationKind};
use crate::value::{Value, ValueMap};

/// Outcome of [`OperationExecutor::execute`].
#[derive(Debug)]
pub enum Execution<'a, 'h> {
    Inserted(InsertedItem),
    Rows(ResultSet<'a, 'h>),
    Affected(AffectedRows),
    BulkInserted(usize),
}

/// A row created by an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedItem {
    pub id: i64,
    pub locator: ResourceLocator,
}

/// Rows touched by an update or delete. Zero is a valid outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffectedRows(pub usize);

impl AffectedRows {
    pub fn count(self) -> usize {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Treats zero affected rows as [`BridgeError::NotFound`].
    pub fn require_any(self, what: impl std::fmt::Display) -> Result<usize> {
        if self.0 == 0 {
            return Err(BridgeError::NotFound(format!("nothing matched {what}")));
        }
        Ok(self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationExecutor {
    max_rows: Option<usize>,
}

impl OperationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops every result set after `max_rows` rows.
    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn execute<'a, 'h>(
        &self,
        frame: &'a mut ReferenceFrame<'h>,
        operation: &OperationDescriptor,
    ) -> Result<Execution<'a, 'h>> {
        debug!(
            kind = %operation.kind(),
            locator = %operation.locator(),
            fields = ?operation.values().keys().collect::<Vec<_>>(),
            "Executing content operation"
        );
        match operation.kind() {
            OperationKind::Insert => self.insert(frame, operation).map(Execution::Inserted),
            OperationKind::Query => self.query(frame, operation).map(Execution::Rows),
            OperationKind::Update => self.update(frame, operation).map(Execution::Affected),
            OperationKind::Delete => self.delete(frame, operation).map(Execution::Affected),
            OperationKind::BulkInsert => self
                .bulk_insert(frame, operation)
                .map(Execution::BulkInserted),
        }
    }

    pub fn insert(
        &self,
        frame: &mut ReferenceFrame<'_>,
        operation: &OperationDescriptor,
    ) -> Result<InsertedItem> {
        expect_kind(operation, OperationKind::Insert)?;
        let uri = parse_uri(frame, operation.locator())?;
        let values = codec::encode_map(frame, operation.values())?;
        let item = frame.acquire(RefKind::Local, |session| {
            session.insert(uri.raw(), values.raw())
        })?;

        let Some(item) = item else {
            release_newest_first(frame, [values, uri])?;
            return Err(BridgeError::InsertRejected(format!(
                "provider declined insert into {}",
                operation.locator()
            )));
        };
        let segment = frame.call(|session| session.uri_last_segment(item.raw()))?;
        release_newest_first(frame, [item, values, uri])?;

        let id = segment
            .as_deref()
            .and_then(|segment| segment.parse::<i64>().ok())
            .ok_or_else(|| {
                BridgeError::IdentifierUnparseable(format!(
                    "inserted item under {} has trailing segment {:?}",
                    operation.locator(),
                    segment
                ))
            })?;
        debug!(id, locator = %operation.locator(), "Item inserted");
        Ok(InsertedItem {
            id,
            locator: operation.locator().item(id),
        })
    }

    pub fn query<'a, 'h>(
        &self,
        frame: &'a mut ReferenceFrame<'h>,
        operation: &OperationDescriptor,
    ) -> Result<ResultSet<'a, 'h>> {
        expect_kind(operation, OperationKind::Query)?;
        let uri = parse_uri(frame, operation.locator())?;
        let projection = codec::encode_strings(frame, operation.projection())?;
        let (selection, args) = encode_filter(frame, operation)?;
        let sort = match operation.sort_clause() {
            Some(clause) => Some(frame.acquire_local(|session| session.new_string(&clause))?),
            None => None,
        };

        let cursor = frame.acquire(RefKind::Cursor, |session| {
            session.query(
                uri.raw(),
                raw_or_null(projection),
                raw_or_null(selection),
                raw_or_null(args),
                raw_or_null(sort),
            )
        })?;
        let arguments: Vec<TrackedRef> = [Some(uri), projection, selection, args, sort]
            .into_iter()
            .flatten()
            .collect();

        let Some(cursor) = cursor else {
            release_newest_first(frame, arguments.into_iter().rev())?;
            return Err(BridgeError::resource_unavailable(format!(
                "no provider answered for {}",
                operation.locator()
            )));
        };

        let available = frame.call(|session| session.cursor_columns(cursor.raw()))?;
        let columns = if operation.projection().is_empty() {
            available.into_iter().enumerate().map(|(index, name)| (name, index)).collect()
        } else {
            let mut columns = Vec::with_capacity(operation.projection().len());
            for name in operation.projection() {
                let index = available.iter().position(|column| column == name).ok_or_else(|| {
                    BridgeError::Malformed {
                        detail: format!("column '{name}' missing from result"),
                        fault: None,
                    }
                })?;
                columns.push((name.clone(), index));
            }
            columns
        };

        Ok(ResultSet {
            frame,
            cursor: Some(cursor),
            arguments,
            columns,
            max_rows: match (self.max_rows, operation.row_limit()) {
                (Some(configured), Some(requested)) => Some(configured.min(requested)),
                (configured, requested) => configured.or(requested),
            },
            rows_read: 0,
            truncated: false,
        })
    }

    pub fn update(
        &self,
        frame: &mut ReferenceFrame<'_>,
        operation: &OperationDescriptor,
    ) -> Result<AffectedRows> {
        expect_kind(operation, OperationKind::Update)?;
        let uri = parse_uri(frame, operation.locator())?;
        let values = codec::encode_map(frame, operation.values())?;
        let (selection, args) = encode_filter(frame, operation)?;

        let count = frame.call(|session| {
            session.update(
                uri.raw(),
                values.raw(),
                raw_or_null(selection),
                raw_or_null(args),
            )
        })?;
        let held = [args, selection, Some(values), Some(uri)];
        release_newest_first(frame, held.into_iter().flatten())?;
        affected(count)
    }

    pub fn delete(
        &self,
        frame: &mut ReferenceFrame<'_>,
        operation: &OperationDescriptor,
    ) -> Result<AffectedRows> {
        expect_kind(operation, OperationKind::Delete)?;
        let uri = parse_uri(frame, operation.locator())?;
        let (selection, args) = encode_filter(frame, operation)?;

        let count = frame.call(|session| {
            session.delete(uri.raw(), raw_or_null(selection), raw_or_null(args))
        })?;
        release_newest_first(frame, [args, selection, Some(uri)].into_iter().flatten())?;
        affected(count)
    }

    pub fn bulk_insert(
        &self,
        frame: &mut ReferenceFrame<'_>,
        operation: &OperationDescriptor,
    ) -> Result<usize> {
        expect_kind(operation, OperationKind::BulkInsert)?;
        let uri = parse_uri(frame, operation.locator())?;
        let rows = operation.rows();
        let array = frame.acquire_local(|session| session.new_content_values_array(rows.len()))?;
        for (index, row) in rows.iter().enumerate() {
            let container = codec::encode_map(frame, row)?;
            frame.call(|session| session.set_array_element(array.raw(), index, container.raw()))?;
            frame.release(container)?;
        }
        trace!(rows = rows.len(), peak = frame.stats().peak_held, "Bulk rows encoded");

        let count = frame.call(|session| session.bulk_insert(uri.raw(), array.raw()))?;
        release_newest_first(frame, [array, uri])?;
        usize::try_from(count).map_err(|_| BridgeError::HostRuntimeFault {
            detail: format!("bulk insert reported {count} rows"),
            fault: None,
        })
    }
}

/// Forward-only rows of a query, bound to the frame that ran it.
///
/// Each row is read inside its own subframe, so a long result set never
/// accumulates references. The cursor is closed when the rows run out, when
/// the row limit is reached, on [`finish`](Self::finish), or on drop.
pub struct ResultSet<'a, 'h> {
    frame: &'a mut ReferenceFrame<'h>,
    cursor: Option<TrackedRef>,
    /// Query arguments in acquisition order, released after the cursor.
    arguments: Vec<TrackedRef>,
    columns: Vec<(String, usize)>,
    max_rows: Option<usize>,
    rows_read: usize,
    truncated: bool,
}

impl ResultSet<'_, '_> {
    /// Row keys, in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Whether iteration stopped at the row limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn next_row(&mut self) -> Result<Option<ValueMap>> {
        let Some(cursor) = self.cursor else {
            return Ok(None);
        };
        if self.max_rows.is_some_and(|limit| self.rows_read >= limit) {
            self.truncated = true;
            debug!(rows = self.rows_read, "Row limit reached");
            self.close_cursor()?;
            return Ok(None);
        }

        let advanced = match self.frame.call(|session| session.cursor_next(cursor.raw())) {
            Ok(advanced) => advanced,
            Err(err) => {
                self.abandon();
                return Err(err);
            }
        };
        if !advanced {
            self.close_cursor()?;
            return Ok(None);
        }

        match read_row(self.frame, cursor, &self.columns) {
            Ok(row) => {
                self.rows_read += 1;
                Ok(Some(row))
            }
            Err(err) => {
                self.abandon();
                Err(err)
            }
        }
    }

    /// Drains every remaining row.
    pub fn collect_rows(mut self) -> Result<Vec<ValueMap>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Stops early and closes the cursor. Returns the rows read so far.
    pub fn finish(mut self) -> Result<usize> {
        self.close_cursor()?;
        Ok(self.rows_read)
    }

    fn close_cursor(&mut self) -> Result<()> {
        let closed = match self.cursor.take() {
            Some(cursor) => self.frame.release(cursor),
            None => Ok(()),
        };
        let arguments = std::mem::take(&mut self.arguments);
        let released = release_newest_first(self.frame, arguments.into_iter().rev());
        closed.and(released)
    }

    fn abandon(&mut self) {
        if let Err(err) = self.close_cursor() {
            warn!(error = %err, "Cursor release failed after a read error");
        }
    }
}

fn read_row(
    frame: &mut ReferenceFrame<'_>,
    cursor: TrackedRef,
    columns: &[(String, usize)],
) -> Result<ValueMap> {
    let mut row_frame = frame.subframe(columns.len() + 1)?;
    let mut row = ValueMap::with_capacity(columns.len());
    for (name, index) in columns {
        let cell = row_frame.acquire(RefKind::Local, |session| {
            session.cursor_value(cursor.raw(), *index)
        })?;
        let value = match cell {
            Some(cell) => {
                let value = codec::decode_natural(&mut row_frame, cell.raw())?;
                row_frame.release(cell)?;
                value
            }
            None => Value::Absent,
        };
        row.insert(name.clone(), value);
    }
    row_frame.close()?;
    Ok(row)
}

impl Iterator for ResultSet<'_, '_> {
    type Item = Result<ValueMap>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for ResultSet<'_, '_> {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for ResultSet<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns)
            .field("open", &self.cursor.is_some())
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

fn expect_kind(operation: &OperationDescriptor, kind: OperationKind) -> Result<()> {
    if operation.kind() != kind {
        return Err(BridgeError::InvalidOperation(format!(
            "{} descriptor passed to {kind}",
            operation.kind()
        )));
    }
    Ok(())
}

fn parse_uri(frame: &mut ReferenceFrame<'_>, locator: &ResourceLocator) -> Result<TrackedRef> {
    let uri = locator.to_string();
    frame.acquire_local(|session| session.parse_uri(&uri))
}

fn encode_filter(
    frame: &mut ReferenceFrame<'_>,
    operation: &OperationDescriptor,
) -> Result<(Option<TrackedRef>, Option<TrackedRef>)> {
    let Some(filter) = operation.filter() else {
        return Ok((None, None));
    };
    trace!(
        selection = %filter.template,
        args = %redact_if_sensitive("selection_args", &filter.args.join(", ")),
        "Encoding filter"
    );
    let selection = frame.acquire_local(|session| session.new_string(&filter.template))?;
    let args = codec::encode_strings(frame, &filter.args)?;
    Ok((Some(selection), args))
}

/// Releases `refs`, which must be ordered newest first. Keeps going past a
/// failed release and returns the first failure.
fn release_newest_first(
    frame: &mut ReferenceFrame<'_>,
    refs: impl IntoIterator<Item = TrackedRef>,
) -> Result<()> {
    let mut first_fault = None;
    for tracked in refs {
        if let Err(err) = frame.release(tracked) {
            first_fault.get_or_insert(err);
        }
    }
    first_fault.map_or(Ok(()), Err)
}

fn raw_or_null(tracked: Option<TrackedRef>) -> HostRef {
    tracked.map_or(HostRef::NULL, |tracked| tracked.raw())
}

fn affected(count: i32) -> Result<AffectedRows> {
    usize::try_from(count)
        .map(AffectedRows)
        .map_err(|_| BridgeError::HostRuntimeFault {
            detail: format!("host reported {count} affected rows"),
            fault: None,
        })
}
