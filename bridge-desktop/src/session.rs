//! Per-thread session of the in-process host.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

use bridge_traits::error::{HostError, Result};
use bridge_traits::host::{HostFault, HostRef, HostSession, HostType};
use tracing::trace;

use crate::host::{Fault, HostOp, LedgerEvent, Shared, BASE_FRAME_CAPACITY};
use crate::store::{Cell, Row, StoreError, UriParts};

const ILLEGAL_ARGUMENT: &str = "java.lang.IllegalArgumentException";
const ILLEGAL_STATE: &str = "java.lang.IllegalStateException";
const CLASS_CAST: &str = "java.lang.ClassCastException";
const CURSOR_BOUNDS: &str = "android.database.CursorIndexOutOfBoundsException";
const ARRAY_BOUNDS: &str = "java.lang.ArrayIndexOutOfBoundsException";

#[derive(Debug)]
struct Cursor {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    position: Option<usize>,
    closed: bool,
}

#[derive(Debug)]
enum Obj {
    Str(String),
    Long(i64),
    Int(i32),
    Double(f64),
    Bytes(Vec<u8>),
    StrArray(Vec<Option<String>>),
    Values(Row),
    ValuesArray(Vec<Option<Row>>),
    Uri(String),
    Cursor(Cursor),
}

impl Obj {
    fn host_type(&self) -> HostType {
        match self {
            Obj::Str(_) => HostType::String,
            Obj::Long(_) => HostType::Long,
            Obj::Int(_) => HostType::Integer,
            Obj::Double(_) => HostType::Double,
            Obj::Bytes(_) => HostType::ByteArray,
            Obj::StrArray(_) => HostType::Other("java.lang.String[]".to_string()),
            Obj::Values(_) => HostType::Other("android.content.ContentValues".to_string()),
            Obj::ValuesArray(_) => HostType::Other("android.content.ContentValues[]".to_string()),
            Obj::Uri(_) => HostType::Other("android.net.Uri".to_string()),
            Obj::Cursor(_) => HostType::Other("android.database.Cursor".to_string()),
        }
    }
}

#[derive(Debug)]
struct LocalFrame {
    capacity: usize,
    slots: Vec<u32>,
}

/// Session handed out by [`MemoryHost`](crate::MemoryHost).
///
/// Reference values embed the session id, so a reference used on a session
/// other than the one that produced it is reported as invalid.
pub struct MemorySession {
    id: u64,
    thread: ThreadId,
    shared: Arc<Shared>,
    frames: Vec<LocalFrame>,
    objects: HashMap<u32, Obj>,
    next_slot: u32,
    pending: Option<HostFault>,
    detached: bool,
}

impl MemorySession {
    pub(crate) fn new(id: u64, thread: ThreadId, shared: Arc<Shared>) -> Self {
        Self {
            id,
            thread,
            shared,
            frames: vec![LocalFrame {
                capacity: BASE_FRAME_CAPACITY,
                slots: Vec::new(),
            }],
            objects: HashMap::new(),
            next_slot: 1,
            pending: None,
            detached: false,
        }
    }

    fn encode(&self, slot: u32) -> HostRef {
        HostRef::from_raw((self.id << 32) | u64::from(slot))
    }

    fn slot_of(&self, obj: HostRef) -> Result<u32> {
        let raw = obj.raw();
        let slot = (raw & 0xFFFF_FFFF) as u32;
        if raw >> 32 != self.id || !self.objects.contains_key(&slot) {
            return Err(HostError::InvalidReference(raw));
        }
        Ok(slot)
    }

    fn record(&self, event: LedgerEvent) {
        self.shared.ledger.lock().record(event);
    }

    fn reserved(&self) -> usize {
        self.frames.iter().map(|frame| frame.capacity).sum()
    }

    fn ensure_clear(&self) -> Result<()> {
        match &self.pending {
            Some(fault) => Err(HostError::OperationFailed(format!(
                "host call issued with exception pending: {fault}"
            ))),
            None => Ok(()),
        }
    }

    fn throw(&mut self, class_name: &str, message: impl Into<String>) -> HostError {
        self.pending = Some(HostFault::new(class_name, Some(message.into())));
        HostError::ExceptionPending
    }

    fn raise(&mut self, err: StoreError) -> HostError {
        match err {
            StoreError::IllegalArgument(message) => self.throw(ILLEGAL_ARGUMENT, message),
        }
    }

    /// Applies an injected fault. `Ok(true)` means the call is declined.
    fn armed(&mut self, op: HostOp) -> Result<bool> {
        match self.shared.next_fault(op) {
            None => Ok(false),
            Some(Fault::Decline) => Ok(true),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Throw(fault)) => {
                self.pending = Some(fault);
                Err(HostError::ExceptionPending)
            }
        }
    }

    fn alloc(&mut self, obj: Obj) -> Result<HostRef> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| HostError::OperationFailed("no local frame".to_string()))?;
        if frame.slots.len() >= frame.capacity {
            return Err(HostError::TableExhausted {
                requested: 1,
                available: 0,
            });
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        frame.slots.push(slot);
        if matches!(obj, Obj::Cursor(_)) {
            self.shared.ledger.lock().stats.cursors_opened += 1;
        }
        self.objects.insert(slot, obj);

        let handle = self.encode(slot);
        trace!(session = self.id, obj = ?handle, "Local reference created");
        self.record(LedgerEvent::Created {
            session: self.id,
            obj: handle,
        });
        Ok(handle)
    }

    fn get(&self, obj: HostRef) -> Result<&Obj> {
        let slot = self.slot_of(obj)?;
        self.objects
            .get(&slot)
            .ok_or(HostError::InvalidReference(obj.raw()))
    }

    fn get_mut(&mut self, obj: HostRef) -> Result<&mut Obj> {
        let slot = self.slot_of(obj)?;
        self.objects
            .get_mut(&slot)
            .ok_or(HostError::InvalidReference(obj.raw()))
    }

    fn string_arg(&mut self, obj: HostRef) -> Result<Option<String>> {
        if obj.is_null() {
            return Ok(None);
        }
        match self.get(obj)? {
            Obj::Str(value) => Ok(Some(value.clone())),
            other => {
                let found = other.host_type();
                Err(self.throw(CLASS_CAST, format!("{found} cannot be cast to java.lang.String")))
            }
        }
    }

    fn string_array_arg(&mut self, obj: HostRef) -> Result<Option<Vec<Option<String>>>> {
        if obj.is_null() {
            return Ok(None);
        }
        match self.get(obj)? {
            Obj::StrArray(items) => Ok(Some(items.clone())),
            other => {
                let found = other.host_type();
                Err(self.throw(CLASS_CAST, format!("{found} cannot be cast to java.lang.String[]")))
            }
        }
    }

    fn bind_args(&mut self, obj: HostRef) -> Result<Vec<String>> {
        let items = self.string_array_arg(obj)?.unwrap_or_default();
        let mut args = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Some(arg) => args.push(arg),
                None => {
                    return Err(self.throw(
                        ILLEGAL_ARGUMENT,
                        format!("the bind value at index {} is null", index + 1),
                    ))
                }
            }
        }
        Ok(args)
    }

    fn uri_arg(&mut self, obj: HostRef) -> Result<String> {
        if obj.is_null() {
            return Err(self.throw("java.lang.NullPointerException", "uri"));
        }
        match self.get(obj)? {
            Obj::Uri(uri) => Ok(uri.clone()),
            other => {
                let found = other.host_type();
                Err(self.throw(CLASS_CAST, format!("{found} cannot be cast to android.net.Uri")))
            }
        }
    }

    fn values_arg(&mut self, obj: HostRef) -> Result<Row> {
        if obj.is_null() {
            return Ok(Row::new());
        }
        match self.get(obj)? {
            Obj::Values(row) => Ok(row.clone()),
            other => {
                let found = other.host_type();
                Err(self.throw(
                    CLASS_CAST,
                    format!("{found} cannot be cast to android.content.ContentValues"),
                ))
            }
        }
    }

    fn cursor_mut(&mut self, cursor: HostRef) -> Result<&mut Cursor> {
        match self.get_mut(cursor)? {
            Obj::Cursor(state) => Ok(state),
            _ => Err(HostError::InvalidReference(cursor.raw())),
        }
    }

    fn finish_detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        let leaked = self.objects.len();
        self.objects.clear();
        self.frames.clear();
        self.record(LedgerEvent::Detached {
            session: self.id,
            leaked,
        });
        trace!(session = self.id, leaked, "Thread detached");
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.finish_detach();
    }
}

impl HostSession for MemorySession {
    fn thread_id(&self) -> ThreadId {
        self.thread
    }

    fn push_frame(&mut self, capacity: usize) -> Result<()> {
        self.ensure_clear()?;
        let available = self.shared.table_capacity.saturating_sub(self.reserved());
        if capacity > available {
            return Err(HostError::TableExhausted {
                requested: capacity,
                available,
            });
        }
        self.frames.push(LocalFrame {
            capacity,
            slots: Vec::new(),
        });
        self.shared.ledger.lock().stats.frames_pushed += 1;
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<()> {
        if self.armed(HostOp::PopFrame)? {
            return Ok(());
        }
        if self.frames.len() <= 1 {
            return Err(HostError::OperationFailed("no local frame to pop".to_string()));
        }
        if let Some(frame) = self.frames.pop() {
            for slot in frame.slots.into_iter().rev() {
                self.objects.remove(&slot);
                self.record(LedgerEvent::FreedByPop {
                    session: self.id,
                    obj: self.encode(slot),
                });
            }
        }
        self.shared.ledger.lock().stats.frames_popped += 1;
        Ok(())
    }

    fn delete_ref(&mut self, obj: HostRef) -> Result<()> {
        if obj.is_null() {
            return Ok(());
        }
        if self.armed(HostOp::DeleteRef)? {
            return Ok(());
        }
        let slot = self.slot_of(obj)?;
        self.objects.remove(&slot);
        for frame in self.frames.iter_mut().rev() {
            if let Some(position) = frame.slots.iter().position(|s| *s == slot) {
                frame.slots.remove(position);
                break;
            }
        }
        self.record(LedgerEvent::Deleted {
            session: self.id,
            obj,
        });
        Ok(())
    }

    fn new_string(&mut self, value: &str) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::Str(value.to_string()))
    }

    fn new_long(&mut self, value: i64) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::Long(value))
    }

    fn new_integer(&mut self, value: i32) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::Int(value))
    }

    fn new_byte_array(&mut self, value: &[u8]) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::Bytes(value.to_vec()))
    }

    fn new_string_array(&mut self, len: usize) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::StrArray(vec![None; len]))
    }

    fn set_array_element(&mut self, array: HostRef, index: usize, item: HostRef) -> Result<()> {
        self.ensure_clear()?;
        let len = match self.get(array)? {
            Obj::StrArray(items) => items.len(),
            Obj::ValuesArray(rows) => rows.len(),
            other => {
                let found = other.host_type();
                return Err(self.throw(ILLEGAL_ARGUMENT, format!("{found} is not an object array")));
            }
        };
        if index >= len {
            return Err(self.throw(ARRAY_BOUNDS, format!("length={len}; index={index}")));
        }
        if matches!(self.get(array)?, Obj::StrArray(_)) {
            let value = self.string_arg(item)?;
            if let Obj::StrArray(items) = self.get_mut(array)? {
                items[index] = value;
            }
        } else {
            let row = if item.is_null() {
                None
            } else {
                Some(self.values_arg(item)?)
            };
            if let Obj::ValuesArray(rows) = self.get_mut(array)? {
                rows[index] = row;
            }
        }
        Ok(())
    }

    fn type_of(&mut self, obj: HostRef) -> Result<HostType> {
        self.ensure_clear()?;
        if obj.is_null() {
            return Ok(HostType::Null);
        }
        Ok(self.get(obj)?.host_type())
    }

    fn read_string(&mut self, obj: HostRef) -> Result<String> {
        self.ensure_clear()?;
        match self.string_arg(obj)? {
            Some(value) => Ok(value),
            None => Err(self.throw("java.lang.NullPointerException", "string")),
        }
    }

    fn read_long(&mut self, obj: HostRef) -> Result<i64> {
        self.ensure_clear()?;
        match self.get(obj)? {
            Obj::Long(value) => Ok(*value),
            other => {
                let found = other.host_type();
                Err(self.throw(CLASS_CAST, format!("{found} cannot be cast to java.lang.Long")))
            }
        }
    }

    fn read_integer(&mut self, obj: HostRef) -> Result<i32> {
        self.ensure_clear()?;
        match self.get(obj)? {
            Obj::Int(value) => Ok(*value),
            other => {
                let found = other.host_type();
                Err(self.throw(CLASS_CAST, format!("{found} cannot be cast to java.lang.Integer")))
            }
        }
    }

    fn read_byte_array(&mut self, obj: HostRef) -> Result<Vec<u8>> {
        self.ensure_clear()?;
        match self.get(obj)? {
            Obj::Bytes(value) => Ok(value.clone()),
            other => {
                let found = other.host_type();
                Err(self.throw(CLASS_CAST, format!("{found} cannot be cast to byte[]")))
            }
        }
    }

    fn new_content_values(&mut self) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::Values(Row::new()))
    }

    fn put_value(&mut self, values: HostRef, key: HostRef, value: HostRef) -> Result<()> {
        self.ensure_clear()?;
        let Some(key) = self.string_arg(key)? else {
            return Err(self.throw(ILLEGAL_ARGUMENT, "null key"));
        };
        let cell = if value.is_null() {
            Cell::Null
        } else {
            match self.get(value)? {
                Obj::Str(text) => Cell::Text(text.clone()),
                Obj::Long(number) => Cell::Integer(*number),
                Obj::Int(number) => Cell::Integer(i64::from(*number)),
                Obj::Double(number) => Cell::Real(*number),
                Obj::Bytes(bytes) => Cell::Blob(bytes.clone()),
                other => {
                    let found = other.host_type();
                    return Err(self.throw(ILLEGAL_ARGUMENT, format!("unsupported value type {found}")));
                }
            }
        };
        match self.get_mut(values)? {
            Obj::Values(row) => {
                row.insert(key, cell);
                Ok(())
            }
            _ => Err(HostError::InvalidReference(values.raw())),
        }
    }

    fn new_content_values_array(&mut self, len: usize) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::ValuesArray(vec![None; len]))
    }

    fn parse_uri(&mut self, uri: &str) -> Result<HostRef> {
        self.ensure_clear()?;
        self.alloc(Obj::Uri(uri.to_string()))
    }

    fn uri_last_segment(&mut self, uri: HostRef) -> Result<Option<String>> {
        self.ensure_clear()?;
        let uri = self.uri_arg(uri)?;
        Ok(UriParts::parse(&uri)
            .ok()
            .and_then(|parts| parts.last_segment().map(str::to_string)))
    }

    fn insert(&mut self, uri: HostRef, values: HostRef) -> Result<HostRef> {
        self.ensure_clear()?;
        let uri = self.uri_arg(uri)?;
        let row = self.values_arg(values)?;
        if self.armed(HostOp::Insert)? {
            return Ok(HostRef::NULL);
        }
        let inserted = self.shared.store.lock().insert(&uri, row);
        match inserted {
            Ok(item) => self.alloc(Obj::Uri(item)),
            Err(err) => Err(self.raise(err)),
        }
    }

    fn bulk_insert(&mut self, uri: HostRef, values: HostRef) -> Result<i32> {
        self.ensure_clear()?;
        let uri = self.uri_arg(uri)?;
        let rows = match self.get(values)? {
            Obj::ValuesArray(rows) => rows.clone(),
            _ => return Err(HostError::InvalidReference(values.raw())),
        };
        if self.armed(HostOp::BulkInsert)? {
            return Ok(0);
        }
        let mut inserted = 0;
        for (index, row) in rows.into_iter().enumerate() {
            let Some(row) = row else {
                return Err(self.throw(
                    "java.lang.NullPointerException",
                    format!("values[{index}] is null"),
                ));
            };
            let result = self.shared.store.lock().insert(&uri, row);
            match result {
                Ok(_) => inserted += 1,
                Err(err) => return Err(self.raise(err)),
            }
        }
        Ok(inserted)
    }

    fn query(
        &mut self,
        uri: HostRef,
        projection: HostRef,
        selection: HostRef,
        selection_args: HostRef,
        sort_order: HostRef,
    ) -> Result<HostRef> {
        self.ensure_clear()?;
        let uri = self.uri_arg(uri)?;
        let projection: Option<Vec<String>> = self
            .string_array_arg(projection)?
            .map(|columns| columns.into_iter().flatten().collect());
        let selection = self.string_arg(selection)?;
        let args = self.bind_args(selection_args)?;
        let sort_order = self.string_arg(sort_order)?;
        if self.armed(HostOp::Query)? {
            return Ok(HostRef::NULL);
        }

        let result = self.shared.store.lock().query(
            &uri,
            projection.as_deref(),
            selection.as_deref(),
            &args,
            sort_order.as_deref(),
        );
        match result {
            Ok(Some(result)) => self.alloc(Obj::Cursor(Cursor {
                columns: result.columns,
                rows: result.rows,
                position: None,
                closed: false,
            })),
            Ok(None) => Ok(HostRef::NULL),
            Err(err) => Err(self.raise(err)),
        }
    }

    fn update(
        &mut self,
        uri: HostRef,
        values: HostRef,
        selection: HostRef,
        selection_args: HostRef,
    ) -> Result<i32> {
        self.ensure_clear()?;
        let uri = self.uri_arg(uri)?;
        let row = self.values_arg(values)?;
        let selection = self.string_arg(selection)?;
        let args = self.bind_args(selection_args)?;
        if self.armed(HostOp::Update)? {
            return Ok(0);
        }
        let result = self
            .shared
            .store
            .lock()
            .update(&uri, row, selection.as_deref(), &args);
        result.map_err(|err| self.raise(err))
    }

    fn delete(&mut self, uri: HostRef, selection: HostRef, selection_args: HostRef) -> Result<i32> {
        self.ensure_clear()?;
        let uri = self.uri_arg(uri)?;
        let selection = self.string_arg(selection)?;
        let args = self.bind_args(selection_args)?;
        if self.armed(HostOp::Delete)? {
            return Ok(0);
        }
        let result = self
            .shared
            .store
            .lock()
            .delete(&uri, selection.as_deref(), &args);
        result.map_err(|err| self.raise(err))
    }

    fn cursor_columns(&mut self, cursor: HostRef) -> Result<Vec<String>> {
        self.ensure_clear()?;
        Ok(self.cursor_mut(cursor)?.columns.clone())
    }

    fn cursor_next(&mut self, cursor: HostRef) -> Result<bool> {
        self.ensure_clear()?;
        if self.armed(HostOp::CursorNext)? {
            return Ok(false);
        }
        let state = self.cursor_mut(cursor)?;
        if state.closed {
            return Err(self.throw(ILLEGAL_STATE, "attempt to re-open an already-closed object"));
        }
        let next = state.position.map_or(0, |position| position + 1);
        let row_count = state.rows.len();
        state.position = Some(next.min(row_count));
        Ok(next < row_count)
    }

    fn cursor_value(&mut self, cursor: HostRef, index: usize) -> Result<HostRef> {
        self.ensure_clear()?;
        if self.armed(HostOp::CursorValue)? {
            return Ok(HostRef::NULL);
        }
        let state = self.cursor_mut(cursor)?;
        let cell = match state.position {
            Some(position) if !state.closed => state
                .rows
                .get(position)
                .and_then(|row| row.get(index))
                .cloned(),
            _ => None,
        };
        let Some(cell) = cell else {
            return Err(self.throw(CURSOR_BOUNDS, format!("column {index} is not readable")));
        };
        match cell {
            Cell::Null => Ok(HostRef::NULL),
            Cell::Text(value) => self.alloc(Obj::Str(value)),
            Cell::Integer(value) => self.alloc(Obj::Long(value)),
            Cell::Real(value) => self.alloc(Obj::Double(value)),
            Cell::Blob(value) => self.alloc(Obj::Bytes(value)),
        }
    }

    fn cursor_close(&mut self, cursor: HostRef) -> Result<()> {
        if self.armed(HostOp::CursorClose)? {
            return Ok(());
        }
        let state = self.cursor_mut(cursor)?;
        if !state.closed {
            state.closed = true;
            self.shared.ledger.lock().stats.cursors_closed += 1;
        }
        Ok(())
    }

    fn take_fault(&mut self) -> Option<HostFault> {
        self.pending.take()
    }

    fn detach(mut self: Box<Self>) {
        self.finish_detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use bridge_traits::host::HostRuntime;

    fn host() -> MemoryHost {
        MemoryHost::builder()
            .provider("test.provider")
            .table_capacity(64)
            .build()
    }

    #[test]
    fn test_pop_frees_frame_refs() {
        let host = host();
        let mut session = host.attach().unwrap();
        session.push_frame(8).unwrap();
        session.new_string("a").unwrap();
        session.new_long(1).unwrap();
        session.pop_frame().unwrap();
        session.detach();

        let stats = host.stats();
        assert_eq!(stats.refs_created, 2);
        assert_eq!(stats.refs_freed_by_pop, 2);
        assert_eq!(stats.refs_outstanding(), 0);
        assert_eq!(stats.refs_leaked_at_detach, 0);
    }

    #[test]
    fn test_frame_capacity_enforced() {
        let host = host();
        let mut session = host.attach().unwrap();
        session.push_frame(1).unwrap();
        session.new_integer(1).unwrap();
        let err = session.new_integer(2).unwrap_err();
        assert!(matches!(err, HostError::TableExhausted { .. }));

        let err = session.push_frame(1_000).unwrap_err();
        assert!(matches!(err, HostError::TableExhausted { requested: 1_000, .. }));
        session.detach();
    }

    #[test]
    fn test_refs_are_session_scoped() {
        let host = host();
        let mut first = host.attach().unwrap();
        let mut second = host.attach().unwrap();
        let foreign = first.new_string("x").unwrap();
        assert!(matches!(second.read_string(foreign), Err(HostError::InvalidReference(_))));
        first.detach();
        second.detach();
        assert_eq!(host.stats().refs_leaked_at_detach, 1);
    }

    #[test]
    fn test_class_cast_leaves_exception_pending() {
        let host = host();
        let mut session = host.attach().unwrap();
        let long = session.new_long(5).unwrap();
        assert_eq!(session.read_string(long).unwrap_err(), HostError::ExceptionPending);
        assert!(session.new_string("blocked").is_err());

        let fault = session.take_fault().unwrap();
        assert_eq!(fault.class_name, CLASS_CAST);
        assert!(session.new_string("fine").is_ok());
        session.detach();
    }

    #[test]
    fn test_array_keeps_element_after_delete() {
        let host = host();
        let mut session = host.attach().unwrap();
        session.push_frame(8).unwrap();
        let uri = session.parse_uri("content://test.provider/notes").unwrap();
        let array = session.new_content_values_array(2).unwrap();
        let values = session.new_content_values().unwrap();
        let key = session.new_string("flds").unwrap();
        session.put_value(values, key, key).unwrap();
        session.delete_ref(key).unwrap();
        session.set_array_element(array, 0, values).unwrap();
        session.delete_ref(values).unwrap();

        assert_eq!(session.bulk_insert(uri, array).unwrap_err(), HostError::ExceptionPending);
        let fault = session.take_fault().unwrap();
        assert_eq!(fault.class_name, "java.lang.NullPointerException");
        assert_eq!(host.row_count("test.provider", "notes"), 0);

        assert_eq!(
            session.set_array_element(array, 2, HostRef::NULL).unwrap_err(),
            HostError::ExceptionPending
        );
        assert_eq!(session.take_fault().unwrap().class_name, ARRAY_BOUNDS);

        let values = session.new_content_values().unwrap();
        session.set_array_element(array, 1, values).unwrap();
        assert_eq!(session.bulk_insert(uri, array).unwrap(), 2);
        assert_eq!(host.row_count("test.provider", "notes"), 2);
        session.pop_frame().unwrap();
        session.detach();
    }

    #[test]
    fn test_query_cursor_walk() {
        let host = host();
        let mut row = Row::new();
        row.insert("flds".to_string(), Cell::Text("Q".to_string()));
        host.seed("content://test.provider/notes", row).unwrap();

        let mut session = host.attach().unwrap();
        session.push_frame(16).unwrap();
        let uri = session.parse_uri("content://test.provider/notes").unwrap();
        let cursor = session
            .query(uri, HostRef::NULL, HostRef::NULL, HostRef::NULL, HostRef::NULL)
            .unwrap();
        assert_eq!(session.cursor_columns(cursor).unwrap(), vec!["_id", "flds"]);
        assert!(session.cursor_next(cursor).unwrap());
        let value = session.cursor_value(cursor, 1).unwrap();
        assert_eq!(session.read_string(value).unwrap(), "Q");
        assert!(!session.cursor_next(cursor).unwrap());
        session.cursor_close(cursor).unwrap();
        session.pop_frame().unwrap();
        session.detach();

        let stats = host.stats();
        assert_eq!(stats.cursors_opened, stats.cursors_closed);
    }

    #[test]
    fn test_unknown_authority_query_is_null() {
        let host = host();
        let mut session = host.attach().unwrap();
        let uri = session.parse_uri("content://nobody.home/notes").unwrap();
        let cursor = session
            .query(uri, HostRef::NULL, HostRef::NULL, HostRef::NULL, HostRef::NULL)
            .unwrap();
        assert!(cursor.is_null());

        let values = session.new_content_values().unwrap();
        assert_eq!(session.insert(uri, values).unwrap_err(), HostError::ExceptionPending);
        let fault = session.take_fault().unwrap();
        assert!(fault.message.unwrap().starts_with("Unknown URL"));
        session.detach();
    }
}
