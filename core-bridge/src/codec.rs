//! Conversion between [`Value`]s and host objects.
//!
//! Encoding creates host objects inside a [`ReferenceFrame`], so every
//! reference the codec produces is tracked. Decoding inspects the host
//! object's runtime type first and reports a mismatch as
//! [`BridgeError::TypeMismatch`] without making the host raise.
//!
//! Booleans cross the boundary as integers 0 and 1.

use bridge_traits::host::{HostRef, HostType};

use crate::error::{BridgeError, Result};
use crate::frame::{ReferenceFrame, TrackedRef};
use crate::value::{Value, ValueKind, ValueMap};

/// Boxes `value` on the host. `Absent` encodes to no reference at all.
pub fn encode(frame: &mut ReferenceFrame<'_>, value: &Value) -> Result<Option<TrackedRef>> {
    let tracked = match value {
        Value::Absent => return Ok(None),
        Value::Text(text) => frame.acquire_local(|session| session.new_string(text))?,
        Value::Long(number) => frame.acquire_local(|session| session.new_long(*number))?,
        Value::Int(number) => frame.acquire_local(|session| session.new_integer(*number))?,
        Value::Bool(flag) => {
            frame.acquire_local(|session| session.new_integer(i32::from(*flag)))?
        }
        Value::Blob(bytes) => frame.acquire_local(|session| session.new_byte_array(bytes))?,
    };
    Ok(Some(tracked))
}

/// Reads `obj` as `expected`.
///
/// Null decodes to `Absent`. Integers convert between widths only when no
/// information is lost.
pub fn decode(frame: &mut ReferenceFrame<'_>, obj: HostRef, expected: ValueKind) -> Result<Value> {
    if obj.is_null() {
        return Ok(Value::Absent);
    }
    let found = frame.call(|session| session.type_of(obj))?;
    match (expected, &found) {
        (ValueKind::Text, HostType::String) => {
            frame.call(|session| session.read_string(obj)).map(Value::Text)
        }
        (ValueKind::Long, HostType::Long) => frame.call(|session| session.read_long(obj)).map(Value::Long),
        (ValueKind::Long, HostType::Integer) => frame
            .call(|session| session.read_integer(obj))
            .map(|number| Value::Long(i64::from(number))),
        (ValueKind::Int, HostType::Integer) => {
            frame.call(|session| session.read_integer(obj)).map(Value::Int)
        }
        (ValueKind::Int, HostType::Long) => {
            let number = frame.call(|session| session.read_long(obj))?;
            i32::try_from(number)
                .map(Value::Int)
                .map_err(|_| BridgeError::type_mismatch(expected, format!("long {number}")))
        }
        (ValueKind::Bool, HostType::Integer) => {
            let number = frame.call(|session| session.read_integer(obj))?;
            decode_flag(i64::from(number))
        }
        (ValueKind::Bool, HostType::Long) => {
            let number = frame.call(|session| session.read_long(obj))?;
            decode_flag(number)
        }
        (ValueKind::Blob, HostType::ByteArray) => frame
            .call(|session| session.read_byte_array(obj))
            .map(Value::Blob),
        _ => Err(BridgeError::type_mismatch(expected, &found)),
    }
}

/// Reads `obj` as whatever kind its host type maps to.
///
/// Used for cursor cells, whose kind is not known up front.
pub fn decode_natural(frame: &mut ReferenceFrame<'_>, obj: HostRef) -> Result<Value> {
    if obj.is_null() {
        return Ok(Value::Absent);
    }
    let found = frame.call(|session| session.type_of(obj))?;
    let kind = match found {
        HostType::Null => return Ok(Value::Absent),
        HostType::String => ValueKind::Text,
        HostType::Long => ValueKind::Long,
        HostType::Integer => ValueKind::Int,
        HostType::ByteArray => ValueKind::Blob,
        other => return Err(BridgeError::type_mismatch("text, long, int or blob", other)),
    };
    decode(frame, obj, kind)
}

fn decode_flag(number: i64) -> Result<Value> {
    match number {
        0 => Ok(Value::Bool(false)),
        1 => Ok(Value::Bool(true)),
        other => Err(BridgeError::type_mismatch(ValueKind::Bool, format!("integer {other}"))),
    }
}

/// Builds a host key/value container from `values`.
///
/// Keys and boxed values are released as soon as they are stored; only the
/// container stays tracked.
pub fn encode_map(frame: &mut ReferenceFrame<'_>, values: &ValueMap) -> Result<TrackedRef> {
    let container = frame.acquire_local(|session| session.new_content_values())?;
    let target = container.raw();
    for (field, value) in values.iter() {
        let key = frame.acquire_local(|session| session.new_string(field))?;
        let boxed = encode(frame, value)?;
        let raw = boxed.map_or(HostRef::NULL, |tracked| tracked.raw());
        frame.call(|session| session.put_value(target, key.raw(), raw))?;
        if let Some(boxed) = boxed {
            frame.release(boxed)?;
        }
        frame.release(key)?;
    }
    Ok(container)
}

/// Builds a host string array. An empty slice encodes to no reference.
///
/// Each element is stored and released before the next one is created, so
/// the frame holds at most two references however long `items` is.
pub fn encode_strings(frame: &mut ReferenceFrame<'_>, items: &[String]) -> Result<Option<TrackedRef>> {
    if items.is_empty() {
        return Ok(None);
    }
    let array = frame.acquire_local(|session| session.new_string_array(items.len()))?;
    for (index, item) in items.iter().enumerate() {
        let element = frame.acquire_local(|session| session.new_string(item))?;
        frame.call(|session| session.set_array_element(array.raw(), index, element.raw()))?;
        frame.release(element)?;
    }
    Ok(Some(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameLimits;
    use crate::guard::{HandleGuard, ThreadContext};
    use bridge_desktop::MemoryHost;
    use core_runtime::config::ThreadAffinity;
    use std::sync::Arc;

    fn with_frame(test: impl FnOnce(&mut ReferenceFrame<'_>)) -> Arc<MemoryHost> {
        let host = Arc::new(MemoryHost::builder().build());
        let guard = HandleGuard::new(host.clone(), ThreadAffinity::AnyBlocking);
        let mut handle = guard.acquire(&ThreadContext::current()).unwrap();
        let mut frame = ReferenceFrame::open(&mut handle, FrameLimits::with_capacity(64)).unwrap();
        test(&mut frame);
        frame.close().unwrap();
        drop(handle);
        host
    }

    fn round_trip(frame: &mut ReferenceFrame<'_>, value: Value) -> Value {
        let kind = value.kind();
        let encoded = encode(frame, &value).unwrap();
        let raw = encoded.map_or(HostRef::NULL, |tracked| tracked.raw());
        match kind {
            Some(kind) => decode(frame, raw, kind).unwrap(),
            None => decode_natural(frame, raw).unwrap(),
        }
    }

    #[test]
    fn test_round_trip_each_kind() {
        with_frame(|frame| {
            let values = [
                Value::Text("Q\u{1f}A".to_string()),
                Value::Text(String::new()),
                Value::Long(i64::MIN),
                Value::Int(-7),
                Value::Bool(true),
                Value::Bool(false),
                Value::Blob(vec![0, 159, 255]),
                Value::Absent,
            ];
            for value in values {
                assert_eq!(round_trip(frame, value.clone()), value);
            }
        });
    }

    #[test]
    fn test_mismatch_is_typed() {
        let host = with_frame(|frame| {
            let text = encode(frame, &Value::from("12")).unwrap().unwrap();
            let err = decode(frame, text.raw(), ValueKind::Long).unwrap_err();
            assert_eq!(
                err,
                BridgeError::TypeMismatch {
                    expected: "long".to_string(),
                    found: "java.lang.String".to_string()
                }
            );

            let flag = encode(frame, &Value::Int(2)).unwrap().unwrap();
            assert!(matches!(
                decode(frame, flag.raw(), ValueKind::Bool),
                Err(BridgeError::TypeMismatch { .. })
            ));

            let big = encode(frame, &Value::Long(i64::from(i32::MAX) + 1)).unwrap().unwrap();
            assert!(matches!(
                decode(frame, big.raw(), ValueKind::Int),
                Err(BridgeError::TypeMismatch { .. })
            ));

            // The session is still usable: nothing was left pending.
            let blob = encode(frame, &Value::Blob(vec![1])).unwrap().unwrap();
            assert_eq!(
                decode(frame, blob.raw(), ValueKind::Blob).unwrap(),
                Value::Blob(vec![1])
            );
        });
        assert_eq!(host.stats().refs_outstanding(), 0);
    }

    #[test]
    fn test_absent_is_not_empty_or_zero() {
        with_frame(|frame| {
            assert!(encode(frame, &Value::Absent).unwrap().is_none());
            assert_eq!(
                decode(frame, HostRef::NULL, ValueKind::Text).unwrap(),
                Value::Absent
            );
            let empty = encode(frame, &Value::from("")).unwrap().unwrap();
            assert_eq!(
                decode(frame, empty.raw(), ValueKind::Text).unwrap(),
                Value::Text(String::new())
            );
        });
    }

    #[test]
    fn test_encode_map_keeps_only_container() {
        with_frame(|frame| {
            let values = ValueMap::new()
                .with("flds", "Q\u{1f}A")
                .with("tags", "")
                .with("did", 1i64)
                .with("mod", Value::Absent);
            encode_map(frame, &values).unwrap();
            assert_eq!(frame.held(), 1);
            assert_eq!(frame.stats().tracked, 1 + 2 * 3 + 1);
        });
    }

    #[test]
    fn test_encode_strings() {
        with_frame(|frame| {
            assert!(encode_strings(frame, &[]).unwrap().is_none());
            let array = encode_strings(frame, &["_id".to_string(), "flds".to_string()])
                .unwrap()
                .unwrap();
            assert_eq!(frame.held(), 1);
            assert_eq!(frame.get(array).unwrap(), array.raw());
        });
    }
}
