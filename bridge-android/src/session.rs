//! Per-thread JNI session against the app's `ContentResolver`.

use std::thread::ThreadId;

use bridge_traits::error::{HostError, Result};
use bridge_traits::host::{HostFault, HostRef, HostSession, HostType};
use jni::objects::{GlobalRef, JByteArray, JObject, JObjectArray, JValue};
use jni::sys::jbyteArray;
use jni::{AttachGuard, JNIEnv};
use tracing::debug;

use crate::env::{from_ref, jni_error, read_java_string, take_exception, to_ref};

const CURSOR_FIELD_TYPE_NULL: i32 = 0;
const CURSOR_FIELD_TYPE_INTEGER: i32 = 1;
const CURSOR_FIELD_TYPE_FLOAT: i32 = 2;
const CURSOR_FIELD_TYPE_STRING: i32 = 3;
const CURSOR_FIELD_TYPE_BLOB: i32 = 4;

const QUERY_SIG: &str = "(Landroid/net/Uri;[Ljava/lang/String;Ljava/lang/String;[Ljava/lang/String;Ljava/lang/String;)Landroid/database/Cursor;";
const INSERT_SIG: &str = "(Landroid/net/Uri;Landroid/content/ContentValues;)Landroid/net/Uri;";
const BULK_INSERT_SIG: &str = "(Landroid/net/Uri;[Landroid/content/ContentValues;)I";
const UPDATE_SIG: &str =
    "(Landroid/net/Uri;Landroid/content/ContentValues;Ljava/lang/String;[Ljava/lang/String;)I";
const DELETE_SIG: &str = "(Landroid/net/Uri;Ljava/lang/String;[Ljava/lang/String;)I";

pub(crate) struct AndroidSession {
    env: AttachGuard<'static>,
    resolver: GlobalRef,
    thread: ThreadId,
}

impl AndroidSession {
    pub(crate) fn new(env: AttachGuard<'static>, resolver: GlobalRef, thread: ThreadId) -> Self {
        Self {
            env,
            resolver,
            thread,
        }
    }
}

fn object(result: jni::errors::Result<jni::objects::JValueOwned<'_>>) -> Result<HostRef> {
    result.and_then(|value| value.l()).map(to_ref).map_err(jni_error)
}

fn int(result: jni::errors::Result<jni::objects::JValueOwned<'_>>) -> Result<i32> {
    result.and_then(|value| value.i()).map_err(jni_error)
}

fn boxed(env: &mut JNIEnv<'_>, class: &str, sig: &str, arg: JValue<'_, '_>) -> Result<HostRef> {
    object(env.call_static_method(class, "valueOf", sig, &[arg]))
}

fn new_array(env: &mut JNIEnv<'_>, class: &str, len: usize) -> Result<HostRef> {
    let len = i32::try_from(len)
        .map_err(|_| HostError::OperationFailed(format!("array of {len} items")))?;
    env.new_object_array(len, class, JObject::null())
        .map(to_ref)
        .map_err(jni_error)
}

impl HostSession for AndroidSession {
    fn thread_id(&self) -> ThreadId {
        self.thread
    }

    fn push_frame(&mut self, capacity: usize) -> Result<()> {
        let requested = i32::try_from(capacity).unwrap_or(i32::MAX);
        if self.env.push_local_frame(requested).is_err() {
            let _ = self.env.exception_clear();
            return Err(HostError::TableExhausted {
                requested: capacity,
                available: 0,
            });
        }
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<()> {
        // SAFETY: nothing from the popped frame is used after this call.
        unsafe { self.env.pop_local_frame(&JObject::null()) }
            .map(|_| ())
            .map_err(jni_error)
    }

    fn delete_ref(&mut self, obj: HostRef) -> Result<()> {
        self.env.delete_local_ref(from_ref(obj)).map_err(jni_error)
    }

    fn new_string(&mut self, value: &str) -> Result<HostRef> {
        self.env.new_string(value).map(to_ref).map_err(jni_error)
    }

    fn new_long(&mut self, value: i64) -> Result<HostRef> {
        boxed(&mut self.env, "java/lang/Long", "(J)Ljava/lang/Long;", JValue::Long(value))
    }

    fn new_integer(&mut self, value: i32) -> Result<HostRef> {
        boxed(
            &mut self.env,
            "java/lang/Integer",
            "(I)Ljava/lang/Integer;",
            JValue::Int(value),
        )
    }

    fn new_byte_array(&mut self, value: &[u8]) -> Result<HostRef> {
        self.env
            .byte_array_from_slice(value)
            .map(to_ref)
            .map_err(jni_error)
    }

    fn new_string_array(&mut self, len: usize) -> Result<HostRef> {
        new_array(&mut self.env, "java/lang/String", len)
    }

    fn set_array_element(&mut self, array: HostRef, index: usize, item: HostRef) -> Result<()> {
        let index = i32::try_from(index)
            .map_err(|_| HostError::OperationFailed(format!("array index {index}")))?;
        let array = JObjectArray::from(from_ref(array));
        self.env
            .set_object_array_element(&array, index, from_ref(item))
            .map_err(jni_error)
    }

    fn type_of(&mut self, obj: HostRef) -> Result<HostType> {
        if obj.is_null() {
            return Ok(HostType::Null);
        }
        let target = from_ref(obj);
        let known = [
            ("java/lang/String", HostType::String),
            ("java/lang/Long", HostType::Long),
            ("java/lang/Integer", HostType::Integer),
            ("java/lang/Double", HostType::Double),
            ("[B", HostType::ByteArray),
        ];
        for (class, kind) in known {
            if self.env.is_instance_of(&target, class).map_err(jni_error)? {
                return Ok(kind);
            }
        }
        let class = self.env.get_object_class(&target).map_err(jni_error)?;
        let name = self
            .env
            .call_method(&class, "getName", "()Ljava/lang/String;", &[])
            .and_then(|value| value.l())
            .map_err(jni_error)?;
        let name = read_java_string(&mut self.env, &name)?;
        let _ = self.env.delete_local_ref(class);
        Ok(HostType::Other(name))
    }

    fn read_string(&mut self, obj: HostRef) -> Result<String> {
        read_java_string(&mut self.env, &from_ref(obj))
    }

    fn read_long(&mut self, obj: HostRef) -> Result<i64> {
        self.env
            .call_method(from_ref(obj), "longValue", "()J", &[])
            .and_then(|value| value.j())
            .map_err(jni_error)
    }

    fn read_integer(&mut self, obj: HostRef) -> Result<i32> {
        int(self.env.call_method(from_ref(obj), "intValue", "()I", &[]))
    }

    fn read_byte_array(&mut self, obj: HostRef) -> Result<Vec<u8>> {
        // SAFETY: callers check `type_of` before reading.
        let array = unsafe { JByteArray::from_raw(obj.raw() as usize as jbyteArray) };
        self.env.convert_byte_array(&array).map_err(jni_error)
    }

    fn new_content_values(&mut self) -> Result<HostRef> {
        self.env
            .new_object("android/content/ContentValues", "()V", &[])
            .map(to_ref)
            .map_err(jni_error)
    }

    fn put_value(&mut self, values: HostRef, key: HostRef, value: HostRef) -> Result<()> {
        let sig = match self.type_of(value)? {
            HostType::Null => {
                return self
                    .env
                    .call_method(
                        from_ref(values),
                        "putNull",
                        "(Ljava/lang/String;)V",
                        &[JValue::Object(&from_ref(key))],
                    )
                    .map(|_| ())
                    .map_err(jni_error);
            }
            HostType::String => "(Ljava/lang/String;Ljava/lang/String;)V",
            HostType::Long => "(Ljava/lang/String;Ljava/lang/Long;)V",
            HostType::Integer => "(Ljava/lang/String;Ljava/lang/Integer;)V",
            HostType::Double => "(Ljava/lang/String;Ljava/lang/Double;)V",
            HostType::ByteArray => "(Ljava/lang/String;[B)V",
            HostType::Other(class) => {
                return Err(HostError::OperationFailed(format!(
                    "ContentValues cannot hold {class}"
                )))
            }
        };
        self.env
            .call_method(
                from_ref(values),
                "put",
                sig,
                &[JValue::Object(&from_ref(key)), JValue::Object(&from_ref(value))],
            )
            .map(|_| ())
            .map_err(jni_error)
    }

    fn new_content_values_array(&mut self, len: usize) -> Result<HostRef> {
        new_array(&mut self.env, "android/content/ContentValues", len)
    }

    fn parse_uri(&mut self, uri: &str) -> Result<HostRef> {
        let text = self.env.new_string(uri).map_err(jni_error)?;
        let parsed = object(self.env.call_static_method(
            "android/net/Uri",
            "parse",
            "(Ljava/lang/String;)Landroid/net/Uri;",
            &[JValue::Object(&text)],
        ));
        let _ = self.env.delete_local_ref(text);
        parsed
    }

    fn uri_last_segment(&mut self, uri: HostRef) -> Result<Option<String>> {
        let segment = self
            .env
            .call_method(from_ref(uri), "getLastPathSegment", "()Ljava/lang/String;", &[])
            .and_then(|value| value.l())
            .map_err(jni_error)?;
        if segment.is_null() {
            return Ok(None);
        }
        let text = read_java_string(&mut self.env, &segment);
        let _ = self.env.delete_local_ref(segment);
        text.map(Some)
    }

    fn insert(&mut self, uri: HostRef, values: HostRef) -> Result<HostRef> {
        let resolver = self.resolver.as_obj();
        object(self.env.call_method(
            resolver,
            "insert",
            INSERT_SIG,
            &[JValue::Object(&from_ref(uri)), JValue::Object(&from_ref(values))],
        ))
    }

    fn bulk_insert(&mut self, uri: HostRef, values: HostRef) -> Result<i32> {
        let resolver = self.resolver.as_obj();
        int(self.env.call_method(
            resolver,
            "bulkInsert",
            BULK_INSERT_SIG,
            &[JValue::Object(&from_ref(uri)), JValue::Object(&from_ref(values))],
        ))
    }

    fn query(
        &mut self,
        uri: HostRef,
        projection: HostRef,
        selection: HostRef,
        selection_args: HostRef,
        sort_order: HostRef,
    ) -> Result<HostRef> {
        let resolver = self.resolver.as_obj();
        object(self.env.call_method(
            resolver,
            "query",
            QUERY_SIG,
            &[
                JValue::Object(&from_ref(uri)),
                JValue::Object(&from_ref(projection)),
                JValue::Object(&from_ref(selection)),
                JValue::Object(&from_ref(selection_args)),
                JValue::Object(&from_ref(sort_order)),
            ],
        ))
    }

    fn update(
        &mut self,
        uri: HostRef,
        values: HostRef,
        selection: HostRef,
        selection_args: HostRef,
    ) -> Result<i32> {
        let resolver = self.resolver.as_obj();
        int(self.env.call_method(
            resolver,
            "update",
            UPDATE_SIG,
            &[
                JValue::Object(&from_ref(uri)),
                JValue::Object(&from_ref(values)),
                JValue::Object(&from_ref(selection)),
                JValue::Object(&from_ref(selection_args)),
            ],
        ))
    }

    fn delete(
        &mut self,
        uri: HostRef,
        selection: HostRef,
        selection_args: HostRef,
    ) -> Result<i32> {
        let resolver = self.resolver.as_obj();
        int(self.env.call_method(
            resolver,
            "delete",
            DELETE_SIG,
            &[
                JValue::Object(&from_ref(uri)),
                JValue::Object(&from_ref(selection)),
                JValue::Object(&from_ref(selection_args)),
            ],
        ))
    }

    fn cursor_columns(&mut self, cursor: HostRef) -> Result<Vec<String>> {
        let names = self
            .env
            .call_method(from_ref(cursor), "getColumnNames", "()[Ljava/lang/String;", &[])
            .and_then(|value| value.l())
            .map_err(jni_error)?;
        let names = JObjectArray::from(names);
        let len = self.env.get_array_length(&names).map_err(jni_error)?;
        let mut columns = Vec::with_capacity(len.max(0) as usize);
        for index in 0..len {
            let name = self
                .env
                .get_object_array_element(&names, index)
                .map_err(jni_error)?;
            let column = read_java_string(&mut self.env, &name);
            let _ = self.env.delete_local_ref(name);
            columns.push(column?);
        }
        let _ = self.env.delete_local_ref(names);
        Ok(columns)
    }

    fn cursor_next(&mut self, cursor: HostRef) -> Result<bool> {
        self.env
            .call_method(from_ref(cursor), "moveToNext", "()Z", &[])
            .and_then(|value| value.z())
            .map_err(jni_error)
    }

    fn cursor_value(&mut self, cursor: HostRef, index: usize) -> Result<HostRef> {
        let target = from_ref(cursor);
        let column = i32::try_from(index)
            .map_err(|_| HostError::OperationFailed(format!("column index {index}")))?;
        let column = JValue::Int(column);
        match int(self.env.call_method(&target, "getType", "(I)I", &[column]))? {
            CURSOR_FIELD_TYPE_NULL => Ok(HostRef::NULL),
            CURSOR_FIELD_TYPE_INTEGER => {
                let value = self
                    .env
                    .call_method(&target, "getLong", "(I)J", &[column])
                    .and_then(|value| value.j())
                    .map_err(jni_error)?;
                self.new_long(value)
            }
            CURSOR_FIELD_TYPE_FLOAT => {
                let value = self
                    .env
                    .call_method(&target, "getDouble", "(I)D", &[column])
                    .and_then(|value| value.d())
                    .map_err(jni_error)?;
                boxed(
                    &mut self.env,
                    "java/lang/Double",
                    "(D)Ljava/lang/Double;",
                    JValue::Double(value),
                )
            }
            CURSOR_FIELD_TYPE_STRING => object(self.env.call_method(
                &target,
                "getString",
                "(I)Ljava/lang/String;",
                &[column],
            )),
            CURSOR_FIELD_TYPE_BLOB => {
                object(self.env.call_method(&target, "getBlob", "(I)[B", &[column]))
            }
            other => Err(HostError::OperationFailed(format!(
                "unknown cursor field type {other}"
            ))),
        }
    }

    fn cursor_close(&mut self, cursor: HostRef) -> Result<()> {
        self.env
            .call_method(from_ref(cursor), "close", "()V", &[])
            .map(|_| ())
            .map_err(jni_error)
    }

    fn take_fault(&mut self) -> Option<HostFault> {
        take_exception(&mut self.env)
    }

    fn detach(self: Box<Self>) {
        debug!(thread = ?self.thread, "Detaching from JavaVM");
        drop(self);
    }
}
