//! JavaVM access and JNI conversions shared by the host and the gate.

use std::sync::OnceLock;

use bridge_traits::error::{HostError, Result};
use bridge_traits::host::{HostFault, HostRef};
use jni::objects::{JObject, JString};
use jni::sys::jobject;
use jni::{JNIEnv, JavaVM};

static JAVA_VM: OnceLock<JavaVM> = OnceLock::new();

/// The process JavaVM, taken from the NDK context on first use.
pub(crate) fn java_vm() -> Result<&'static JavaVM> {
    if let Some(vm) = JAVA_VM.get() {
        return Ok(vm);
    }
    let context = ndk_context::android_context();
    if context.vm().is_null() {
        return Err(HostError::Unavailable(
            "ndk context has no JavaVM; was the activity glue initialized?".to_string(),
        ));
    }
    // SAFETY: the NDK context holds a valid JavaVM pointer for the life of the process.
    let vm = unsafe { JavaVM::from_raw(context.vm().cast()) }
        .map_err(|err| HostError::Unavailable(format!("invalid JavaVM: {err}")))?;
    Ok(JAVA_VM.get_or_init(|| vm))
}

/// The application `Context` object held by the NDK context.
pub(crate) fn app_context() -> Result<JObject<'static>> {
    let context = ndk_context::android_context().context();
    if context.is_null() {
        return Err(HostError::Unavailable(
            "ndk context has no application Context".to_string(),
        ));
    }
    // SAFETY: the NDK context keeps a global reference to the Context alive.
    Ok(unsafe { JObject::from_raw(context as jobject) })
}

pub(crate) fn jni_error(err: jni::errors::Error) -> HostError {
    match err {
        jni::errors::Error::JavaException => HostError::ExceptionPending,
        other => HostError::OperationFailed(other.to_string()),
    }
}

pub(crate) fn to_ref<'local>(obj: impl Into<JObject<'local>>) -> HostRef {
    HostRef::from_raw(obj.into().into_raw() as usize as u64)
}

/// Borrowed view of a reference handed out earlier. Never deletes on drop.
pub(crate) fn from_ref(obj: HostRef) -> JObject<'static> {
    // SAFETY: HostRefs are only produced by `to_ref` on the same session.
    unsafe { JObject::from_raw(obj.raw() as usize as jobject) }
}

pub(crate) fn read_java_string(env: &mut JNIEnv<'_>, obj: &JObject<'_>) -> Result<String> {
    // SAFETY: callers only pass objects known to be java.lang.String.
    let string = unsafe { JString::from_raw(obj.as_raw()) };
    let value = env.get_string(&string).map_err(jni_error)?;
    Ok(value.into())
}

/// Takes and clears the pending exception, if any.
pub(crate) fn take_exception(env: &mut JNIEnv<'_>) -> Option<HostFault> {
    let throwable = env.exception_occurred().ok()?;
    if throwable.is_null() {
        return None;
    }
    let _ = env.exception_clear();
    let fault = describe_throwable(env, &throwable).unwrap_or_else(|_| {
        let _ = env.exception_clear();
        HostFault::new("java.lang.Throwable", None)
    });
    let _ = env.delete_local_ref(throwable);
    Some(fault)
}

fn describe_throwable(env: &mut JNIEnv<'_>, throwable: &JObject<'_>) -> Result<HostFault> {
    let class = env.get_object_class(throwable).map_err(jni_error)?;
    let name = env
        .call_method(&class, "getName", "()Ljava/lang/String;", &[])
        .and_then(|value| value.l())
        .map_err(jni_error)?;
    let class_name = read_java_string(env, &name)?;
    let _ = env.delete_local_ref(name);
    let _ = env.delete_local_ref(class);

    let message = env
        .call_method(throwable, "getMessage", "()Ljava/lang/String;", &[])
        .and_then(|value| value.l())
        .map_err(jni_error)?;
    let message = if message.is_null() {
        None
    } else {
        let text = read_java_string(env, &message)?;
        let _ = env.delete_local_ref(message);
        Some(text)
    };
    Ok(HostFault::new(class_name, message))
}
