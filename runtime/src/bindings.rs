//! V8 glue: JSON round-trip between `serde_json::Value` and V8 values,
//! native-function registration, and the `TryCatch` helpers the dispatch
//! loop needs to turn a pending exception into a `JsError`.
//!
//! The teacher's `executor.rs` already leans on `v8::json::parse` for the
//! one ad-hoc value it decodes (an I/O resume payload); this module
//! generalizes that to every value that crosses the isolate boundary rather
//! than hand-walking V8 object graphs, which keeps host-module bindings
//! small and auditable.

use std::collections::BTreeMap;

use rusty_v8 as v8;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{GenericError, GenericResult, JsError, JsErrorKind};

pub fn make_string<'s>(
    scope: &mut v8::HandleScope<'s>,
    s: &str,
) -> GenericResult<v8::Local<'s, v8::String>> {
    v8::String::new(scope, s).ok_or_else(|| GenericError::Other("string allocation failed".into()))
}

pub fn native_to_js<'s, T: Serialize>(
    scope: &mut v8::HandleScope<'s>,
    value: &T,
) -> GenericResult<v8::Local<'s, v8::Value>> {
    let json = serde_json::to_string(value).map_err(|e| GenericError::Other(e.to_string()))?;
    let json_str = make_string(scope, &json)?;
    v8::json::parse(scope, json_str).ok_or_else(|| GenericError::Other("json parse into isolate failed".into()))
}

pub fn js_to_native<'s, T: DeserializeOwned>(
    scope: &mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
) -> GenericResult<T> {
    let json_str = v8::json::stringify(scope, value)
        .ok_or_else(|| GenericError::Other("json stringify out of isolate failed".into()))?;
    let json = json_str.to_rust_string_lossy(scope);
    serde_json::from_str(&json).map_err(|e| GenericError::Other(format!("value did not match expected shape: {e}")))
}

/// Registers a plain record (the shape every `$module` takes: a top-level
/// object with native-function properties, spec §9 "Represent modules as
/// plain records") on `target`.
pub fn add_props_to_object<'s>(
    scope: &mut v8::HandleScope<'s>,
    target: &v8::Local<'s, v8::Object>,
    props: BTreeMap<String, v8::Local<'s, v8::Value>>,
) -> GenericResult<()> {
    for (key, value) in props {
        let key = make_string(scope, &key)?;
        target.set(scope, key.into(), value);
    }
    Ok(())
}

pub fn make_object<'s>(scope: &mut v8::HandleScope<'s>) -> v8::Local<'s, v8::Object> {
    v8::Object::new(scope)
}

pub fn make_function<'s>(
    scope: &mut v8::HandleScope<'s>,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) -> GenericResult<v8::Local<'s, v8::Function>> {
    v8::Function::new(scope, callback).ok_or_else(|| GenericError::Other("function allocation failed".into()))
}

/// Runs `body`, translating a Rust-side `Err` into a thrown JS exception
/// instead of letting it escape the callback (V8 callbacks must not
/// propagate Rust panics or errors directly).
pub fn wrap_callback<'s>(
    scope: &mut v8::HandleScope<'s>,
    body: impl FnOnce(&mut v8::HandleScope<'s>) -> GenericResult<()>,
) {
    if let Err(e) = body(scope) {
        let message = make_string(scope, &e.to_string()).unwrap_or_else(|_| {
            v8::String::new(scope, "internal error").expect("literal string alloc never fails")
        });
        let exception = v8::Exception::error(scope, message);
        scope.throw_exception(exception);
    }
}

/// Extension used by the dispatch loop to turn a pending V8 exception into
/// a `JsError`, mirroring the teacher's `try_catch.check_on_init()` /
/// `check_on_task()` calls.
pub trait CheckExceptions {
    fn check_on_init(&mut self) -> Result<(), JsError>;
    fn check_on_task(&mut self) -> Result<(), JsError>;
}

impl<'s> CheckExceptions for v8::TryCatch<'s, v8::HandleScope<'s>> {
    fn check_on_init(&mut self) -> Result<(), JsError> {
        extract_pending_exception(self)
    }

    fn check_on_task(&mut self) -> Result<(), JsError> {
        extract_pending_exception(self)
    }
}

fn extract_pending_exception<'s>(
    try_catch: &mut v8::TryCatch<'s, v8::HandleScope<'s>>,
) -> Result<(), JsError> {
    if !try_catch.has_caught() {
        return Ok(());
    }
    if try_catch.has_terminated() {
        // The reason was already recorded out-of-band by whichever interrupt
        // fired `terminate_execution()`; the caller reads it from the
        // `TerminationReasonBox` slot and attaches it here.
        return Err(JsError::new(JsErrorKind::Error, Some("execution terminated".into())));
    }
    let message = try_catch
        .exception()
        .map(|exc| exc.to_rust_string_lossy(try_catch))
        .unwrap_or_else(|| "unknown exception".into());
    Err(JsError::new(JsErrorKind::Error, Some(message)))
}
