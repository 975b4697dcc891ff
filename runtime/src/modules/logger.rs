//! `$logger` (spec §4.9): structured log lines, fed into the instance's
//! `LogRing` and fanned out to the Event Bus the same way `InstanceState::log`
//! already does for native-side diagnostics.

use m3m_types::log::LogLevel;
use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("debug".into(), make_function(scope, debug)?.into());
    props.insert("info".into(), make_function(scope, info)?.into());
    props.insert("warn".into(), make_function(scope, warn)?.into());
    props.insert("error".into(), make_function(scope, error)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = crate::bindings::make_string(scope, "$logger")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn debug(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    log(scope, &args, LogLevel::Debug);
    rv.set(v8::undefined(scope).into());
}
fn info(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    log(scope, &args, LogLevel::Info);
    rv.set(v8::undefined(scope).into());
}
fn warn(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    log(scope, &args, LogLevel::Warn);
    rv.set(v8::undefined(scope).into());
}
fn error(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    log(scope, &args, LogLevel::Error);
    rv.set(v8::undefined(scope).into());
}

fn log(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, level: LogLevel) {
    wrap_callback(scope, |scope| {
        let message = args.get(0).to_rust_string_lossy(scope);
        let fields = if args.length() > 1 {
            Some(crate::bindings::js_to_native::<serde_json::Value>(scope, args.get(1))?)
        } else {
            None
        };
        InstanceState::get(scope).log(level, message, fields);
        Ok(())
    });
}
