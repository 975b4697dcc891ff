//! `$env` (spec §4.9): read-only view over the project's configured
//! environment variables, injected at boot from `BootArgs::env`.

use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("get".into(), make_function(scope, get)?.into());
    props.insert("has".into(), make_function(scope, has)?.into());
    props.insert("getInt".into(), make_function(scope, get_int)?.into());
    props.insert("getFloat".into(), make_function(scope, get_float)?.into());
    props.insert("getBool".into(), make_function(scope, get_bool)?.into());
    props.insert("getAll".into(), make_function(scope, get_all)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$env")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn lookup(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> Option<String> {
    let key = args.get(0).to_rust_string_lossy(scope);
    InstanceState::get(scope).env.get(&key).cloned()
}

fn get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let default = if args.length() > 1 { Some(args.get(1).to_rust_string_lossy(scope)) } else { None };
        match lookup(scope, &args).or(default) {
            Some(v) => rv.set(make_string(scope, &v)?.into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

fn has(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let present = lookup(scope, &args).is_some();
    rv.set(v8::Boolean::new(scope, present).into());
}

fn get_int(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let parsed = lookup(scope, &args).and_then(|v| v.parse::<i64>().ok());
        match parsed {
            Some(n) => rv.set(v8::Number::new(scope, n as f64).into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

fn get_float(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let parsed = lookup(scope, &args).and_then(|v| v.parse::<f64>().ok());
        match parsed {
            Some(n) => rv.set(v8::Number::new(scope, n).into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

fn get_bool(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let truthy = lookup(scope, &args)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    rv.set(v8::Boolean::new(scope, truthy).into());
}

fn get_all(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let snapshot = (*InstanceState::get(scope).env).clone();
        let value = crate::bindings::native_to_js(scope, &snapshot)?;
        rv.set(value);
        Ok(())
    });
}
