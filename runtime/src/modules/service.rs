//! `$service` (spec §4.2): `boot`/`start`/`shutdown` lifecycle hook
//! registration, plus `action` (named, independently invocable entry
//! points surfaced to the admin UI, spec §6/§3 `ActionState`). Each may be
//! called multiple times; lifecycle hooks run in registration order
//! (`instance.rs::run_lifecycle_hooks`).

use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::{GenericError, GenericResult};
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("boot".into(), make_function(scope, boot)?.into());
    props.insert("start".into(), make_function(scope, start)?.into());
    props.insert("shutdown".into(), make_function(scope, shutdown)?.into());
    props.insert("action".into(), make_function(scope, action)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$service")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn register(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: &mut v8::ReturnValue, collect: impl FnOnce(&mut InstanceState, v8::Global<v8::Function>)) {
    wrap_callback(scope, |scope| {
        let hook = v8::Local::<v8::Function>::try_from(args.get(0))
            .map_err(|_| GenericError::Other("$service hook must be a function".into()))?;
        let global = v8::Global::new(scope, hook);
        collect(InstanceState::get(scope), global);
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn boot(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, |state, hook| state.boot_hooks.push(hook));
}
fn start(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, |state, hook| state.start_hooks.push(hook));
}
fn shutdown(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, |state, hook| state.shutdown_hooks.push(hook));
}

/// `$service.action(slug, fn)` — registers `fn` as a job handler and
/// indexes it by `slug` so `ServiceInstance::run_action` (triggered from
/// the admin surface, spec §6) can invoke it by name and publish
/// `ActionState` transitions around the call.
fn action(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let slug = args.get(0).to_rust_string_lossy(scope);
        let hook = v8::Local::<v8::Function>::try_from(args.get(1))
            .map_err(|_| GenericError::Other("$service.action requires a function".into()))?;
        let global = v8::Global::new(scope, hook);
        let state = InstanceState::get(scope);
        let handler = state.handlers.insert(global);
        state.actions.lock().unwrap().insert(slug.clone(), handler);
        state.log(
            m3m_types::log::LogLevel::Debug,
            format!("registered action '{slug}'"),
            None,
        );
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}
