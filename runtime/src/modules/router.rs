//! `$router` (spec §4.3): registers `(method, pattern) -> handler` into the
//! instance's route table, and the `ctx.response(status, body)` convenience
//! attached to every `RequestContext` just before a route handler runs.

use m3m_types::route::HttpMethod;
use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, wrap_callback};
use crate::error::{GenericError, GenericResult};
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let router = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("get".to_string(), make_function(scope, register_get)?.into());
    props.insert("post".to_string(), make_function(scope, register_post)?.into());
    props.insert("put".to_string(), make_function(scope, register_put)?.into());
    props.insert("delete".to_string(), make_function(scope, register_delete)?.into());
    add_props_to_object(scope, &router, props)?;

    let key = crate::bindings::make_string(scope, "$router")?;
    global.set(scope, key.into(), router.into());
    Ok(())
}

fn register_get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, HttpMethod::Get)
}
fn register_post(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, HttpMethod::Post)
}
fn register_put(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, HttpMethod::Put)
}
fn register_delete(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    register(scope, args, &mut rv, HttpMethod::Delete)
}

fn register(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: &mut v8::ReturnValue, method: HttpMethod) {
    wrap_callback(scope, |scope| {
        let pattern = args.get(0).to_rust_string_lossy(scope);
        let handler = v8::Local::<v8::Function>::try_from(args.get(1))
            .map_err(|_| GenericError::Other("$router handler must be a function".into()))?;
        let handler_global = v8::Global::new(scope, handler);
        let state = InstanceState::get(scope);
        let id = state.handlers.insert(handler_global);
        // First-registered pattern wins (spec §4.3 step 3, §9 Open Question);
        // a duplicate just leaves the earlier handler slot unused.
        state.routes.register(method, &pattern, id);
        Ok(())
    });
    let _ = rv; // no return value
}

/// Adds `ctx.response(status, body)` to a route's `RequestContext` object
/// right before the handler runs. Calling it takes `current_reply_tx`
/// immediately (spec §4.3 "the sentinel value produced by ctx.response"),
/// so any later synchronous/promise return from the handler is a no-op as
/// far as the reply is concerned — `settle_or_park` checks for that.
pub(crate) fn attach_ctx_response<'s>(scope: &mut v8::HandleScope<'s>, ctx: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let response_fn = make_function(scope, ctx_response)?;
    let key = crate::bindings::make_string(scope, "response")?;
    ctx.set(scope, key.into(), response_fn.into());
    Ok(())
}

fn ctx_response(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let status = args.get(0).number_value(scope).unwrap_or(200.0) as u16;
        let body = if args.length() > 1 {
            Some(crate::bindings::js_to_native::<serde_json::Value>(scope, args.get(1))?)
        } else {
            None
        };
        let reply_tx = {
            let state = InstanceState::get(scope);
            state.current_reply_tx.take()
        };
        if let Some(reply_tx) = reply_tx {
            let response = m3m_types::route::ResponseObject { status, body, headers: Default::default() };
            let _ = reply_tx.send(Ok(crate::dispatcher::InvocationResult::Response(response)));
        }
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}
