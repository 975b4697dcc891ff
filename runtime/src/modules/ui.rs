//! `$ui` — UI Request Broker (spec §4.8): correlated dialogs that suspend
//! the calling invocation until a client answers. The actual resume comes
//! from outside the isolate thread entirely: the WS hub (control plane)
//! receives `{action:"ui_response", requestId, data}` and calls
//! `dispatcher.dispatch(Invocation::Resume{request_id, value}, ..)` directly
//! — the SAME `Resume` path `invoke_resume` already serves for `$http`/
//! `$database`/`utils.sleep`. The timeout race below just guarantees a
//! `{cancelled:true}` answer if nobody ever does; whichever arrives first
//! wins, the loser's `Resume` finds the request already removed and is a
//! harmless no-op (spec §3 invariant 7: "resolved exactly once").

use m3m_types::events::{UiDialogType, UiRequest};
use rusty_v8 as v8;
use serde_json::{json, Value};

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("alert".into(), make_function(scope, alert)?.into());
    props.insert("confirm".into(), make_function(scope, confirm)?.into());
    props.insert("prompt".into(), make_function(scope, prompt)?.into());
    props.insert("form".into(), make_function(scope, form)?.into());
    props.insert("toast".into(), make_function(scope, toast)?.into());
    props.insert("formUpdate".into(), make_function(scope, form_update)?.into());
    add_props_to_object(scope, &module, props)?;

    // $ui.alert/.../.form all suspend; wrapped into Promises by librt.js.
    let key = make_string(scope, "__native_ui")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn dialog(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, dialog_type: UiDialogType) -> GenericResult<()> {
    let options = crate::bindings::js_to_native::<Value>(scope, args.get(0)).unwrap_or(Value::Null);
    let resolve = v8::Local::<v8::Function>::try_from(args.get(1))
        .map_err(|_| crate::error::GenericError::Other("$ui dialog requires a resolve callback".into()))?;
    let resolve_global = v8::Global::new(scope, resolve);

    let state = InstanceState::get(scope);
    let request_id = state.register_waiter(resolve_global);
    let timeout = state.config.ui_request_timeout();
    let request = UiRequest { request_id: request_id.clone(), project_id: state.project_id.clone(), dialog_type, options };
    state.event_sink.publish_ui_request(&request);
    state.resolve_async(request_id, async move {
        tokio::time::sleep(timeout).await;
        json!({ "cancelled": true })
    });
    Ok(())
}

fn alert(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| dialog(scope, args, UiDialogType::Alert));
    rv.set(v8::undefined(scope).into());
}
fn confirm(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| dialog(scope, args, UiDialogType::Confirm));
    rv.set(v8::undefined(scope).into());
}
fn prompt(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| dialog(scope, args, UiDialogType::Prompt));
    rv.set(v8::undefined(scope).into());
}
fn form(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| dialog(scope, args, UiDialogType::Form));
    rv.set(v8::undefined(scope).into());
}

/// Fire-and-forget (spec §4.8.5): no request id, no waiter, no resolve arg.
fn toast(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let options = crate::bindings::js_to_native::<Value>(scope, args.get(0)).unwrap_or(Value::Null);
        let state = InstanceState::get(scope);
        let request = UiRequest {
            request_id: format!("toast-{}", rand::random::<u64>()),
            project_id: state.project_id.clone(),
            dialog_type: UiDialogType::Toast,
            options,
        };
        state.event_sink.publish_ui_request(&request);
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

/// Server-to-client push against an already-open form; no response awaited.
fn form_update(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let request_id = args.get(0).to_rust_string_lossy(scope);
        let data = crate::bindings::js_to_native::<Value>(scope, args.get(1)).unwrap_or(Value::Null);
        let state = InstanceState::get(scope);
        let request = UiRequest {
            request_id,
            project_id: state.project_id.clone(),
            dialog_type: UiDialogType::FormUpdate,
            options: data,
        };
        state.event_sink.publish_ui_request(&request);
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}
