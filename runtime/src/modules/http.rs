//! `$http` (spec §4.9): outbound HTTP that "looks synchronous" from user
//! code but actually suspends the invocation the way `$ui.*` does — the
//! request runs on the instance's tokio handle and resumes through
//! `InstanceState::resolve_async`, never blocking the isolate thread.

use std::collections::HashMap;

use hyper::body::to_bytes;
use hyper::{Body, Client, Method, Request};
use rusty_v8 as v8;
use serde::Serialize;
use serde_json::Value;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("get".into(), make_function(scope, get)?.into());
    props.insert("post".into(), make_function(scope, post)?.into());
    props.insert("put".into(), make_function(scope, put)?.into());
    props.insert("delete".into(), make_function(scope, delete)?.into());
    add_props_to_object(scope, &module, props)?;

    // Every operation here suspends the invocation; installed under a
    // private name and wrapped into a Promise-returning `$http` by
    // `librt.js`, same scheme as `$database`/`$storage`/`utils.sleep`.
    let key = make_string(scope, "__native_http")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    dispatch(scope, args, rv, Method::GET)
}
fn post(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    dispatch(scope, args, rv, Method::POST)
}
fn put(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    dispatch(scope, args, rv, Method::PUT)
}
fn delete(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    dispatch(scope, args, rv, Method::DELETE)
}

#[derive(Serialize)]
struct HttpResult {
    status: u16,
    body: Value,
    headers: HashMap<String, String>,
}

fn error_result(message: String) -> HttpResult {
    HttpResult { status: 0, body: serde_json::json!({ "error": message }), headers: HashMap::new() }
}

/// `args`: `(url, opts, resolve)`. `opts` is `{headers?, body?}`; `body` is
/// JSON-encoded when present and not already a string.
fn dispatch(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue, method: Method) {
    wrap_callback(scope, |scope| {
        let url_arg = v8::Local::new(scope, args.get(0));
        let url = url_arg.to_rust_string_lossy(scope);
        let opts_arg = v8::Local::new(scope, args.get(1));
        let opts = crate::bindings::js_to_native::<Value>(scope, opts_arg).unwrap_or(Value::Null);
        let resolve_arg = v8::Local::new(scope, args.get(2));
        let resolve = v8::Local::<v8::Function>::try_from(resolve_arg)
            .map_err(|_| crate::error::GenericError::Other("$http call requires a resolve callback".into()))?;
        let resolve_global = v8::Global::new(scope, resolve);

        let headers: HashMap<String, String> = opts
            .get("headers")
            .and_then(|h| serde_json::from_value(h.clone()).ok())
            .unwrap_or_default();
        let body_value = opts.get("body").cloned();

        let state = InstanceState::get(scope);
        let request_id = state.register_waiter(resolve_global);
        state.resolve_async(request_id, async move { perform(method, url, headers, body_value).await });
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

async fn perform(method: Method, url: String, headers: HashMap<String, String>, body: Option<Value>) -> Value {
    let result = perform_inner(method, url, headers, body).await.unwrap_or_else(error_result);
    serde_json::to_value(result).unwrap_or(Value::Null)
}

async fn perform_inner(
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Value>,
) -> Result<HttpResult, String> {
    let body_bytes = match body {
        Some(Value::String(s)) => s.into_bytes(),
        Some(v) => serde_json::to_vec(&v).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };

    let mut builder = Request::builder().method(method).uri(&url);
    for (key, value) in &headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    if !body_bytes.is_empty() && !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder.body(Body::from(body_bytes)).map_err(|e| e.to_string())?;

    let client = Client::new();
    let response = client.request(request).await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let response_headers: HashMap<String, String> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let bytes = to_bytes(response.into_body()).await.map_err(|e| e.to_string())?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    Ok(HttpResult { status, body, headers: response_headers })
}
