//! `$storage` (spec §4.9 "file-ish interface mediated by the external file
//! service"). No wire format is specified beyond that; this runtime models
//! it as key/value blobs over the same `Repository` trait `$database` uses,
//! scoped to a dedicated collection (open question, resolved in DESIGN.md)
//! rather than inventing a second collaborator trait for one module.

use m3m_types::repository::Repository;
use rusty_v8 as v8;
use serde_json::{json, Value};

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

const STORAGE_COLLECTION_SUFFIX: &str = "_storage";

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("put".into(), make_function(scope, put)?.into());
    props.insert("get".into(), make_function(scope, get)?.into());
    props.insert("delete".into(), make_function(scope, delete)?.into());
    props.insert("list".into(), make_function(scope, list)?.into());
    add_props_to_object(scope, &module, props)?;

    // Suspending; `librt.js` builds the public `$storage` from this.
    let key = make_string(scope, "__native_storage")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn suspend_with<F>(scope: &mut v8::HandleScope, resolve_arg: v8::Local<v8::Value>, fut: F) -> GenericResult<()>
where
    F: std::future::Future<Output = Value> + Send + 'static,
{
    let resolve = v8::Local::<v8::Function>::try_from(resolve_arg)
        .map_err(|_| crate::error::GenericError::Other("$storage call requires a resolve callback".into()))?;
    let resolve_global = v8::Global::new(scope, resolve);
    let state = InstanceState::get(scope);
    let request_id = state.register_waiter(resolve_global);
    state.resolve_async(request_id, fut);
    Ok(())
}

fn storage_collection(scope: &mut v8::HandleScope) -> (std::sync::Arc<dyn m3m_types::repository::Repository>, String) {
    let state = InstanceState::get(scope);
    let collection = m3m_types::repository::collection_name(&state.project_id, STORAGE_COLLECTION_SUFFIX);
    (state.repository.clone(), collection)
}

fn put(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let key = args.get(0).to_rust_string_lossy(scope);
        let content = crate::bindings::js_to_native::<Value>(scope, args.get(1)).unwrap_or(Value::Null);
        let (repo, collection) = storage_collection(scope);
        suspend_with(scope, args.get(2), async move {
            let doc = json!({ "_key": key.clone(), "content": content });
            let filter = json!({ "_key": key });
            let result = repo.upsert(&collection, filter, doc).await;
            json!({ "ok": result.is_ok() })
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let key = args.get(0).to_rust_string_lossy(scope);
        let (repo, collection) = storage_collection(scope);
        suspend_with(scope, args.get(1), async move {
            let filter = json!({ "_key": key });
            match repo.find_one(&collection, filter).await {
                Ok(Some(doc)) => doc.get("content").cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            }
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn delete(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let key = args.get(0).to_rust_string_lossy(scope);
        let (repo, collection) = storage_collection(scope);
        suspend_with(scope, args.get(1), async move {
            let filter = json!({ "_key": key.clone() });
            let existing = repo.find_one(&collection, filter).await.ok().flatten();
            let Some(id) = existing.and_then(|d| d.get("id").or_else(|| d.get("_id")).cloned()) else {
                return json!(false);
            };
            let id_str = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
            json!(repo.delete(&collection, &id_str).await.unwrap_or(false))
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn list(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let (repo, collection) = storage_collection(scope);
        suspend_with(scope, args.get(0), async move {
            match repo.find(&collection, Value::Null).await {
                Ok(docs) => {
                    let keys: Vec<Value> = docs.into_iter().filter_map(|d| d.get("_key").cloned()).collect();
                    Value::Array(keys)
                }
                Err(_) => Value::Array(Vec::new()),
            }
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}
