//! `$database.collection(name)` (spec §4.9, §6 "CRUD over named logical
//! collections scoped by project"). Each operation suspends through
//! `resolve_async` the same way `$http` does, since the `Repository` trait
//! is async all the way down to whatever store the host embeds.

use m3m_types::repository::Repository;
use rusty_v8 as v8;
use serde_json::Value;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("collection".into(), make_function(scope, collection)?.into());
    add_props_to_object(scope, &module, props)?;

    // Suspending (like `$http`); `librt.js` builds the public `$database`
    // from this private binding.
    let key = make_string(scope, "__native_database")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

/// Returns a plain object wrapping `name` — each method closes over the
/// collection name as its first bound argument (spec §9 "plain records").
fn collection(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = args.get(0).to_rust_string_lossy(scope);
        let wrapper = make_object(scope);
        let mut props = std::collections::BTreeMap::new();
        props.insert("find".into(), bind_collection(scope, &name, find)?);
        props.insert("findOne".into(), bind_collection(scope, &name, find_one)?);
        props.insert("insert".into(), bind_collection(scope, &name, insert)?);
        props.insert("update".into(), bind_collection(scope, &name, update)?);
        props.insert("delete".into(), bind_collection(scope, &name, delete)?);
        props.insert("count".into(), bind_collection(scope, &name, count)?);
        props.insert("upsert".into(), bind_collection(scope, &name, upsert)?);
        props.insert("findOneAndUpdate".into(), bind_collection(scope, &name, find_one_and_update)?);
        add_props_to_object(scope, &wrapper, props)?;
        rv.set(wrapper.into());
        Ok(())
    });
}

/// Binds `name` as the function's V8-level closure data (`FunctionTemplate`
/// data slot) so every call recovers its collection name via `args.data()`
/// without re-threading a captured Rust string through a `dyn Fn`.
fn bind_collection<'s>(
    scope: &mut v8::HandleScope<'s>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) -> GenericResult<v8::Local<'s, v8::Value>> {
    let name_val = make_string(scope, name)?;
    v8::Function::builder(callback)
        .data(name_val.into())
        .build(scope)
        .map(Into::into)
        .ok_or_else(|| crate::error::GenericError::Other("function allocation failed".into()))
}

fn bound_collection_name(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> GenericResult<String> {
    Ok(args
        .data()
        .expect("bind_collection always sets function data")
        .to_rust_string_lossy(scope))
}

fn suspend_with<F>(scope: &mut v8::HandleScope, resolve_arg: v8::Local<v8::Value>, fut: F) -> GenericResult<()>
where
    F: std::future::Future<Output = Value> + Send + 'static,
{
    let resolve = v8::Local::<v8::Function>::try_from(resolve_arg)
        .map_err(|_| crate::error::GenericError::Other("$database call requires a resolve callback".into()))?;
    let resolve_global = v8::Global::new(scope, resolve);
    let state = InstanceState::get(scope);
    let request_id = state.register_waiter(resolve_global);
    state.resolve_async(request_id, fut);
    Ok(())
}

fn repo_and_project(scope: &mut v8::HandleScope) -> (std::sync::Arc<dyn m3m_types::repository::Repository>, String) {
    let state = InstanceState::get(scope);
    (state.repository.clone(), state.project_id.clone())
}

fn scoped_collection(project_id: &str, slug: &str) -> String {
    m3m_types::repository::collection_name(project_id, slug)
}

fn ok_or_null<T>(result: Result<T, m3m_types::error::RuntimeError>) -> Value
where
    T: serde::Serialize,
{
    result.ok().map(|v| serde_json::to_value(v).unwrap_or(Value::Null)).unwrap_or(Value::Null)
}

fn find(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let filter_arg = v8::Local::new(scope, args.get(0));
        let filter = crate::bindings::js_to_native::<Value>(scope, filter_arg).unwrap_or(Value::Null);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(1));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.find(&coll, filter).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn find_one(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let filter_arg = v8::Local::new(scope, args.get(0));
        let filter = crate::bindings::js_to_native::<Value>(scope, filter_arg).unwrap_or(Value::Null);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(1));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.find_one(&coll, filter).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn insert(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let doc_arg = v8::Local::new(scope, args.get(0));
        let doc = crate::bindings::js_to_native::<Value>(scope, doc_arg).unwrap_or(Value::Null);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(1));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.insert(&coll, doc).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn update(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let id_arg = v8::Local::new(scope, args.get(0));
        let id = id_arg.to_rust_string_lossy(scope);
        let patch_arg = v8::Local::new(scope, args.get(1));
        let patch = crate::bindings::js_to_native::<Value>(scope, patch_arg).unwrap_or(Value::Null);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(2));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.update(&coll, &id, patch).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn delete(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let id_arg = v8::Local::new(scope, args.get(0));
        let id = id_arg.to_rust_string_lossy(scope);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(1));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.delete(&coll, &id).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn count(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let filter_arg = v8::Local::new(scope, args.get(0));
        let filter = crate::bindings::js_to_native::<Value>(scope, filter_arg).unwrap_or(Value::Null);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(1));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.count(&coll, filter).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn upsert(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let filter_arg = v8::Local::new(scope, args.get(0));
        let filter = crate::bindings::js_to_native::<Value>(scope, filter_arg).unwrap_or(Value::Null);
        let doc_arg = v8::Local::new(scope, args.get(1));
        let doc = crate::bindings::js_to_native::<Value>(scope, doc_arg).unwrap_or(Value::Null);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(2));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.upsert(&coll, filter, doc).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}

fn find_one_and_update(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let name = bound_collection_name(scope, &args)?;
        let filter_arg = v8::Local::new(scope, args.get(0));
        let filter = crate::bindings::js_to_native::<Value>(scope, filter_arg).unwrap_or(Value::Null);
        let ops_arg = v8::Local::new(scope, args.get(1));
        let ops = crate::bindings::js_to_native::<Value>(scope, ops_arg).unwrap_or(Value::Null);
        let return_new_arg = v8::Local::new(scope, args.get(2));
        let return_new = return_new_arg.boolean_value(scope);
        let (repo, project_id) = repo_and_project(scope);
        let resolve_arg = v8::Local::new(scope, args.get(3));
        suspend_with(scope, resolve_arg, async move {
            let coll = scoped_collection(&project_id, &name);
            ok_or_null(repo.find_one_and_update(&coll, filter, ops, return_new).await)
        })?;
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}
