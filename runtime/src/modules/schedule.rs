//! `$schedule` (spec §4.4). Registration calls run synchronously from the
//! isolate thread via `rt.block_on` — safe here because that thread is a
//! plain OS thread, never a tokio worker, so blocking it cannot starve the
//! runtime the way blocking inside an async task would.

use std::sync::Arc;

use m3m_types::error::RuntimeError;
use rusty_v8 as v8;
use tokio::runtime::Handle;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::{GenericError, GenericResult};
use crate::instance::InstanceState;
use crate::scheduler::Scheduler;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("every".into(), make_function(scope, every)?.into());
    props.insert("cron".into(), make_function(scope, cron)?.into());
    props.insert("at".into(), make_function(scope, at)?.into());
    props.insert("delay".into(), make_function(scope, delay)?.into());
    props.insert("daily".into(), make_function(scope, daily)?.into());
    props.insert("hourly".into(), make_function(scope, hourly)?.into());
    props.insert("weekly".into(), make_function(scope, weekly)?.into());
    props.insert("monthly".into(), make_function(scope, monthly)?.into());
    props.insert("cancel".into(), make_function(scope, cancel)?.into());
    props.insert("pause".into(), make_function(scope, pause)?.into());
    props.insert("resume".into(), make_function(scope, resume)?.into());
    props.insert("list".into(), make_function(scope, list)?.into());
    props.insert("get".into(), make_function(scope, get)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$schedule")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn take_handler(scope: &mut v8::HandleScope, arg: v8::Local<v8::Value>) -> GenericResult<usize> {
    let handler = v8::Local::<v8::Function>::try_from(arg)
        .map_err(|_| GenericError::Other("$schedule handler must be a function".into()))?;
    let global = v8::Global::new(scope, handler);
    let state = InstanceState::get(scope);
    Ok(state.handlers.insert(global))
}

fn scheduler_and_rt(scope: &mut v8::HandleScope) -> (Arc<Scheduler>, Handle) {
    let state = InstanceState::get(scope);
    (state.scheduler.clone(), state.rt.clone())
}

/// Registers a job from `(expression, handler)` and returns its id, or
/// `""` on an invalid expression (spec §4.4 "invalid ⇒ empty-string job
/// id" — no throw to user code).
fn job_with_expr(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
    call: impl FnOnce(Arc<Scheduler>, Handle, String, usize) -> Result<String, RuntimeError>,
) {
    wrap_callback(scope, |scope| {
        let expr = args.get(0).to_rust_string_lossy(scope);
        let handler = take_handler(scope, args.get(1))?;
        let (scheduler, rt) = scheduler_and_rt(scope);
        let id = call(scheduler, rt, expr, handler).unwrap_or_default();
        let js_str = make_string(scope, &id)?;
        rv.set(js_str.into());
        Ok(())
    });
}

fn job_no_expr(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
    call: impl FnOnce(Arc<Scheduler>, Handle, usize) -> Result<String, RuntimeError>,
) {
    wrap_callback(scope, |scope| {
        let handler = take_handler(scope, args.get(0))?;
        let (scheduler, rt) = scheduler_and_rt(scope);
        let id = call(scheduler, rt, handler).unwrap_or_default();
        let js_str = make_string(scope, &id)?;
        rv.set(js_str.into());
        Ok(())
    });
}

fn every(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    job_with_expr(scope, &args, rv, |s, rt, expr, h| rt.block_on(s.every(&expr, h)));
}
fn cron(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    job_with_expr(scope, &args, rv, |s, rt, expr, h| rt.block_on(s.cron(&expr, h)));
}
fn at(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    job_with_expr(scope, &args, rv, |s, rt, expr, h| rt.block_on(s.at(&expr, h)));
}
fn daily(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    job_no_expr(scope, &args, rv, |s, rt, h| rt.block_on(s.daily(h)));
}
fn hourly(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    job_no_expr(scope, &args, rv, |s, rt, h| rt.block_on(s.hourly(h)));
}

fn delay(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let ms = args.get(0).number_value(scope).unwrap_or(0.0) as u64;
        let handler = take_handler(scope, args.get(1))?;
        let (scheduler, rt) = scheduler_and_rt(scope);
        let id = rt.block_on(scheduler.delay(ms, handler)).unwrap_or_default();
        let js_str = make_string(scope, &id)?;
        rv.set(js_str.into());
        Ok(())
    });
}

fn weekly(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let dow = args.get(0).number_value(scope).unwrap_or(0.0) as u8;
        let handler = take_handler(scope, args.get(1))?;
        let (scheduler, rt) = scheduler_and_rt(scope);
        let id = rt.block_on(scheduler.weekly(dow, handler)).unwrap_or_default();
        let js_str = make_string(scope, &id)?;
        rv.set(js_str.into());
        Ok(())
    });
}

fn monthly(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let day = args.get(0).number_value(scope).unwrap_or(1.0) as u8;
        let handler = take_handler(scope, args.get(1))?;
        let (scheduler, rt) = scheduler_and_rt(scope);
        let id = rt.block_on(scheduler.monthly(day, handler)).unwrap_or_default();
        let js_str = make_string(scope, &id)?;
        rv.set(js_str.into());
        Ok(())
    });
}

fn cancel(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let id = args.get(0).to_rust_string_lossy(scope);
    let (scheduler, rt) = scheduler_and_rt(scope);
    let removed = rt.block_on(scheduler.cancel(&id));
    rv.set(v8::Boolean::new(scope, removed).into());
}

fn pause(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let id = args.get(0).to_rust_string_lossy(scope);
    let (scheduler, rt) = scheduler_and_rt(scope);
    let ok = rt.block_on(scheduler.pause(&id));
    rv.set(v8::Boolean::new(scope, ok).into());
}

fn resume(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let id = args.get(0).to_rust_string_lossy(scope);
    let (scheduler, rt) = scheduler_and_rt(scope);
    let ok = rt.block_on(scheduler.resume(&id));
    rv.set(v8::Boolean::new(scope, ok).into());
}

fn list(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (scheduler, rt) = scheduler_and_rt(scope);
    let snapshots = rt.block_on(scheduler.list());
    match crate::bindings::native_to_js(scope, &snapshots) {
        Ok(v) => rv.set(v),
        Err(_) => rv.set(v8::undefined(scope).into()),
    }
}

fn get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let id = args.get(0).to_rust_string_lossy(scope);
    let (scheduler, rt) = scheduler_and_rt(scope);
    let snapshot = rt.block_on(scheduler.get(&id));
    match crate::bindings::native_to_js(scope, &snapshot) {
        Ok(v) => rv.set(v),
        Err(_) => rv.set(v8::undefined(scope).into()),
    }
}
