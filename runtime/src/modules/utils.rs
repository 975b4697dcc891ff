//! `$utils` (spec §4.9): assorted pure helpers plus `sleep`, the one
//! suspending operation in this module — it rides the same
//! `InstanceState::resolve_async` primitive that backs `$http`/`$ui`.

use std::time::Duration;

use chrono::{DateTime, Local};
use regex::Regex;
use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("uuid".into(), make_function(scope, uuid)?.into());
    props.insert("slugify".into(), make_function(scope, slugify)?.into());
    props.insert("randomInt".into(), make_function(scope, random_int)?.into());
    props.insert("truncate".into(), make_function(scope, truncate)?.into());
    props.insert("timestamp".into(), make_function(scope, timestamp)?.into());
    props.insert("capitalize".into(), make_function(scope, capitalize)?.into());
    props.insert("regexMatch".into(), make_function(scope, regex_match)?.into());
    props.insert("regexReplace".into(), make_function(scope, regex_replace)?.into());
    props.insert("formatDate".into(), make_function(scope, format_date)?.into());
    props.insert("parseDate".into(), make_function(scope, parse_date)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$utils")?;
    global.set(scope, key.into(), module.into());

    // `sleep` suspends the invocation, so it's installed separately under a
    // private name: `librt.js` wraps it with a user-facing Promise the same
    // way it wraps `$http`/`$database`/`$storage`.
    let sleep_fn = make_function(scope, sleep)?;
    let sleep_key = make_string(scope, "__native_sleep")?;
    global.set(scope, sleep_key.into(), sleep_fn.into());
    Ok(())
}

fn uuid(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let id = uuid::Uuid::new_v4().to_string();
        rv.set(make_string(scope, &id)?.into());
        Ok(())
    });
}

fn slugify(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let mut out = String::with_capacity(input.len());
        let mut last_was_dash = false;
        for ch in input.to_ascii_lowercase().chars() {
            if ch.is_ascii_alphanumeric() {
                out.push(ch);
                last_was_dash = false;
            } else if !last_was_dash && !out.is_empty() {
                out.push('-');
                last_was_dash = true;
            }
        }
        while out.ends_with('-') {
            out.pop();
        }
        rv.set(make_string(scope, &out)?.into());
        Ok(())
    });
}

fn random_int(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let min = args.get(0).number_value(scope).unwrap_or(0.0) as i64;
    let max = args.get(1).number_value(scope).unwrap_or(0.0) as i64;
    let value = if max <= min { min } else { min + (rand::random::<u64>() % (max - min) as u64) as i64 };
    rv.set(v8::Number::new(scope, value as f64).into());
}

fn truncate(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let n = args.get(1).number_value(scope).unwrap_or(0.0) as i64;
        let truncated = if n <= 0 {
            "...".to_string()
        } else {
            let n = n as usize;
            let chars: Vec<char> = input.chars().collect();
            if chars.len() <= n {
                input
            } else {
                format!("{}...", chars[..n].iter().collect::<String>())
            }
        };
        rv.set(make_string(scope, &truncated)?.into());
        Ok(())
    });
}

fn timestamp(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let ms = InstanceState::get(scope).now_ms();
    rv.set(v8::Number::new(scope, ms as f64).into());
}

fn capitalize(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let mut chars = input.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        };
        rv.set(make_string(scope, &capitalized)?.into());
        Ok(())
    });
}

fn compile_regex(scope: &mut v8::HandleScope, arg: v8::Local<v8::Value>) -> Result<Regex, crate::error::GenericError> {
    let pattern = arg.to_rust_string_lossy(scope);
    Regex::new(&pattern).map_err(|e| crate::error::GenericError::Other(format!("invalid regex: {e}")))
}

fn regex_match(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let re = compile_regex(scope, args.get(1))?;
        match re.find(&input) {
            Some(m) => rv.set(make_string(scope, m.as_str())?.into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

fn regex_replace(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let re = compile_regex(scope, args.get(1))?;
        let replacement = args.get(2).to_rust_string_lossy(scope);
        let result = re.replace_all(&input, replacement.as_str());
        rv.set(make_string(scope, &result)?.into());
        Ok(())
    });
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

fn format_date(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let ms = args.get(0).number_value(scope).unwrap_or(0.0) as i64;
        let format = if args.length() > 1 { args.get(1).to_rust_string_lossy(scope) } else { DEFAULT_DATE_FORMAT.into() };
        let dt: DateTime<Local> = DateTime::from(
            DateTime::<chrono::Utc>::from_timestamp_millis(ms).unwrap_or_default(),
        );
        let formatted = dt.format(&format).to_string();
        rv.set(make_string(scope, &formatted)?.into());
        Ok(())
    });
}

fn parse_date(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let format = if args.length() > 1 { Some(args.get(1).to_rust_string_lossy(scope)) } else { None };
        let parsed = match format {
            Some(fmt) => chrono::NaiveDateTime::parse_from_str(&input, &fmt).ok().map(|n| n.and_utc().timestamp_millis()),
            None => DateTime::parse_from_rfc3339(&input).ok().map(|d| d.timestamp_millis()),
        };
        match parsed {
            Some(ms) => rv.set(v8::Number::new(scope, ms as f64).into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

fn sleep(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let ms = args.get(0).number_value(scope).unwrap_or(0.0).max(0.0) as u64;
        let resolve = v8::Local::<v8::Function>::try_from(args.get(1))
            .map_err(|_| crate::error::GenericError::Other("utils.sleep requires a resolve callback".into()))?;
        let resolve_global = v8::Global::new(scope, resolve);
        let state = InstanceState::get(scope);
        let request_id = state.register_waiter(resolve_global);
        state.resolve_async(request_id, async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            serde_json::Value::Null
        });
        Ok(())
    });
    rv.set(v8::undefined(scope).into());
}
