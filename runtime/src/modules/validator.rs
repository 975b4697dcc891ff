//! `$validator` (spec §4.9): rule-based predicates plus the composite
//! `struct`/`var` forms. Grounded on the teacher pack's `validations` crate
//! (`rrik-komodo/lib/validations`) — static `OnceLock<Regex>` per pattern,
//! same idiom this reuses for the fixed rule set below.

use std::sync::OnceLock;

use regex::Regex;
use rusty_v8 as v8;
use serde::Serialize;
use serde_json::Value;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, native_to_js, wrap_callback};
use crate::error::GenericResult;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("isEmail".into(), make_function(scope, is_email)?.into());
    props.insert("isURL".into(), make_function(scope, is_url)?.into());
    props.insert("isUUID".into(), make_function(scope, is_uuid)?.into());
    props.insert("isNumeric".into(), make_function(scope, is_numeric)?.into());
    props.insert("isIP".into(), make_function(scope, is_ip)?.into());
    props.insert("struct".into(), make_function(scope, validate_struct)?.into());
    props.insert("var".into(), make_function(scope, validate_var)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$validator")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email regex"))
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("static uuid regex")
    })
}

pub(crate) fn rule_email(s: &str) -> bool {
    email_regex().is_match(s)
}

pub(crate) fn rule_url(s: &str) -> bool {
    (s.starts_with("http://") || s.starts_with("https://")) && url_has_authority(s)
}

fn url_has_authority(s: &str) -> bool {
    s.splitn(2, "://").nth(1).map(|rest| !rest.is_empty() && !rest.starts_with('/')).unwrap_or(false)
}

pub(crate) fn rule_uuid(s: &str) -> bool {
    uuid_regex().is_match(s)
}

pub(crate) fn rule_numeric(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok()
}

pub(crate) fn rule_ip(s: &str) -> bool {
    s.parse::<std::net::IpAddr>().is_ok()
}

fn is_email(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let s = args.get(0).to_rust_string_lossy(scope);
    rv.set(v8::Boolean::new(scope, rule_email(&s)).into());
}
fn is_url(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let s = args.get(0).to_rust_string_lossy(scope);
    rv.set(v8::Boolean::new(scope, rule_url(&s)).into());
}
fn is_uuid(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let s = args.get(0).to_rust_string_lossy(scope);
    rv.set(v8::Boolean::new(scope, rule_uuid(&s)).into());
}
fn is_numeric(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let s = args.get(0).to_rust_string_lossy(scope);
    rv.set(v8::Boolean::new(scope, rule_numeric(&s)).into());
}
fn is_ip(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let s = args.get(0).to_rust_string_lossy(scope);
    rv.set(v8::Boolean::new(scope, rule_ip(&s)).into());
}

#[derive(Serialize)]
struct FieldError {
    field: String,
    msg: String,
}

#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    errors: Vec<FieldError>,
}

/// Applies one named rule (`"required"`, `"isEmail"`, `"isURL"`, `"isUUID"`,
/// `"isNumeric"`, `"isIP"`, or `"minLength:<n>"`/`"maxLength:<n>"`) to a
/// single JSON value, returning an error message on failure.
fn apply_rule(rule: &str, value: &Value) -> Option<String> {
    let as_str = value.as_str();
    let is_present = !matches!(value, Value::Null) && as_str.map(|s| !s.is_empty()).unwrap_or(true);

    if let Some(n) = rule.strip_prefix("minLength:") {
        let min: usize = n.parse().ok()?;
        let len = as_str.map(str::len).unwrap_or(0);
        return (len < min).then(|| format!("must be at least {min} characters"));
    }
    if let Some(n) = rule.strip_prefix("maxLength:") {
        let max: usize = n.parse().ok()?;
        let len = as_str.map(str::len).unwrap_or(0);
        return (len > max).then(|| format!("must be at most {max} characters"));
    }

    match rule {
        "required" => (!is_present).then(|| "is required".to_string()),
        "isEmail" => as_str.filter(|s| !rule_email(s)).map(|_| "must be a valid email".to_string()),
        "isURL" => as_str.filter(|s| !rule_url(s)).map(|_| "must be a valid URL".to_string()),
        "isUUID" => as_str.filter(|s| !rule_uuid(s)).map(|_| "must be a valid UUID".to_string()),
        "isNumeric" => as_str.filter(|s| !rule_numeric(s)).map(|_| "must be numeric".to_string()),
        "isIP" => as_str.filter(|s| !rule_ip(s)).map(|_| "must be a valid IP address".to_string()),
        _ => None,
    }
}

fn validate_value(field: &str, value: &Value, rules: &[String], errors: &mut Vec<FieldError>) {
    for rule in rules {
        if let Some(msg) = apply_rule(rule, value) {
            errors.push(FieldError { field: field.to_string(), msg });
        }
    }
}

fn validate_struct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let data = crate::bindings::js_to_native::<Value>(scope, args.get(0))?;
        let rules = crate::bindings::js_to_native::<std::collections::BTreeMap<String, Vec<String>>>(scope, args.get(1))?;

        let mut errors = Vec::new();
        for (field, field_rules) in &rules {
            let value = data.get(field).cloned().unwrap_or(Value::Null);
            validate_value(field, &value, field_rules, &mut errors);
        }
        let result = ValidationResult { valid: errors.is_empty(), errors };
        rv.set(native_to_js(scope, &result)?);
        Ok(())
    });
}

fn validate_var(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let value = crate::bindings::js_to_native::<Value>(scope, args.get(0))?;
        let rules = crate::bindings::js_to_native::<Vec<String>>(scope, args.get(1))?;

        let mut errors = Vec::new();
        validate_value("value", &value, &rules, &mut errors);
        let result = ValidationResult { valid: errors.is_empty(), errors };
        rv.set(native_to_js(scope, &result)?);
        Ok(())
    });
}
