//! `$encoding` (spec §4.9, §8 round-trip properties).

use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("base64Encode".into(), make_function(scope, base64_encode)?.into());
    props.insert("base64Decode".into(), make_function(scope, base64_decode)?.into());
    props.insert("jsonParse".into(), make_function(scope, json_parse)?.into());
    props.insert("jsonStringify".into(), make_function(scope, json_stringify)?.into());
    props.insert("urlEncode".into(), make_function(scope, url_encode)?.into());
    props.insert("urlDecode".into(), make_function(scope, url_decode)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$encoding")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn base64_encode(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let encoded = base64::encode(input.as_bytes());
        rv.set(make_string(scope, &encoded)?.into());
        Ok(())
    });
}

fn base64_decode(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        match base64::decode(&input).ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
            Some(decoded) => rv.set(make_string(scope, &decoded)?.into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

/// Returns `null` on malformed input rather than throwing (spec §4.9
/// "jsonParse returns null on failure").
fn json_parse(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let input = args.get(0).to_rust_string_lossy(scope);
    let parsed = v8::String::new(scope, &input).and_then(|s| v8::json::parse(scope, s));
    match parsed {
        Some(v) => rv.set(v),
        None => rv.set(v8::null(scope).into()),
    }
}

fn json_stringify(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let value = v8::Local::new(scope, args.get(0));
    match v8::json::stringify(scope, value) {
        Some(s) => rv.set(s.into()),
        None => rv.set(v8::null(scope).into()),
    }
}

fn url_encode(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let encoded = percent_encode(&input);
        rv.set(make_string(scope, &encoded)?.into());
        Ok(())
    });
}

fn url_decode(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        match percent_decode(&input) {
            Some(decoded) => rv.set(make_string(scope, &decoded)?.into()),
            None => rv.set(v8::null(scope).into()),
        }
        Ok(())
    });
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.as_bytes() {
        match *byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(*byte as char),
            b' ' => out.push('+'),
            b => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn percent_decode(input: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(input.len());
    let mut chars = input.bytes();
    while let Some(b) = chars.next() {
        match b {
            b'+' => bytes.push(b' '),
            b'%' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let byte = u8::from_str_radix(&format!("{}{}", hi as char, lo as char), 16).ok()?;
                bytes.push(byte);
            }
            other => bytes.push(other),
        }
    }
    String::from_utf8(bytes).ok()
}
