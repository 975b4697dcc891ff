//! `$crypto` (spec §4.9): digests and random bytes, hex-encoded. `sha256`
//! and `randomBytes` are backed by `ring`, the teacher's own crypto crate;
//! `md5` needs a dedicated hash the teacher's stack doesn't carry, so this
//! pulls in RustCrypto's `md-5` rather than hand-rolling the algorithm.

use md5::{Digest, Md5};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::GenericResult;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("md5".into(), make_function(scope, md5_hash)?.into());
    props.insert("sha256".into(), make_function(scope, sha256_hash)?.into());
    props.insert("randomBytes".into(), make_function(scope, random_bytes)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$crypto")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn md5_hash(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let mut hasher = Md5::new();
        hasher.update(input.as_bytes());
        let hex = to_hex(&hasher.finalize());
        rv.set(make_string(scope, &hex)?.into());
        Ok(())
    });
}

fn sha256_hash(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let input = args.get(0).to_rust_string_lossy(scope);
        let hash = digest::digest(&digest::SHA256, input.as_bytes());
        let hex = to_hex(hash.as_ref());
        rv.set(make_string(scope, &hex)?.into());
        Ok(())
    });
}

fn random_bytes(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let n = args.get(0).number_value(scope).unwrap_or(0.0).max(0.0) as usize;
        let mut buf = vec![0u8; n];
        SystemRandom::new()
            .fill(&mut buf)
            .map_err(|_| crate::error::GenericError::Other("system RNG unavailable".into()))?;
        rv.set(make_string(scope, &to_hex(&buf))?.into());
        Ok(())
    });
}
