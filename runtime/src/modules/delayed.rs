//! `$delayed` (spec §4.6): hand a handler off to the worker pool's bounded
//! FIFO instead of running it inline, returning a ticket id immediately.

use rusty_v8 as v8;

use crate::bindings::{add_props_to_object, make_function, make_object, make_string, wrap_callback};
use crate::error::{GenericError, GenericResult};
use crate::instance::InstanceState;

pub(super) fn install<'s>(scope: &mut v8::HandleScope<'s>, global: &v8::Local<'s, v8::Object>) -> GenericResult<()> {
    let module = make_object(scope);
    let mut props = std::collections::BTreeMap::new();
    props.insert("run".into(), make_function(scope, run)?.into());
    add_props_to_object(scope, &module, props)?;

    let key = make_string(scope, "$delayed")?;
    global.set(scope, key.into(), module.into());
    Ok(())
}

fn run(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    wrap_callback(scope, |scope| {
        let handler = v8::Local::<v8::Function>::try_from(args.get(0))
            .map_err(|_| GenericError::Other("$delayed.run requires a function".into()))?;
        let handler_global = v8::Global::new(scope, handler);
        let state = InstanceState::get(scope);
        let handler_id = state.handlers.insert(handler_global);
        // Leaked slab slot on PoolSaturated: a rejected ticket never runs,
        // so the stored handler would otherwise never be reclaimed.
        match state.worker_pool.run(handler_id) {
            Ok(ticket) => {
                let value = v8::Number::new(scope, ticket as f64);
                rv.set(value.into());
            }
            Err(e) => {
                let state = InstanceState::get(scope);
                state.handlers.remove(handler_id);
                state.degradation.record_pool_saturated();
                return Err(e.into());
            }
        }
        Ok(())
    });
}
