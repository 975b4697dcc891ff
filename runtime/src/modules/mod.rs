//! Host Modules (spec §4.9): the fixed set of top-level bindings user code
//! sees inside its isolate. Each submodule installs one `$module` record as
//! a plain object on the global (spec §9 "Represent modules as plain
//! records registered as top-level bindings"); none of them hold their own
//! state — they all read `InstanceState` back off the isolate slot at call
//! time, the way the teacher's native functions reach `InstanceState::get`.

use rusty_v8 as v8;

use crate::error::GenericResult;

mod crypto;
mod database;
mod delayed;
mod encoding;
mod env;
mod http;
mod logger;
mod router;
mod schedule;
mod service;
mod storage;
mod ui;
mod utils;
mod validator;

pub(crate) use router::attach_ctx_response;

pub(crate) fn install_all<'s>(
    scope: &mut v8::HandleScope<'s>,
    global: &v8::Local<'s, v8::Object>,
) -> GenericResult<()> {
    router::install(scope, global)?;
    schedule::install(scope, global)?;
    service::install(scope, global)?;
    delayed::install(scope, global)?;
    logger::install(scope, global)?;
    crypto::install(scope, global)?;
    encoding::install(scope, global)?;
    utils::install(scope, global)?;
    validator::install(scope, global)?;
    env::install(scope, global)?;
    http::install(scope, global)?;
    database::install(scope, global)?;
    storage::install(scope, global)?;
    ui::install(scope, global)?;
    Ok(())
}
