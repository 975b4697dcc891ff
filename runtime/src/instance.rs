//! Service Instance (spec §4.2): one V8 isolate per project, its lifecycle
//! (`Initializing` → `Booting` → `Running` → `Stopping` → `Stopped`/
//! `Errored`), and the single-consumer dispatch loop that is the only thing
//! ever allowed to touch the isolate. Adapted from the teacher's
//! `Instance::run` in `executor.rs`: one long-lived `ContextScope` for the
//! whole thread, a fresh `HandleScope` per loop iteration, generalized from
//! "one `Fetch` task" to the full `Invocation` set of spec §4.2/§4.8/§9.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle as OsJoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use m3m_types::error::RuntimeError;
use m3m_types::log::LogLevel;
use m3m_types::repository::Repository;
use m3m_types::route::{HttpMethod, RequestContext, ResponseObject};
use m3m_types::version_source::VersionSource;
use rusty_v8 as v8;
use serde_json::Value;
use slab::Slab;
use tokio::sync::{mpsc, oneshot, watch};

use crate::bindings::{make_string, native_to_js, CheckExceptions};
use crate::config::InstanceConfig;
use crate::degradation::{DegradationCounters, DegradationSnapshot};
use crate::dispatcher::{DispatchItem, DispatcherHandle, HandlerId, Invocation, InvocationResult};
use crate::error::{GenericError, GenericResult, TerminationReasonBox};
use crate::event_sink::EventSink;
use crate::interrupt::{CancelGuard, DeadlineGuard, InterruptController};
use crate::log_ring::LogRing;
use crate::modules;
use crate::router::RouteTable;
use crate::scheduler::Scheduler;
use crate::worker_pool::WorkerPool;

static LIBRT: &str = include_str!("librt.js");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Booting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

pub(crate) enum InvocationKind {
    Route,
    Job,
}

pub(crate) struct PendingInvocation {
    pub promise: v8::Global<v8::Promise>,
    pub reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
    pub kind: InvocationKind,
}

/// Everything a host-module native function needs, held as a V8 isolate
/// slot the way the teacher holds `InstanceState` (spec §9: "Represent
/// modules as plain records registered as top-level bindings... per-instance
/// identity avoids the need for weak references").
pub(crate) struct InstanceState {
    pub rt: tokio::runtime::Handle,
    pub project_id: String,
    pub self_task_tx: mpsc::Sender<DispatchItem>,
    pub task_rx: mpsc::Receiver<DispatchItem>,
    pub cancel_rx: watch::Receiver<bool>,
    pub config: InstanceConfig,

    pub log_ring: Arc<LogRing>,
    pub event_sink: Arc<dyn EventSink>,
    pub repository: Arc<dyn Repository>,
    pub env: Arc<HashMap<String, String>>,
    pub scheduler: Arc<Scheduler>,
    pub worker_pool: Arc<WorkerPool>,

    pub routes: RouteTable,
    pub handlers: Slab<v8::Global<v8::Function>>,
    pub boot_hooks: Vec<v8::Global<v8::Function>>,
    pub start_hooks: Vec<v8::Global<v8::Function>>,
    pub shutdown_hooks: Vec<v8::Global<v8::Function>>,
    /// Slug -> handler, populated by `$service.action` (spec §C supplement)
    /// and read cross-thread by `ServiceInstance::run_action`.
    pub actions: Arc<StdMutex<HashMap<String, HandlerId>>>,
    pub degradation: Arc<DegradationCounters>,

    pub next_invocation_id: u64,
    pub current_invocation_id: Option<u64>,
    pub current_reply_tx: Option<oneshot::Sender<Result<InvocationResult, RuntimeError>>>,
    pub(crate) pending_invocation: HashMap<u64, PendingInvocation>,
    pub pending_resolvers: HashMap<String, (v8::Global<v8::Function>, u64)>,
}

impl InstanceState {
    pub fn get(isolate: &mut v8::Isolate) -> &mut Self {
        isolate.get_slot_mut::<Self>().expect("InstanceState slot missing")
    }

    pub fn now_ms(&self) -> i64 {
        chrono::Local::now().timestamp_millis()
    }

    pub fn log(&self, level: LogLevel, message: String, fields: Option<Value>) {
        let ts = self.now_ms();
        self.log_ring.push(level, message.clone(), fields.clone(), ts);
        self.event_sink.publish_log(
            &self.project_id,
            &m3m_types::log::LogEntry { timestamp: ts, level, message, fields },
        );
    }

    /// Registers a resolve/continuation callback for a suspended
    /// `$ui`/`$http`/`$delayed`/`sleep` call and returns the request id the
    /// caller's continuation is keyed by (spec §4.8, §9).
    pub fn register_waiter(&mut self, callback: v8::Global<v8::Function>) -> String {
        let request_id = format!("wait-{}", rand::random::<u64>());
        let invocation_id = self.current_invocation_id.unwrap_or(0);
        self.pending_resolvers.insert(request_id.clone(), (callback, invocation_id));
        request_id
    }

    /// Drives `fut` to completion on `rt`, then self-enqueues a `Resume` so
    /// its result is delivered back through the SAME single-consumer queue,
    /// keeping invariant 4 (no two handlers run concurrently) intact. Used
    /// by every suspending host call (`$ui.*`, `$http.*`, `$database.*`,
    /// `utils.sleep`) — spec §5 "at each such point the dispatcher is freed
    /// to process other invocations", §9 "host-side await".
    pub fn resolve_async<F>(&self, request_id: String, fut: F)
    where
        F: std::future::Future<Output = Value> + Send + 'static,
    {
        let tx = self.self_task_tx.clone();
        self.rt.spawn(async move {
            let value = fut.await;
            let (reply_tx, _reply_rx) = oneshot::channel();
            let _ = tx
                .send(DispatchItem {
                    invocation: Invocation::Resume { request_id, value },
                    reply_tx,
                    deadline: Duration::from_secs(5),
                })
                .await;
        });
    }
}

pub struct ServiceInstance {
    pub project_id: String,
    pub phase: Arc<StdMutex<Phase>>,
    pub started_at: i64,
    pub dispatcher: DispatcherHandle,
    pub log_ring: Arc<LogRing>,
    pub scheduler: Arc<Scheduler>,
    pub worker_pool: Arc<WorkerPool>,
    pub actions: Arc<StdMutex<HashMap<String, HandlerId>>>,
    pub degradation: Arc<DegradationCounters>,
    event_sink: Arc<dyn EventSink>,
    cancel_tx: watch::Sender<bool>,
    thread: StdMutex<Option<OsJoinHandle<()>>>,
}

pub struct BootArgs {
    pub project_id: String,
    pub source: VersionSource,
    pub config: InstanceConfig,
    pub event_sink: Arc<dyn EventSink>,
    pub repository: Arc<dyn Repository>,
    pub env: HashMap<String, String>,
}

impl ServiceInstance {
    pub async fn boot(args: BootArgs) -> Result<Arc<ServiceInstance>, RuntimeError> {
        let (task_tx, task_rx) = mpsc::channel(args.config.dispatcher_queue_capacity);
        let dispatcher = DispatcherHandle::new(task_tx.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let degradation = Arc::new(DegradationCounters::default());
        let scheduler = Scheduler::new(dispatcher.clone(), degradation.clone());
        let worker_pool = WorkerPool::with_capacity(dispatcher.clone(), args.config.pool_size, args.config.pool_capacity);
        let log_ring = Arc::new(LogRing::new(args.config.log_ring_capacity));
        let actions = Arc::new(StdMutex::new(HashMap::new()));
        let phase = Arc::new(StdMutex::new(Phase::Initializing));

        let rt = tokio::runtime::Handle::current();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), RuntimeError>>();

        let state = InstanceState {
            rt: rt.clone(),
            project_id: args.project_id.clone(),
            self_task_tx: task_tx,
            task_rx,
            cancel_rx,
            config: args.config.clone(),
            log_ring: log_ring.clone(),
            event_sink: args.event_sink.clone(),
            repository: args.repository.clone(),
            env: Arc::new(args.env),
            scheduler: scheduler.clone(),
            worker_pool: worker_pool.clone(),
            routes: RouteTable::new(),
            handlers: Slab::new(),
            boot_hooks: Vec::new(),
            start_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            actions: actions.clone(),
            degradation: degradation.clone(),
            next_invocation_id: 1,
            current_invocation_id: None,
            current_reply_tx: None,
            pending_invocation: HashMap::new(),
            pending_resolvers: HashMap::new(),
        };

        let source = args.source;
        let max_memory_mb = args.config.max_memory_mb;
        let phase_for_thread = phase.clone();

        let thread = std::thread::Builder::new()
            .name(format!("m3m-instance-{}", args.project_id))
            .spawn(move || {
                run_isolate_thread(state, source, max_memory_mb, phase_for_thread, ready_tx);
            })
            .map_err(|e| RuntimeError::BootFailed(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *phase.lock().unwrap() = Phase::Errored;
                return Err(e);
            }
            Err(_) => {
                *phase.lock().unwrap() = Phase::Errored;
                return Err(RuntimeError::BootFailed("instance thread exited before completing boot".into()));
            }
        }

        *phase.lock().unwrap() = Phase::Running;
        args.event_sink.publish_running(&args.project_id, true);
        scheduler.start();

        Ok(Arc::new(ServiceInstance {
            project_id: args.project_id,
            phase,
            started_at: chrono::Local::now().timestamp_millis(),
            dispatcher,
            log_ring,
            scheduler,
            worker_pool,
            actions,
            degradation,
            event_sink: args.event_sink,
            cancel_tx,
            thread: StdMutex::new(Some(thread)),
        }))
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub async fn handle_request(
        &self,
        method: HttpMethod,
        path: String,
        headers: HashMap<String, String>,
        query: HashMap<String, String>,
        body: Value,
        deadline: Duration,
    ) -> ResponseObject {
        let ctx = RequestContext { method, path, headers, query, params: HashMap::new(), body };
        match self.dispatcher.dispatch(Invocation::Route { handler: usize::MAX, ctx }, deadline).await {
            Ok(InvocationResult::Response(r)) => r,
            Ok(_) => ResponseObject::error(500, "handler produced no response"),
            Err(RuntimeError::NotFound { .. }) => ResponseObject::error(404, "not found"),
            Err(RuntimeError::MethodNotAllowed { .. }) => ResponseObject::error(405, "method not allowed"),
            Err(RuntimeError::Timeout) => ResponseObject::error(500, "timeout"),
            Err(RuntimeError::InstanceStopped) => ResponseObject::error(500, "instance stopped"),
            Err(e) => ResponseObject::error(500, e.to_string()),
        }
    }

    /// Read-only snapshot of the per-instance ring buffer (spec §C: the
    /// admin "read logs" operation collaborates with `m3m-control` this way
    /// rather than the control plane reaching into `LogRing` internals).
    pub fn log_snapshot(&self) -> Vec<m3m_types::log::LogEntry> {
        self.log_ring.snapshot()
    }

    /// How often this instance has shed load rather than failed outright
    /// (spec §C supplement: counters exposed for operator visibility).
    pub fn degradation_snapshot(&self) -> DegradationSnapshot {
        self.degradation.snapshot()
    }

    /// Runs a named `$service.action` entry point, recording `ActionState`
    /// transitions around the call (spec §C: "wraps a callback, records
    /// running/idle/error before/after invocation").
    pub async fn run_action(&self, slug: &str, deadline: Duration) -> Result<InvocationResult, RuntimeError> {
        let handler = *self
            .actions
            .lock()
            .unwrap()
            .get(slug)
            .ok_or_else(|| RuntimeError::UserScriptError(format!("no action registered for slug '{slug}'")))?;

        self.event_sink.publish_action(
            &self.project_id,
            &m3m_types::events::ActionState {
                slug: slug.to_string(),
                state: m3m_types::events::ActionStateKind::Running,
                last_run_at: Some(chrono::Local::now().timestamp_millis()),
                last_error: None,
            },
        );

        let result = self.dispatcher.dispatch(Invocation::Job { handler }, deadline).await;

        let (state, last_error) = match &result {
            Ok(_) => (m3m_types::events::ActionStateKind::Idle, None),
            Err(e) => (m3m_types::events::ActionStateKind::Error, Some(e.to_string())),
        };
        self.event_sink.publish_action(
            &self.project_id,
            &m3m_types::events::ActionState {
                slug: slug.to_string(),
                state,
                last_run_at: Some(chrono::Local::now().timestamp_millis()),
                last_error,
            },
        );

        result
    }

    /// Stop (spec §4.1): flips the cancel flag (interrupting whatever is
    /// currently executing), cancels scheduled jobs, then runs `shutdown`
    /// hooks under `grace`. Ordinary queued items left behind are drained
    /// with `InstanceStopped` by the dispatch loop itself.
    pub async fn stop(&self, grace: Duration) {
        if self.phase() == Phase::Stopped {
            return; // idempotent
        }
        *self.phase.lock().unwrap() = Phase::Stopping;
        let _ = self.cancel_tx.send(true);
        self.scheduler.cancel_all().await;
        self.scheduler.stop();

        let _ = self.dispatcher.dispatch(Invocation::Shutdown, grace).await;

        *self.phase.lock().unwrap() = Phase::Stopped;
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run_isolate_thread(
    state: InstanceState,
    source: VersionSource,
    max_memory_mb: u64,
    phase: Arc<StdMutex<Phase>>,
    ready_tx: oneshot::Sender<Result<(), RuntimeError>>,
) {
    let params = v8::Isolate::create_params().heap_limits(0, (max_memory_mb as usize) * 1024 * 1024);
    let mut isolate = v8::Isolate::new(params);
    isolate.set_microtasks_policy(v8::MicrotasksPolicy::Auto);

    let isolate_handle = isolate.thread_safe_handle();
    let termination_reason = TerminationReasonBox::new();
    isolate.set_slot(termination_reason.clone());
    let interrupt = InterruptController::new(isolate_handle, termination_reason);

    let mut isolate_scope = v8::HandleScope::new(&mut isolate);
    let context = v8::Context::new(&mut isolate_scope);
    let mut context_scope = v8::ContextScope::new(&mut isolate_scope, context);

    let boot_result: GenericResult<()> = (|| {
        let scope = &mut v8::HandleScope::new(&mut context_scope);
        let try_catch = &mut v8::TryCatch::new(scope);
        let scope: &mut v8::HandleScope<'_> = try_catch.as_mut();

        let global = scope.get_current_context().global(scope);
        modules::install_all(scope, &global)?;

        let librt_source = make_string(scope, LIBRT)?;
        let librt = v8::Script::compile(scope, librt_source, None)
            .ok_or_else(|| GenericError::ScriptInitException("librt compilation failed".into()))?;

        let mut compiled_files = Vec::new();
        for file in source.files() {
            let file_source = make_string(scope, &file.code)?;
            let script = v8::Script::compile(scope, file_source, None)
                .ok_or_else(|| GenericError::ScriptInitException(format!("{} failed to compile", file.name)))?;
            compiled_files.push(script);
        }

        scope.set_slot(state);
        try_catch.check_on_init().map_err(|e| GenericError::ScriptInitException(e.display_message()))?;

        librt.run(try_catch.as_mut());
        try_catch.check_on_init().map_err(|e| GenericError::ScriptInitException(e.display_message()))?;

        for script in compiled_files {
            script.run(try_catch.as_mut());
            try_catch.check_on_init().map_err(|e| GenericError::ScriptInitException(e.display_message()))?;
        }
        Ok(())
    })();

    if let Err(e) = boot_result {
        let _ = ready_tx.send(Err(RuntimeError::BootFailed(e.to_string())));
        return;
    }

    *phase.lock().unwrap() = Phase::Booting;

    if let Err(e) = run_lifecycle_hooks(&mut context_scope, HookSet::Boot) {
        let _ = ready_tx.send(Err(RuntimeError::BootFailed(e.to_string())));
        return;
    }
    if let Err(e) = run_lifecycle_hooks(&mut context_scope, HookSet::Start) {
        let _ = ready_tx.send(Err(RuntimeError::BootFailed(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));
    info!("instance ready");

    dispatch_loop(&mut context_scope, &interrupt);
}

enum HookSet {
    Boot,
    Start,
    Shutdown,
}

fn run_lifecycle_hooks(context_scope: &mut v8::ContextScope<v8::HandleScope>, which: HookSet) -> GenericResult<()> {
    let scope = &mut v8::HandleScope::new(context_scope);
    let try_catch = &mut v8::TryCatch::new(scope);
    let scope: &mut v8::HandleScope<'_> = try_catch.as_mut();

    let hooks: Vec<v8::Global<v8::Function>> = {
        let state = InstanceState::get(scope);
        match which {
            HookSet::Boot => state.boot_hooks.clone(),
            HookSet::Start => state.start_hooks.clone(),
            HookSet::Shutdown => state.shutdown_hooks.clone(),
        }
    };
    let recv = v8::undefined(scope);
    for hook in hooks {
        let function = v8::Local::new(scope, &hook);
        function.call(scope, recv.into(), &[]);
        try_catch.check_on_init().map_err(|e| GenericError::ScriptInitException(e.display_message()))?;
    }
    Ok(())
}

/// The dispatcher's main loop (spec §4.2): dequeue, arm interrupt, invoke,
/// reply, disarm. `Shutdown` preempts the normal drain-on-stop behavior.
fn dispatch_loop(context_scope: &mut v8::ContextScope<v8::HandleScope>, interrupt: &InterruptController) {
    loop {
        let (item, already_cancelled, rt, cancel_rx) = {
            let scope = &mut v8::HandleScope::new(&mut *context_scope);
            let state = InstanceState::get(scope);
            let item = match state.task_rx.blocking_recv() {
                Some(item) => item,
                None => break,
            };
            (item, *state.cancel_rx.borrow(), state.rt.clone(), state.cancel_rx.clone())
        };

        let is_shutdown = matches!(item.invocation, Invocation::Shutdown);
        if already_cancelled && !is_shutdown {
            let _ = item.reply_tx.send(Err(RuntimeError::InstanceStopped));
            continue;
        }

        interrupt.reset();
        let deadline_guard = DeadlineGuard::arm(&rt, interrupt.clone(), item.deadline);
        let cancel_guard = if is_shutdown { None } else { Some(CancelGuard::arm(&rt, interrupt.clone(), cancel_rx)) };

        if is_shutdown {
            run_shutdown(context_scope);
            let _ = item.reply_tx.send(Ok(InvocationResult::Unit));
            deadline_guard.disarm();
            drop(cancel_guard);
            break;
        }

        run_invocation(context_scope, item);
        deadline_guard.disarm();
        drop(cancel_guard);
    }

    // Drain anything left with InstanceStopped (spec §4.2 rule 4).
    let scope = &mut v8::HandleScope::new(context_scope);
    let state = InstanceState::get(scope);
    while let Ok(item) = state.task_rx.try_recv() {
        let _ = item.reply_tx.send(Err(RuntimeError::InstanceStopped));
    }
}

fn run_shutdown(context_scope: &mut v8::ContextScope<v8::HandleScope>) {
    if let Err(e) = run_lifecycle_hooks(context_scope, HookSet::Shutdown) {
        warn!("shutdown hook error: {e}");
    }
}

fn run_invocation(context_scope: &mut v8::ContextScope<v8::HandleScope>, item: DispatchItem) {
    let scope = &mut v8::HandleScope::new(context_scope);
    let try_catch = &mut v8::TryCatch::new(scope);
    let scope: &mut v8::HandleScope<'_> = try_catch.as_mut();

    match item.invocation {
        Invocation::Route { ctx, .. } => invoke_route(scope, ctx, item.reply_tx),
        Invocation::Job { handler } => invoke_job(scope, handler, item.reply_tx),
        Invocation::Resume { request_id, value } => invoke_resume(scope, request_id, value, item.reply_tx),
        Invocation::Shutdown => unreachable!("handled in dispatch_loop"),
    }

    if let Err(e) = try_catch.check_on_task() {
        debug!("dispatch loop observed: {}", e.display_message());
    }
}

fn invoke_route(
    scope: &mut v8::HandleScope,
    mut ctx: RequestContext,
    reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
) {
    let resolved = {
        let state = InstanceState::get(scope);
        state.routes.resolve(ctx.method, &ctx.path)
    };
    let matched = match resolved {
        Ok(m) => m,
        Err(e) => {
            let _ = reply_tx.send(Err(e));
            return;
        }
    };
    ctx.params = matched.params;

    let handler = {
        let state = InstanceState::get(scope);
        state.handlers.get(matched.handler).cloned()
    };
    let Some(handler) = handler else {
        let _ = reply_tx.send(Err(RuntimeError::NotFound { method: ctx.method.as_str().into(), path: ctx.path.clone() }));
        return;
    };

    let invocation_id = begin_invocation(scope, reply_tx);
    let function = v8::Local::new(scope, &handler);
    let recv = v8::undefined(scope);
    let arg = native_to_js(scope, &ctx).unwrap_or_else(|_| v8::undefined(scope).into());
    if let Ok(ctx_obj) = v8::Local::<v8::Object>::try_from(arg) {
        let _ = modules::attach_ctx_response(scope, &ctx_obj);
    }
    let ret = function.call(scope, recv.into(), &[arg]);
    settle_or_park(scope, invocation_id, ret, InvocationKind::Route);
}

fn invoke_job(
    scope: &mut v8::HandleScope,
    handler: HandlerId,
    reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
) {
    let handler_fn = {
        let state = InstanceState::get(scope);
        state.handlers.get(handler).cloned()
    };
    let Some(handler_fn) = handler_fn else {
        let _ = reply_tx.send(Ok(InvocationResult::Unit));
        return;
    };
    let invocation_id = begin_invocation(scope, reply_tx);
    let function = v8::Local::new(scope, &handler_fn);
    let recv = v8::undefined(scope);
    let ret = function.call(scope, recv.into(), &[]);
    settle_or_park(scope, invocation_id, ret, InvocationKind::Job);
}

fn invoke_resume(
    scope: &mut v8::HandleScope,
    request_id: String,
    value: Value,
    reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
) {
    let entry = {
        let state = InstanceState::get(scope);
        state.pending_resolvers.remove(&request_id)
    };
    let Some((callback, invocation_id)) = entry else {
        let _ = reply_tx.send(Ok(InvocationResult::Unit));
        return;
    };
    let function = v8::Local::new(scope, &callback);
    let recv = v8::undefined(scope);
    let arg = native_to_js(scope, &value).unwrap_or_else(|_| v8::undefined(scope).into());
    function.call(scope, recv.into(), &[arg]);
    scope.perform_microtask_checkpoint();

    // Acks the resume delivery itself; the original route/job invocation's
    // own reply (if still pending) is sent separately when its promise
    // settles, via the `pending_invocation` entry checked below.
    let _ = reply_tx.send(Ok(InvocationResult::Unit));

    check_pending_settlement(scope, invocation_id);
}

fn begin_invocation(
    scope: &mut v8::HandleScope,
    reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
) -> u64 {
    let state = InstanceState::get(scope);
    let id = state.next_invocation_id;
    state.next_invocation_id += 1;
    state.current_invocation_id = Some(id);
    state.current_reply_tx = Some(reply_tx);
    id
}

/// After calling a handler (or resuming one), checks whether it finished
/// synchronously (plain return, or a promise already settled) and replies;
/// otherwise parks the promise + reply for later settlement (spec §4.8.2).
fn settle_or_park<'s>(
    scope: &mut v8::HandleScope<'s>,
    invocation_id: u64,
    ret: Option<v8::Local<'s, v8::Value>>,
    kind: InvocationKind,
) {
    scope.perform_microtask_checkpoint();

    let reply_tx = {
        let state = InstanceState::get(scope);
        state.current_reply_tx.take()
    };
    let Some(reply_tx) = reply_tx else {
        // A native finalizer (e.g. `ctx.response()`) already claimed and
        // sent the reply during this call.
        return;
    };

    let Some(ret) = ret else {
        // An exception was thrown; the dispatch loop's `check_on_task` logs
        // it. Coerce to a failure reply either way.
        send_result(scope, reply_tx, kind, None);
        return;
    };

    if ret.is_promise() {
        let promise = v8::Local::<v8::Promise>::try_from(ret).expect("checked is_promise");
        match promise.state() {
            v8::PromiseState::Fulfilled => {
                let value = promise.result(scope);
                send_result(scope, reply_tx, kind, Some(value));
            }
            v8::PromiseState::Rejected => {
                send_result(scope, reply_tx, kind, None);
            }
            v8::PromiseState::Pending => {
                let state = InstanceState::get(scope);
                state
                    .pending_invocation
                    .insert(invocation_id, PendingInvocation { promise: v8::Global::new(scope, promise), reply_tx, kind });
            }
        }
    } else {
        send_result(scope, reply_tx, kind, Some(ret));
    }
}

fn check_pending_settlement(scope: &mut v8::HandleScope, invocation_id: u64) {
    let promise_global = {
        let state = InstanceState::get(scope);
        state.pending_invocation.get(&invocation_id).map(|p| p.promise.clone())
    };
    let Some(promise_global) = promise_global else { return };
    let promise = v8::Local::new(scope, &promise_global);
    let settled_state = promise.state();
    if matches!(settled_state, v8::PromiseState::Pending) {
        return; // still awaiting another suspension point
    }
    let value = if matches!(settled_state, v8::PromiseState::Fulfilled) { Some(promise.result(scope)) } else { None };

    let pending = {
        let state = InstanceState::get(scope);
        state.pending_invocation.remove(&invocation_id)
    };
    if let Some(pending) = pending {
        send_result(scope, pending.reply_tx, pending.kind, value);
    }
}

/// Coerces a handler's return value into its `InvocationResult` (spec §4.3:
/// `null`/`undefined` -> 204, a plain object -> `{status, body, headers}`;
/// jobs ignore the value entirely and always settle to `Unit`).
fn send_result<'a>(
    scope: &mut v8::HandleScope<'a>,
    reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
    kind: InvocationKind,
    value: Option<v8::Local<'a, v8::Value>>,
) {
    let result = match kind {
        InvocationKind::Job => Ok(InvocationResult::Unit),
        InvocationKind::Route => match value {
            None => Ok(InvocationResult::Response(ResponseObject::error(500, "unhandled rejection"))),
            Some(v) if v.is_null_or_undefined() => Ok(InvocationResult::Response(ResponseObject::no_content())),
            Some(v) => match crate::bindings::js_to_native::<Value>(scope, v) {
                Ok(json) => Ok(InvocationResult::Response(coerce_response(json))),
                Err(_) => Ok(InvocationResult::Response(ResponseObject::error(500, "response value was not serializable"))),
            },
        },
    };
    let _ = reply_tx.send(result);
}

fn coerce_response(value: Value) -> ResponseObject {
    if let Some(obj) = value.as_object() {
        if obj.contains_key("status") {
            if let Ok(parsed) = serde_json::from_value::<ResponseObject>(value.clone()) {
                return parsed;
            }
        }
    }
    ResponseObject::ok(value)
}
