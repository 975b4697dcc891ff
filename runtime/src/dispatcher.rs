//! The single-consumer dispatcher queue described in spec §4.2. External
//! goroutines (router, scheduler, worker pool, UI broker resumes) never
//! touch the isolate; they send a `DispatchItem` down this channel and
//! await its reply.

use std::time::Duration;

use m3m_types::error::RuntimeError;
use m3m_types::route::{RequestContext, ResponseObject};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Opaque handle into an instance's handler tables (spec §9: "reference
/// handler capabilities by opaque handle").
pub type HandlerId = usize;

#[derive(Debug)]
pub enum Invocation {
    Route { handler: HandlerId, ctx: RequestContext },
    Job { handler: HandlerId },
    /// Resumes a suspended `$ui`/`$http`/`$delayed` call with the value it
    /// was awaiting (spec §4.8, §9 "host-side await"). `request_id` is the
    /// id the suspending native call generated.
    Resume { request_id: String, value: Value },
    /// Runs the registered `$service.shutdown` hooks, bypassing the normal
    /// queue-drain-on-stop behavior (spec §4.1, §4.2 rule 4).
    Shutdown,
}

#[derive(Debug)]
pub enum InvocationResult {
    Response(ResponseObject),
    Unit,
    Value(Value),
}

pub struct DispatchItem {
    pub invocation: Invocation,
    pub reply_tx: oneshot::Sender<Result<InvocationResult, RuntimeError>>,
    pub deadline: Duration,
}

/// Clonable, `Send` handle other components hold; the isolate itself stays
/// on its dedicated thread and is never exposed outside `instance.rs`.
#[derive(Clone)]
pub struct DispatcherHandle {
    task_tx: mpsc::Sender<DispatchItem>,
}

impl DispatcherHandle {
    pub fn new(task_tx: mpsc::Sender<DispatchItem>) -> Self {
        DispatcherHandle { task_tx }
    }

    pub async fn dispatch(
        &self,
        invocation: Invocation,
        deadline: Duration,
    ) -> Result<InvocationResult, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let item = DispatchItem { invocation, reply_tx, deadline };
        if self.task_tx.send(item).await.is_err() {
            return Err(RuntimeError::InstanceStopped);
        }
        match reply_rx.await {
            Ok(result) => result,
            // The isolate thread dropped the reply sender without answering:
            // it terminated without completing the invocation.
            Err(_) => Err(RuntimeError::InstanceStopped),
        }
    }

    /// Non-blocking admission used by the scheduler (spec §4.4: "if the VM
    /// dispatcher queue cannot accept it within a bounded time... dropped").
    pub async fn try_dispatch_within(
        &self,
        invocation: Invocation,
        deadline: Duration,
        admission_timeout: Duration,
    ) -> Result<InvocationResult, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let item = DispatchItem { invocation, reply_tx, deadline };
        match tokio::time::timeout(admission_timeout, self.task_tx.send(item)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(RuntimeError::InstanceStopped),
            Err(_) => return Err(RuntimeError::QueueFull),
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::InstanceStopped),
        }
    }
}
