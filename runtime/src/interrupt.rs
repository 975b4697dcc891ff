//! Interrupt Controller (spec §4.5): bounds a VM invocation by wall-clock
//! deadline and by admin-initiated cancellation. Grounded on the teacher's
//! `isolate.thread_safe_handle()` / `terminate_execution()` pairing in
//! `executor.rs`, generalized into a reusable controller the dispatcher
//! arms once per invocation instead of hand-rolling a timer per call site.

use std::time::Duration;

use rusty_v8 as v8;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{TerminationReason, TerminationReasonBox};

/// Thread-safe capability to terminate the isolate's current execution from
/// any goroutine, plus the out-of-band reason slot V8 itself does not carry.
#[derive(Clone)]
pub struct InterruptController {
    isolate_handle: v8::IsolateHandle,
    termination_reason: TerminationReasonBox,
}

impl InterruptController {
    pub fn new(isolate_handle: v8::IsolateHandle, termination_reason: TerminationReasonBox) -> Self {
        InterruptController { isolate_handle, termination_reason }
    }

    pub fn interrupt(&self, reason: TerminationReason) {
        self.termination_reason.set(reason);
        self.isolate_handle.terminate_execution();
    }

    /// Clears interrupt state so the isolate is reusable for the next
    /// invocation (spec §4.5 "After the invocation returns, both hooks are
    /// disarmed and the interrupt state cleared").
    pub fn reset(&self) {
        self.isolate_handle.cancel_terminate_execution();
        self.termination_reason.set(TerminationReason::Unknown);
    }

    pub fn reason(&self) -> TerminationReason {
        self.termination_reason.get()
    }
}

/// A timer armed for the duration of one invocation. Disarm it once the
/// invocation's reply is in hand so a late timer doesn't interrupt the
/// isolate's *next* invocation.
pub struct DeadlineGuard {
    disarm_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DeadlineGuard {
    /// `rt` is the instance's stored `tokio::runtime::Handle` (the isolate
    /// loop itself runs on a dedicated blocking thread, not inside a Tokio
    /// task, so it must reach across via the handle the way the teacher's
    /// `state.rt.spawn(io_processor.run(io_scope))` does).
    pub fn arm(rt: &tokio::runtime::Handle, controller: InterruptController, deadline: Duration) -> Self {
        let (disarm_tx, mut disarm_rx) = oneshot::channel();
        let task = rt.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    controller.interrupt(TerminationReason::Timeout);
                }
                _ = &mut disarm_rx => {}
            }
        });
        DeadlineGuard { disarm_tx: Some(disarm_tx), task }
    }

    pub fn disarm(mut self) {
        if let Some(tx) = self.disarm_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        // Dropping without an explicit disarm() still stops the timer task
        // once the sender side of the oneshot is dropped with it.
        self.task.abort();
    }
}

/// Listens for the instance-wide stop/restart signal and interrupts the
/// isolate the moment it fires, for as long as the guard is alive.
pub struct CancelGuard {
    task: JoinHandle<()>,
}

impl CancelGuard {
    pub fn arm(rt: &tokio::runtime::Handle, controller: InterruptController, mut cancel_rx: watch::Receiver<bool>) -> Self {
        let task = rt.spawn(async move {
            loop {
                if *cancel_rx.borrow() {
                    controller.interrupt(TerminationReason::Stopped);
                    return;
                }
                if cancel_rx.changed().await.is_err() {
                    return;
                }
            }
        });
        CancelGuard { task }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
