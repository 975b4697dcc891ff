//! V8-boundary error types, adapted from the teacher's `error.rs` (inferred
//! from its usage in `executor.rs`: `GenericError`, `JsError`/`JsErrorKind`,
//! `TryCatch::check_on_init`/`check_on_task`, `TerminationReason`).

use std::sync::{Arc, Mutex};

use m3m_types::error::RuntimeError;

pub use m3m_types::error::{GenericError, GenericResult};

pub type JsResult<T> = Result<T, JsError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsErrorKind {
    Error,
    TypeError,
    RangeError,
}

/// An exception caught from the isolate, or a host-initiated termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsError {
    pub kind: JsErrorKind,
    pub message: Option<String>,
    pub termination: Option<TerminationReason>,
}

impl JsError {
    pub fn new(kind: JsErrorKind, message: Option<String>) -> Self {
        JsError { kind, message, termination: None }
    }

    pub fn terminated(reason: TerminationReason) -> Self {
        JsError { kind: JsErrorKind::Error, message: None, termination: Some(reason) }
    }

    /// Termination reasons (timeout, stop, memory limit) end the instance's
    /// current invocation loop entirely; a plain script exception does not.
    pub fn terminates_worker(&self) -> bool {
        self.termination.is_some()
    }

    pub fn display_message(&self) -> String {
        if let Some(reason) = &self.termination {
            format!("{reason}")
        } else {
            self.message.clone().unwrap_or_else(|| "unknown script error".into())
        }
    }
}

impl std::fmt::Display for JsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_message())
    }
}

impl From<JsError> for RuntimeError {
    fn from(e: JsError) -> Self {
        match &e.termination {
            Some(TerminationReason::Timeout) => RuntimeError::Timeout,
            Some(TerminationReason::Stopped) => RuntimeError::InstanceStopped,
            Some(TerminationReason::MemoryLimit) => RuntimeError::Interrupted("memory limit".into()),
            Some(TerminationReason::Unknown) | None => RuntimeError::UserScriptError(e.display_message()),
        }
    }
}

/// Why the isolate's current execution was (or will be) terminated. Set by
/// the interrupt controller from another thread, observed by the isolate's
/// own thread at the next safepoint via `TerminationReasonBox`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Unknown,
    Timeout,
    Stopped,
    MemoryLimit,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminationReason::Unknown => "unknown",
            TerminationReason::Timeout => "timeout",
            TerminationReason::Stopped => "stopped",
            TerminationReason::MemoryLimit => "memory limit",
        };
        write!(f, "{s}")
    }
}

/// Slot installed on the isolate so the near-heap-limit callback and the
/// interrupt callback can record *why* `terminate_execution()` was called;
/// `rusty_v8` itself only tells user code that execution was interrupted,
/// not the reason, so the reason has to travel out-of-band like this.
#[derive(Clone)]
pub struct TerminationReasonBox(pub Arc<Mutex<TerminationReason>>);

impl TerminationReasonBox {
    pub fn new() -> Self {
        TerminationReasonBox(Arc::new(Mutex::new(TerminationReason::Unknown)))
    }

    pub fn set(&self, reason: TerminationReason) {
        *self.0.lock().unwrap() = reason;
    }

    pub fn get(&self) -> TerminationReason {
        *self.0.lock().unwrap()
    }
}

impl Default for TerminationReasonBox {
    fn default() -> Self {
        Self::new()
    }
}
