//! Error taxonomy of spec §7, shared by runtime and control plane.

use thiserror::Error;

/// Everything that can go wrong while resolving, booting, dispatching into,
/// or tearing down a service instance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("no route matches {method} {path}")]
    NotFound { method: String, path: String },

    #[error("{method} is not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("boot failed: {0}")]
    BootFailed(String),

    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error("invocation exceeded its deadline")]
    Timeout,

    #[error("instance stopped before the invocation completed")]
    InstanceStopped,

    #[error("invocation interrupted: {0}")]
    Interrupted(String),

    #[error("dispatcher queue is full")]
    QueueFull,

    #[error("worker pool is saturated")]
    PoolSaturated,

    #[error("invalid schedule expression: {0}")]
    InvalidExpression(String),

    #[error("uncaught error in user script: {0}")]
    UserScriptError(String),

    #[error("UI request cancelled")]
    UiRequestCancelled,

    #[error("failed to load version source: {0}")]
    SourceLoadFailed(String),

    #[error("project has no active release")]
    NoActiveRelease,

    #[error("an instance for this project is already running")]
    AlreadyRunning,

    #[error("no instance is running for this project")]
    NotRunning,
}

/// Catch-all error used by the host-module/V8-boundary code, the same role
/// `rusty-workers-runtime`'s `GenericError` plays around `executor.rs`.
#[derive(Debug, Error)]
pub enum GenericError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("script initialization failed: {0}")]
    ScriptInitException(String),

    #[error("{0}")]
    Other(String),
}

pub type GenericResult<T> = Result<T, GenericError>;
