//! Control-plane error types (spec §7 extended to manager/bus/hub concerns).
//! `thiserror` here, same as the runtime crate; `anyhow` is reserved for
//! `main.rs`'s process-boundary glue, mirroring how the teacher splits
//! `rusty-workers-runtime` (thiserror) from `rusty-workers-playground-api`
//! (anyhow at the edges).

use m3m_types::error::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("no project with id '{0}'")]
    UnknownProject(String),
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("authentication failed")]
    Unauthenticated,
    #[error("malformed client message: {0}")]
    MalformedMessage(String),
    #[error(transparent)]
    Manager(#[from] ManagerError),
}
