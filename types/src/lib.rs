//! Shared types for the M3M service runtime and its control plane.
//!
//! Mirrors the split the teacher runtime expects from its own `rusty-workers`
//! types crate: small, serde-friendly structs with no V8 or tokio
//! dependency, so both `m3m-runtime` and `m3m-control` can share them
//! without pulling either's heavyweight deps into the other.

pub mod error;
pub mod events;
pub mod job;
pub mod log;
pub mod project;
pub mod repository;
pub mod route;
pub mod version_source;

pub use error::{GenericError, GenericResult, RuntimeError};
pub use events::{ActionState, ServerMessage, Topic, UiDialogType, UiRequest};
pub use job::{JobKind, JobSnapshot, JobStatus};
pub use log::{LogEntry, LogLevel};
pub use project::{Project, ProjectId, ProjectStatus};
pub use repository::{Repository, VersionSourceLoader};
pub use route::{HttpMethod, RequestContext, ResponseObject};
pub use version_source::{SourceFile, VersionSource};
