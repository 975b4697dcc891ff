use serde::{Deserialize, Serialize};

pub type ProjectId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Stopped,
    Running,
    Error,
}

/// Entity described in spec §3: `{id, slug, status, auto_start,
/// active_release_id?, running_source?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub slug: String,
    pub status: ProjectStatus,
    pub auto_start: bool,
    pub active_release_id: Option<String>,
    /// `"release:<version>"` or `"debug:<branch-name>"` while running, absent
    /// when stopped.
    pub running_source: Option<String>,
    /// Populated when `status == Error`; the boot failure message, persisted
    /// per §4.1 "Error semantics".
    pub last_error: Option<String>,
}

impl Project {
    pub fn running_source_label(kind: RunningSourceKind, name: &str) -> String {
        match kind {
            RunningSourceKind::Release => format!("release:{name}"),
            RunningSourceKind::Branch => format!("debug:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningSourceKind {
    Release,
    Branch,
}

/// What the caller asked `ServiceManager::Start`/`Restart` to run, before
/// resolution against the repository (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHint {
    Release(String),
    Branch(String),
    /// Use the project's `active_release_id`.
    ActiveRelease,
}

impl SourceHint {
    pub fn parse(hint: &str) -> Option<Self> {
        if let Some(branch) = hint.strip_prefix("debug:") {
            Some(SourceHint::Branch(branch.to_string()))
        } else if let Some(version) = hint.strip_prefix("release:") {
            Some(SourceHint::Release(version.to_string()))
        } else {
            None
        }
    }
}
