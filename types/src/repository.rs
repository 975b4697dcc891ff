//! Collaborator contracts (spec §6). The runtime depends only on these
//! traits; the document store, admin surface, auth, etc. are out of scope
//! and implemented by whatever the host embeds.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RuntimeError;
use crate::project::{Project, ProjectId};
use crate::version_source::VersionSource;

/// Loads the ordered file list for a release or branch. Consumed by the
/// Service Manager when resolving what to boot (spec §4.1, §6).
#[async_trait]
pub trait VersionSourceLoader: Send + Sync {
    async fn load_release(&self, project_id: &ProjectId, version: &str) -> Result<VersionSource, RuntimeError>;
    async fn load_branch(&self, project_id: &ProjectId, branch: &str) -> Result<VersionSource, RuntimeError>;
    async fn load_active_release(&self, project_id: &ProjectId) -> Result<VersionSource, RuntimeError>;
}

/// CRUD over a named logical collection scoped by project (spec §4.9,
/// `$database.collection(name)`), and the project-record access the Service
/// Manager needs (read status fields, persist boot failures, list
/// autostart candidates).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, RuntimeError>;
    async fn list_autostart_projects(&self) -> Result<Vec<Project>, RuntimeError>;
    async fn set_project_status(
        &self,
        id: &ProjectId,
        status: crate::project::ProjectStatus,
        running_source: Option<String>,
        last_error: Option<String>,
    ) -> Result<(), RuntimeError>;

    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, RuntimeError>;
    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>, RuntimeError>;
    async fn insert(&self, collection: &str, doc: Value) -> Result<Value, RuntimeError>;
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Option<Value>, RuntimeError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, RuntimeError>;
    async fn count(&self, collection: &str, filter: Value) -> Result<u64, RuntimeError>;
    async fn upsert(&self, collection: &str, filter: Value, doc: Value) -> Result<Value, RuntimeError>;
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Value,
        ops: Value,
        return_new: bool,
    ) -> Result<Option<Value>, RuntimeError>;
}

/// The model-collection naming convention of spec §6.
pub fn collection_name(project_id: &str, slug: &str) -> String {
    format!("data_{project_id}_{slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_naming_convention() {
        assert_eq!(collection_name("p1", "todos"), "data_p1_todos");
    }
}
