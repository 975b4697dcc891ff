//! In-memory `Repository`/`VersionSourceLoader` (spec §6: "the runtime does
//! not care about the physical store"). Used by `main.rs` to stand the
//! control plane up without an external database, and by this crate's own
//! tests; a real deployment swaps this for whatever store the host embeds.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use m3m_types::error::RuntimeError;
use m3m_types::project::{Project, ProjectId, ProjectStatus};
use m3m_types::repository::{Repository, VersionSourceLoader};
use m3m_types::version_source::VersionSource;
use serde_json::Value;

pub struct MemoryRepository {
    projects: RwLock<HashMap<ProjectId, Project>>,
    releases: RwLock<HashMap<(ProjectId, String), VersionSource>>,
    branches: RwLock<HashMap<(ProjectId, String), VersionSource>>,
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository {
            projects: RwLock::new(HashMap::new()),
            releases: RwLock::new(HashMap::new()),
            branches: RwLock::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn put_project(&self, project: Project) {
        self.projects.write().unwrap().insert(project.id.clone(), project);
    }

    pub fn put_release(&self, project_id: &str, version: &str, source: VersionSource) {
        self.releases.write().unwrap().insert((project_id.to_string(), version.to_string()), source);
    }

    pub fn put_branch(&self, project_id: &str, branch: &str, source: VersionSource) {
        self.branches.write().unwrap().insert((project_id.to_string(), branch.to_string()), source);
    }
}

#[async_trait]
impl VersionSourceLoader for MemoryRepository {
    async fn load_release(&self, project_id: &ProjectId, version: &str) -> Result<VersionSource, RuntimeError> {
        self.releases
            .read()
            .unwrap()
            .get(&(project_id.clone(), version.to_string()))
            .cloned()
            .ok_or_else(|| RuntimeError::SourceLoadFailed(format!("no release '{version}' for {project_id}")))
    }

    async fn load_branch(&self, project_id: &ProjectId, branch: &str) -> Result<VersionSource, RuntimeError> {
        self.branches
            .read()
            .unwrap()
            .get(&(project_id.clone(), branch.to_string()))
            .cloned()
            .ok_or_else(|| RuntimeError::SourceLoadFailed(format!("no branch '{branch}' for {project_id}")))
    }

    async fn load_active_release(&self, project_id: &ProjectId) -> Result<VersionSource, RuntimeError> {
        let version = self
            .projects
            .read()
            .unwrap()
            .get(project_id)
            .and_then(|p| p.active_release_id.clone())
            .ok_or(RuntimeError::NoActiveRelease)?;
        self.load_release(project_id, &version).await
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, RuntimeError> {
        Ok(self.projects.read().unwrap().get(id).cloned())
    }

    async fn list_autostart_projects(&self) -> Result<Vec<Project>, RuntimeError> {
        Ok(self.projects.read().unwrap().values().filter(|p| p.auto_start).cloned().collect())
    }

    async fn set_project_status(
        &self,
        id: &ProjectId,
        status: ProjectStatus,
        running_source: Option<String>,
        last_error: Option<String>,
    ) -> Result<(), RuntimeError> {
        if let Some(project) = self.projects.write().unwrap().get_mut(id) {
            project.status = status;
            project.running_source = running_source;
            project.last_error = last_error;
        }
        Ok(())
    }

    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, RuntimeError> {
        let docs = self.collections.read().unwrap().get(collection).cloned().unwrap_or_default();
        Ok(docs.into_iter().filter(|d| matches_filter(d, &filter)).collect())
    }

    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>, RuntimeError> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    async fn insert(&self, collection: &str, mut doc: Value) -> Result<Value, RuntimeError> {
        let id = uuid::Uuid::new_v4().to_string();
        if let Value::Object(map) = &mut doc {
            map.insert("id".into(), Value::String(id));
        }
        self.collections.write().unwrap().entry(collection.to_string()).or_default().push(doc.clone());
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Option<Value>, RuntimeError> {
        let mut collections = self.collections.write().unwrap();
        let Some(docs) = collections.get_mut(collection) else { return Ok(None) };
        for doc in docs.iter_mut() {
            if doc_id(doc) == Some(id) {
                merge(doc, &patch);
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, RuntimeError> {
        let mut collections = self.collections.write().unwrap();
        let Some(docs) = collections.get_mut(collection) else { return Ok(false) };
        let before = docs.len();
        docs.retain(|d| doc_id(d) != Some(id));
        Ok(docs.len() != before)
    }

    async fn count(&self, collection: &str, filter: Value) -> Result<u64, RuntimeError> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    async fn upsert(&self, collection: &str, filter: Value, doc: Value) -> Result<Value, RuntimeError> {
        if let Some(existing) = self.find_one(collection, filter).await? {
            if let Some(id) = doc_id(&existing) {
                let id = id.to_string();
                let mut merged = existing.clone();
                merge(&mut merged, &doc);
                return Ok(self.update(collection, &id, merged).await?.unwrap_or(doc));
            }
        }
        self.insert(collection, doc).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Value,
        ops: Value,
        return_new: bool,
    ) -> Result<Option<Value>, RuntimeError> {
        let Some(existing) = self.find_one(collection, filter).await? else { return Ok(None) };
        let Some(id) = doc_id(&existing).map(str::to_string) else { return Ok(None) };
        let before = existing.clone();
        let updated = self.update(collection, &id, ops).await?;
        Ok(if return_new { updated } else { Some(before) })
    }
}

fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("id").and_then(Value::as_str)
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(t), Value::Object(p)) = (target, patch) {
        for (k, v) in p {
            t.insert(k.clone(), v.clone());
        }
    }
}

fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let Value::Object(filter) = filter else { return true };
    let Value::Object(doc) = doc else { return filter.is_empty() };
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}
