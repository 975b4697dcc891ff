//! Service Manager (spec §4.1): resolves what should be running per project
//! and maintains that invariant. Mirrors the teacher's playground-api
//! instance registry, generalized from a single global table to the
//! per-project-locked Start/Stop/Restart/Get/Autostart surface spec'd here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use m3m_types::events::ActionStateKind;
use m3m_types::project::{Project, ProjectId, ProjectStatus, SourceHint};
use m3m_types::repository::{Repository, VersionSourceLoader};
use m3m_types::version_source::VersionSource;
use m3m_runtime::{BootArgs, EventSink, InstanceConfig, Phase, ServiceInstance};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;

use crate::error::ManagerError;

/// Per-project serialization: `Start`/`Stop`/`Restart` acquire this lock;
/// `Get` is a lock-free read of the registry (spec §4.1 "atomic pointer").
type ProjectLock = Arc<AsyncMutex<()>>;

pub struct ServiceManager {
    instances: RwLock<HashMap<ProjectId, Arc<ServiceInstance>>>,
    locks: RwLock<HashMap<ProjectId, ProjectLock>>,
    repository: Arc<dyn Repository>,
    loader: Arc<dyn VersionSourceLoader>,
    event_sink: Arc<dyn EventSink>,
    config: InstanceConfig,
    shutdown_grace: Duration,
}

impl ServiceManager {
    pub fn new(
        repository: Arc<dyn Repository>,
        loader: Arc<dyn VersionSourceLoader>,
        event_sink: Arc<dyn EventSink>,
        config: InstanceConfig,
    ) -> Arc<Self> {
        let shutdown_grace = config.shutdown_grace();
        Arc::new(ServiceManager {
            instances: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
            repository,
            loader,
            event_sink,
            config,
            shutdown_grace,
        })
    }

    async fn project_lock(&self, project_id: &ProjectId) -> ProjectLock {
        if let Some(lock) = self.locks.read().await.get(project_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(project_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Lock-free read of the running-instance registry (spec §4.1 `Get`).
    pub async fn get(&self, project_id: &ProjectId) -> Option<Arc<ServiceInstance>> {
        self.instances.read().await.get(project_id).cloned()
    }

    async fn resolve_source(&self, project: &Project, hint: Option<&str>) -> Result<VersionSource, ManagerError> {
        let hint = match hint.and_then(SourceHint::parse) {
            Some(h) => h,
            None => SourceHint::ActiveRelease,
        };
        match hint {
            SourceHint::Branch(name) => Ok(self.loader.load_branch(&project.id, &name).await?),
            SourceHint::Release(version) => Ok(self.loader.load_release(&project.id, &version).await?),
            SourceHint::ActiveRelease => {
                if project.active_release_id.is_none() {
                    return Err(m3m_types::error::RuntimeError::NoActiveRelease.into());
                }
                Ok(self.loader.load_active_release(&project.id).await?)
            }
        }
    }

    /// `Start(project_id, source_hint?)` (spec §4.1). Returns the existing
    /// instance if one is already running; otherwise resolves source,
    /// boots, and persists the resulting status.
    pub async fn start(&self, project_id: &ProjectId, source_hint: Option<&str>) -> Result<Arc<ServiceInstance>, ManagerError> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.instances.read().await.get(project_id) {
            return Ok(existing.clone());
        }

        let project = self
            .repository
            .get_project(project_id)
            .await?
            .ok_or_else(|| ManagerError::UnknownProject(project_id.clone()))?;

        let source = match self.resolve_source(&project, source_hint).await {
            Ok(s) => s,
            Err(e) => {
                self.persist_error(project_id, &e).await;
                return Err(e);
            }
        };
        let label = source.label();

        let boot_result = ServiceInstance::boot(BootArgs {
            project_id: project_id.clone(),
            source,
            config: self.config.clone(),
            event_sink: self.event_sink.clone(),
            repository: self.repository.clone(),
            env: HashMap::new(),
        })
        .await;

        match boot_result {
            Ok(instance) => {
                self.instances.write().await.insert(project_id.clone(), instance.clone());
                let _ = self
                    .repository
                    .set_project_status(project_id, ProjectStatus::Running, Some(label), None)
                    .await;
                info!("project {project_id} started");
                Ok(instance)
            }
            Err(e) => {
                error!("project {project_id} failed to boot: {e}");
                let e = ManagerError::Runtime(e);
                self.persist_error(project_id, &e).await;
                Err(e)
            }
        }
    }

    async fn persist_error(&self, project_id: &ProjectId, e: &ManagerError) {
        let _ = self
            .repository
            .set_project_status(project_id, ProjectStatus::Error, None, Some(e.to_string()))
            .await;
    }

    /// `Stop(project_id)` (spec §4.1). Idempotent: absent project is a no-op.
    pub async fn stop(&self, project_id: &ProjectId) -> Result<(), ManagerError> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let instance = self.instances.write().await.remove(project_id);
        if let Some(instance) = instance {
            instance.stop(self.shutdown_grace).await;
            self.event_sink.publish_running(project_id, false);
            let _ = self.repository.set_project_status(project_id, ProjectStatus::Stopped, None, None).await;
            info!("project {project_id} stopped");
        }
        Ok(())
    }

    /// `Restart(project_id, source_hint?)`: Stop then Start, serialized
    /// under the SAME per-project lock so no other Start/Stop interleaves.
    pub async fn restart(&self, project_id: &ProjectId, source_hint: Option<&str>) -> Result<Arc<ServiceInstance>, ManagerError> {
        self.stop(project_id).await?;
        self.start(project_id, source_hint).await
    }

    /// `Autostart()`: on process boot, starts every project with
    /// `auto_start=true` and an `active_release_id` (spec §4.1).
    pub async fn autostart(self: &Arc<Self>) {
        let candidates = match self.repository.list_autostart_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                error!("autostart scan failed: {e}");
                return;
            }
        };
        for project in candidates {
            if project.active_release_id.is_none() {
                continue;
            }
            if let Err(e) = self.start(&project.id, None).await {
                warn!("autostart failed for {}: {e}", project.id);
            }
        }
    }

    /// Triggers a `$service.action` by slug (spec §C). `ActionStateKind`
    /// transitions are published by `ServiceInstance::run_action` itself.
    pub async fn run_action(&self, project_id: &ProjectId, slug: &str) -> Result<ActionStateKind, ManagerError> {
        let instance = self.get(project_id).await.ok_or_else(|| ManagerError::UnknownProject(project_id.clone()))?;
        match instance.run_action(slug, self.config.job_deadline()).await {
            Ok(_) => Ok(ActionStateKind::Idle),
            Err(e) => Err(ManagerError::Runtime(e)),
        }
    }

    pub async fn list_running(&self) -> Vec<ProjectId> {
        self.instances.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m3m_runtime::NullEventSink;

    struct EmptyRepository;

    #[async_trait::async_trait]
    impl Repository for EmptyRepository {
        async fn get_project(&self, _id: &ProjectId) -> Result<Option<Project>, m3m_types::error::RuntimeError> {
            Ok(None)
        }
        async fn list_autostart_projects(&self) -> Result<Vec<Project>, m3m_types::error::RuntimeError> {
            Ok(Vec::new())
        }
        async fn set_project_status(
            &self,
            _id: &ProjectId,
            _status: ProjectStatus,
            _running_source: Option<String>,
            _last_error: Option<String>,
        ) -> Result<(), m3m_types::error::RuntimeError> {
            Ok(())
        }
        async fn find(&self, _c: &str, _f: serde_json::Value) -> Result<Vec<serde_json::Value>, m3m_types::error::RuntimeError> {
            Ok(Vec::new())
        }
        async fn find_one(&self, _c: &str, _f: serde_json::Value) -> Result<Option<serde_json::Value>, m3m_types::error::RuntimeError> {
            Ok(None)
        }
        async fn insert(&self, _c: &str, doc: serde_json::Value) -> Result<serde_json::Value, m3m_types::error::RuntimeError> {
            Ok(doc)
        }
        async fn update(&self, _c: &str, _id: &str, _patch: serde_json::Value) -> Result<Option<serde_json::Value>, m3m_types::error::RuntimeError> {
            Ok(None)
        }
        async fn delete(&self, _c: &str, _id: &str) -> Result<bool, m3m_types::error::RuntimeError> {
            Ok(false)
        }
        async fn count(&self, _c: &str, _f: serde_json::Value) -> Result<u64, m3m_types::error::RuntimeError> {
            Ok(0)
        }
        async fn upsert(&self, _c: &str, _f: serde_json::Value, doc: serde_json::Value) -> Result<serde_json::Value, m3m_types::error::RuntimeError> {
            Ok(doc)
        }
        async fn find_one_and_update(
            &self,
            _c: &str,
            _f: serde_json::Value,
            _ops: serde_json::Value,
            _return_new: bool,
        ) -> Result<Option<serde_json::Value>, m3m_types::error::RuntimeError> {
            Ok(None)
        }
    }

    struct EmptyLoader;

    #[async_trait::async_trait]
    impl VersionSourceLoader for EmptyLoader {
        async fn load_release(&self, _p: &ProjectId, _v: &str) -> Result<VersionSource, m3m_types::error::RuntimeError> {
            Err(m3m_types::error::RuntimeError::SourceLoadFailed("not implemented".into()))
        }
        async fn load_branch(&self, _p: &ProjectId, _b: &str) -> Result<VersionSource, m3m_types::error::RuntimeError> {
            Err(m3m_types::error::RuntimeError::SourceLoadFailed("not implemented".into()))
        }
        async fn load_active_release(&self, _p: &ProjectId) -> Result<VersionSource, m3m_types::error::RuntimeError> {
            Err(m3m_types::error::RuntimeError::SourceLoadFailed("not implemented".into()))
        }
    }

    #[tokio::test]
    async fn start_unknown_project_errors() {
        let manager = ServiceManager::new(
            Arc::new(EmptyRepository),
            Arc::new(EmptyLoader),
            Arc::new(NullEventSink),
            InstanceConfig::default(),
        );
        let err = manager.start(&"missing".to_string(), None).await.unwrap_err();
        assert!(matches!(err, ManagerError::UnknownProject(_)));
    }

    #[tokio::test]
    async fn stop_absent_project_is_noop() {
        let manager = ServiceManager::new(
            Arc::new(EmptyRepository),
            Arc::new(EmptyLoader),
            Arc::new(NullEventSink),
            InstanceConfig::default(),
        );
        manager.stop(&"missing".to_string()).await.unwrap();
    }
}
