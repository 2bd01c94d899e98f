//! Read-side loads. Server lists replace the confirmed cache entries; optimistic
//! entries of mutations still in flight are kept.

use taskdeck_common::{Attachment, EntityId, EntityKind, Project, Task, User};
use tracing::debug;

use super::{MutationCoordinator, lock, server_id};
use crate::errors::MutationError;

impl MutationCoordinator {
    /// Load the project list. Returns the cached list afterwards, pending entries included.
    pub async fn load_projects(&self) -> Result<Vec<Project>, MutationError> {
        let projects = self.api.projects().await?;
        let mut cache = lock(&self.cache);
        cache.load_projects(projects);
        Ok(cache.projects().into_iter().cloned().collect())
    }

    pub async fn load_project(&self, id: &EntityId) -> Result<Project, MutationError> {
        let sid = server_id(EntityKind::Project, id)?;
        let project = self.api.project(sid).await?;
        let mut cache = lock(&self.cache);
        cache.load_project(project.clone());
        Ok(cache.project(id).cloned().unwrap_or(project))
    }

    pub async fn load_tasks(&self, project_id: &EntityId) -> Result<Vec<Task>, MutationError> {
        let sid = server_id(EntityKind::Project, project_id)?;
        let records = self.api.tasks_by_project(sid).await?;
        debug!(project = %project_id, count = records.len(), "Fetched tasks");
        let mut cache = lock(&self.cache);
        cache.load_tasks(project_id, records);
        Ok(cache.tasks(project_id).into_iter().cloned().collect())
    }

    pub async fn load_attachments(&self, task_id: &EntityId) -> Result<Vec<Attachment>, MutationError> {
        let sid = server_id(EntityKind::Task, task_id)?;
        let attachments = self
            .api
            .attachments_by_task(sid)
            .await?
            .into_iter()
            .map(|a| a.into_attachment(task_id.clone()))
            .collect();
        let mut cache = lock(&self.cache);
        cache.load_attachments(task_id, attachments);
        Ok(cache.attachments(task_id).into_iter().cloned().collect())
    }

    pub async fn load_users(&self) -> Result<Vec<User>, MutationError> {
        let users = self.api.users().await?;
        lock(&self.cache).load_users(users.clone());
        Ok(users)
    }
}
