//! The facade a UI layer talks to.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use taskdeck_common::{
    Attachment, CreateProjectInput, CreateTaskInput, EntityId, LoginInput, Project, RegisterInput,
    Task, UpdateProjectInput, UpdateTaskInput, User,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::api::{RemoteApi, attachment_from_path};
use crate::config::ClientConfig;
use crate::coordinator::{MutationCoordinator, PendingMutation};
use crate::errors::{ApiError, MutationError};
use crate::session::{SessionEvent, SessionManager};
use crate::storage::{FileTokenStore, TokenStore};
use crate::transport::{
    HttpDispatcher, HttpTokenTransport, RequestDispatcher, TokenTransport, build_http_client,
};

pub struct Client {
    config: ClientConfig,
    session: Arc<SessionManager>,
    coordinator: Arc<MutationCoordinator>,
}

impl Client {
    /// Build an HTTP client for `config`, persisting the session in the token file.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(&config)?;
        let dispatcher = Arc::new(HttpDispatcher::new(http.clone(), config.clone()));
        let transport = Arc::new(HttpTokenTransport::new(http, config.clone()));
        let token_file = config.token_file_path()?;
        let store = FileTokenStore::open(&token_file)
            .with_context(|| format!("Failed to open token store: {}", token_file.display()))?;
        info!(api_url = %config.api_url, protocol = %config.protocol, "Client ready");
        Ok(Self::with_parts(config, dispatcher, transport, Arc::new(store)))
    }

    /// Assemble a client from its seams.
    pub fn with_parts(
        config: ClientConfig,
        dispatcher: Arc<dyn RequestDispatcher>,
        transport: Arc<dyn TokenTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let session = Arc::new(SessionManager::new(dispatcher, transport, store));
        let api = Arc::new(RemoteApi::new(session.clone(), config.protocol));
        let coordinator = Arc::new(MutationCoordinator::new(api, session.clone()));
        Self {
            config,
            session,
            coordinator,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<MutationCoordinator> {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.session.identity()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    // ── Session ──────────────────────────────────────────────────────

    /// Sign in and start from an empty cache.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let user = self
            .session
            .login(&LoginInput {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.coordinator.reset_cache();
        Ok(user)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let user = self
            .session
            .register(&RegisterInput {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.coordinator.reset_cache();
        Ok(user)
    }

    pub async fn logout(&self) {
        self.session.logout().await;
        self.coordinator.reset_cache();
    }

    /// Silent refresh, e.g. at startup with a persisted session.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.session.refresh().await
    }

    // ── Hydration ────────────────────────────────────────────────────

    pub async fn load_projects(&self) -> Result<Vec<Project>, MutationError> {
        self.coordinator.load_projects().await
    }

    pub async fn load_project(&self, id: &EntityId) -> Result<Project, MutationError> {
        self.coordinator.load_project(id).await
    }

    pub async fn load_tasks(&self, project_id: &EntityId) -> Result<Vec<Task>, MutationError> {
        self.coordinator.load_tasks(project_id).await
    }

    pub async fn load_attachments(&self, task_id: &EntityId) -> Result<Vec<Attachment>, MutationError> {
        self.coordinator.load_attachments(task_id).await
    }

    pub async fn load_users(&self) -> Result<Vec<User>, MutationError> {
        self.coordinator.load_users().await
    }

    // ── Mutations ────────────────────────────────────────────────────

    pub async fn create_project(&self, input: CreateProjectInput) -> Result<Project, MutationError> {
        self.coordinator.create_project(input).await
    }

    pub async fn update_project(
        &self,
        id: &EntityId,
        input: UpdateProjectInput,
    ) -> Result<Project, MutationError> {
        self.coordinator.update_project(id, input).await
    }

    pub async fn delete_project(&self, id: &EntityId) -> Result<(), MutationError> {
        self.coordinator.delete_project(id).await
    }

    pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task, MutationError> {
        self.coordinator.create_task(input).await
    }

    pub async fn update_task(&self, id: &EntityId, input: UpdateTaskInput) -> Result<Task, MutationError> {
        self.coordinator.update_task(id, input).await
    }

    pub async fn delete_task(&self, id: &EntityId) -> Result<(), MutationError> {
        self.coordinator.delete_task(id).await
    }

    /// Read files from disk and upload them to a task.
    pub async fn upload_files(&self, task_id: &EntityId, paths: &[&Path]) -> Result<Vec<Attachment>> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(attachment_from_path(path).await?);
        }
        self.coordinator
            .upload_attachments(task_id, files)
            .await
            .context("Failed to upload attachments")
    }

    pub async fn delete_attachment(&self, id: &EntityId) -> Result<(), MutationError> {
        self.coordinator.delete_attachment(id).await
    }

    // ── Cache readers ────────────────────────────────────────────────

    pub fn projects(&self) -> Vec<Project> {
        self.coordinator
            .read(|c| c.projects().into_iter().cloned().collect())
    }

    pub fn project(&self, id: &EntityId) -> Option<Project> {
        self.coordinator.read(|c| c.project(id).cloned())
    }

    pub fn tasks(&self, project_id: &EntityId) -> Vec<Task> {
        self.coordinator
            .read(|c| c.tasks(project_id).into_iter().cloned().collect())
    }

    pub fn task(&self, id: &EntityId) -> Option<Task> {
        self.coordinator.read(|c| c.task(id).cloned())
    }

    pub fn attachments(&self, task_id: &EntityId) -> Vec<Attachment> {
        self.coordinator
            .read(|c| c.attachments(task_id).into_iter().cloned().collect())
    }

    pub fn users(&self) -> Vec<User> {
        self.coordinator.read(|c| c.users().to_vec())
    }

    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.coordinator.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::storage::TOKEN_KEY;

    #[tokio::test]
    async fn from_config_picks_up_persisted_token() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("session.json");
        FileTokenStore::open(&token_file)
            .unwrap()
            .set(TOKEN_KEY, "persisted")
            .unwrap();

        let client = Client::from_config(ClientConfig {
            token_file: Some(token_file),
            protocol: Protocol::Rest,
            ..ClientConfig::default()
        })
        .unwrap();

        assert_eq!(client.session().access_token().as_deref(), Some("persisted"));
        assert!(client.is_authenticated());
        assert!(client.projects().is_empty());
    }

    #[tokio::test]
    async fn from_config_rejects_corrupt_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("session.json");
        std::fs::write(&token_file, "not json").unwrap();

        let result = Client::from_config(ClientConfig {
            token_file: Some(token_file),
            ..ClientConfig::default()
        });

        let err = result.err().unwrap();
        assert!(err.to_string().contains("Failed to open token store"));
    }
}
