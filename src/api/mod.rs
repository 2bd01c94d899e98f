//! Typed tracker API on top of the session manager.

mod graphql;
mod rest;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use taskdeck_common::{
    AttachmentSummary, CreateProjectInput, CreateTaskInput, NewAttachment, Project, TaskRecord,
    UpdateProjectInput, UpdateTaskInput, User,
};

use crate::config::Protocol;
use crate::errors::ApiError;
use crate::session::SessionManager;
use crate::transport::ApiRequest;

pub use graphql::GraphqlOperations;
pub use rest::RestOperations;

/// Server-side CRUD and queries. Every id is a server id.
///
/// Real implementation: [`RemoteApi`]. Test double: any struct with canned answers.
#[async_trait]
pub trait EntityApi: Send + Sync {
    async fn projects(&self) -> Result<Vec<Project>, ApiError>;

    async fn project(&self, id: &str) -> Result<Project, ApiError>;

    async fn create_project(&self, input: &CreateProjectInput) -> Result<Project, ApiError>;

    async fn update_project(&self, id: &str, input: &UpdateProjectInput) -> Result<Project, ApiError>;

    async fn delete_project(&self, id: &str) -> Result<(), ApiError>;

    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>, ApiError>;

    async fn create_task(&self, project_id: &str, input: &CreateTaskInput) -> Result<TaskRecord, ApiError>;

    async fn update_task(&self, id: &str, input: &UpdateTaskInput) -> Result<TaskRecord, ApiError>;

    async fn delete_task(&self, id: &str) -> Result<(), ApiError>;

    async fn attachments_by_task(&self, task_id: &str) -> Result<Vec<AttachmentSummary>, ApiError>;

    /// Upload files to a task. The server answers with one attachment per file,
    /// in upload order.
    async fn upload_attachments(
        &self,
        task_id: &str,
        files: &[NewAttachment],
    ) -> Result<Vec<AttachmentSummary>, ApiError>;

    async fn delete_attachment(&self, id: &str) -> Result<(), ApiError>;

    async fn users(&self) -> Result<Vec<User>, ApiError>;
}

/// A built request plus the payload field its answer is read from.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: ApiRequest,
    pub field: &'static str,
}

impl Call {
    fn new(request: ApiRequest, field: &'static str) -> Self {
        Self { request, field }
    }
}

/// Builds the wire request for each API operation in one protocol.
pub trait Operations: Send + Sync {
    fn projects(&self) -> Call;
    fn project(&self, id: &str) -> Call;
    fn create_project(&self, input: &CreateProjectInput) -> Result<Call, ApiError>;
    fn update_project(&self, id: &str, input: &UpdateProjectInput) -> Result<Call, ApiError>;
    fn delete_project(&self, id: &str) -> Call;
    fn tasks_by_project(&self, project_id: &str) -> Call;
    fn create_task(&self, project_id: &str, input: &CreateTaskInput) -> Result<Call, ApiError>;
    fn update_task(&self, id: &str, input: &UpdateTaskInput) -> Result<Call, ApiError>;
    fn delete_task(&self, id: &str) -> Call;
    fn attachments_by_task(&self, task_id: &str) -> Call;
    fn upload_attachments(&self, task_id: &str, files: &[NewAttachment]) -> Result<Call, ApiError>;
    fn delete_attachment(&self, id: &str) -> Call;
    fn users(&self) -> Call;
}

pub fn operations_for(protocol: Protocol) -> Box<dyn Operations> {
    match protocol {
        Protocol::Graphql => Box::new(GraphqlOperations),
        Protocol::Rest => Box::new(RestOperations),
    }
}

/// [`EntityApi`] over HTTP, with every request sent through the session manager.
pub struct RemoteApi {
    session: Arc<SessionManager>,
    protocol: Protocol,
    operations: Box<dyn Operations>,
}

impl RemoteApi {
    pub fn new(session: Arc<SessionManager>, protocol: Protocol) -> Self {
        Self {
            session,
            protocol,
            operations: operations_for(protocol),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, call: Call) -> Result<T, ApiError> {
        let response = self.session.execute(&call.request).await?;
        response.decode(self.protocol, call.field)
    }

    async fn acknowledge(&self, call: Call, what: &str) -> Result<(), ApiError> {
        let response = self.session.execute(&call.request).await?;
        if response.acknowledged(self.protocol, call.field) {
            Ok(())
        } else {
            Err(ApiError::Server {
                status: response.status,
                message: format!("Failed to delete {}", what),
            })
        }
    }
}

#[async_trait]
impl EntityApi for RemoteApi {
    async fn projects(&self) -> Result<Vec<Project>, ApiError> {
        self.fetch(self.operations.projects()).await
    }

    async fn project(&self, id: &str) -> Result<Project, ApiError> {
        self.fetch(self.operations.project(id)).await
    }

    async fn create_project(&self, input: &CreateProjectInput) -> Result<Project, ApiError> {
        self.fetch(self.operations.create_project(input)?).await
    }

    async fn update_project(&self, id: &str, input: &UpdateProjectInput) -> Result<Project, ApiError> {
        self.fetch(self.operations.update_project(id, input)?).await
    }

    async fn delete_project(&self, id: &str) -> Result<(), ApiError> {
        self.acknowledge(self.operations.delete_project(id), "project").await
    }

    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>, ApiError> {
        self.fetch(self.operations.tasks_by_project(project_id)).await
    }

    async fn create_task(&self, project_id: &str, input: &CreateTaskInput) -> Result<TaskRecord, ApiError> {
        self.fetch(self.operations.create_task(project_id, input)?).await
    }

    async fn update_task(&self, id: &str, input: &UpdateTaskInput) -> Result<TaskRecord, ApiError> {
        self.fetch(self.operations.update_task(id, input)?).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        self.acknowledge(self.operations.delete_task(id), "task").await
    }

    async fn attachments_by_task(&self, task_id: &str) -> Result<Vec<AttachmentSummary>, ApiError> {
        self.fetch(self.operations.attachments_by_task(task_id)).await
    }

    async fn upload_attachments(
        &self,
        task_id: &str,
        files: &[NewAttachment],
    ) -> Result<Vec<AttachmentSummary>, ApiError> {
        self.fetch(self.operations.upload_attachments(task_id, files)?).await
    }

    async fn delete_attachment(&self, id: &str) -> Result<(), ApiError> {
        self.acknowledge(self.operations.delete_attachment(id), "attachment").await
    }

    async fn users(&self) -> Result<Vec<User>, ApiError> {
        self.fetch(self.operations.users()).await
    }
}

/// Read a file from disk into an upload, guessing its MIME type from the extension.
pub async fn attachment_from_path(path: &Path) -> Result<NewAttachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Attachment path has no file name: {}", path.display()))?;
    let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
    Ok(NewAttachment {
        file_name,
        mime_type,
        bytes,
    })
}
