use serde_json::Value;
use taskdeck_common::{
    CreateProjectInput, CreateTaskInput, NewAttachment, UpdateProjectInput, UpdateTaskInput,
};

use super::{Call, Operations};
use crate::errors::ApiError;
use crate::transport::{ApiRequest, HttpMethod, RequestBody};

/// Field name for uploaded files on the attachment route.
const UPLOAD_FIELD: &str = "files";

fn get(label: &str, path: String) -> Call {
    // REST payloads always sit in the `data` envelope; the field is only used in logs.
    Call::new(ApiRequest::new(label, HttpMethod::Get, path), "data")
}

fn delete(label: &str, path: String) -> Call {
    Call::new(ApiRequest::new(label, HttpMethod::Delete, path), "data")
}

fn with_body<T: serde::Serialize>(
    label: &str,
    method: HttpMethod,
    path: String,
    body: &T,
) -> Result<Call, ApiError> {
    let body = serde_json::to_value(body)?;
    Ok(Call::new(ApiRequest::new(label, method, path).json(body), "data"))
}

/// Operations against the resource routes (`/projects`, `/tasks`, `/attachments`, `/users`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RestOperations;

impl Operations for RestOperations {
    fn projects(&self) -> Call {
        get("Projects", "projects".to_string())
    }

    fn project(&self, id: &str) -> Call {
        get("Project", format!("projects/{}", id))
    }

    fn create_project(&self, input: &CreateProjectInput) -> Result<Call, ApiError> {
        with_body("CreateProject", HttpMethod::Post, "projects".to_string(), input)
    }

    fn update_project(&self, id: &str, input: &UpdateProjectInput) -> Result<Call, ApiError> {
        with_body("UpdateProject", HttpMethod::Patch, format!("projects/{}", id), input)
    }

    fn delete_project(&self, id: &str) -> Call {
        delete("DeleteProject", format!("projects/{}", id))
    }

    fn tasks_by_project(&self, project_id: &str) -> Call {
        get("TasksByProject", format!("tasks/project/{}", project_id))
    }

    fn create_task(&self, project_id: &str, input: &CreateTaskInput) -> Result<Call, ApiError> {
        let mut body = serde_json::to_value(input)?;
        if let Value::Object(map) = &mut body {
            map.insert("projectId".to_string(), Value::String(project_id.to_string()));
        }
        with_body("CreateTask", HttpMethod::Post, "tasks".to_string(), &body)
    }

    fn update_task(&self, id: &str, input: &UpdateTaskInput) -> Result<Call, ApiError> {
        with_body("UpdateTask", HttpMethod::Patch, format!("tasks/{}", id), input)
    }

    fn delete_task(&self, id: &str) -> Call {
        delete("DeleteTask", format!("tasks/{}", id))
    }

    fn attachments_by_task(&self, task_id: &str) -> Call {
        get("AttachmentsByTask", format!("attachments/tasks/{}", task_id))
    }

    fn upload_attachments(&self, task_id: &str, files: &[NewAttachment]) -> Result<Call, ApiError> {
        if files.is_empty() {
            return Err(ApiError::InvalidRequest("No files provided".to_string()));
        }
        let request = ApiRequest {
            label: "UploadAttachments".to_string(),
            method: HttpMethod::Post,
            path: format!("attachments/tasks/{}", task_id),
            body: RequestBody::Multipart {
                fields: vec![],
                files: files
                    .iter()
                    .map(|f| (UPLOAD_FIELD.to_string(), f.clone()))
                    .collect(),
            },
        };
        Ok(Call::new(request, "data"))
    }

    fn delete_attachment(&self, id: &str) -> Call {
        delete("DeleteAttachment", format!("attachments/{}", id))
    }

    fn users(&self) -> Call {
        get("Users", "users".to_string())
    }
}
