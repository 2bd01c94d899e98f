use serde_json::{Map, Value, json};
use taskdeck_common::{
    CreateProjectInput, CreateTaskInput, NewAttachment, UpdateProjectInput, UpdateTaskInput,
};

use super::{Call, Operations};
use crate::errors::ApiError;
use crate::transport::{ApiRequest, GRAPHQL_PATH, HttpMethod, RequestBody};

const USER: &str = "id username role";
const PROJECT: &str =
    "id title description createdAt members { id username role } taskCounts { TODO IN_PROGRESS DONE }";
const ATTACHMENT: &str = "id taskId originalName mimeType size uploadedBy createdAt";

fn task_fields() -> String {
    format!(
        "id title description status assignee projectId dueDate createdAt user {{ {} }} attachments {{ {} }}",
        USER, ATTACHMENT
    )
}

fn call(operation: &str, query: String, variables: Value, field: &'static str) -> Call {
    Call::new(ApiRequest::graphql(operation, &query, variables), field)
}

/// Serialize an input object, optionally adding fields the input type keeps out of its body.
fn input_value<T: serde::Serialize>(input: &T, extra: &[(&str, &str)]) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(input)?;
    if let Value::Object(map) = &mut value {
        for (key, val) in extra {
            map.insert(key.to_string(), Value::String(val.to_string()));
        }
    }
    Ok(value)
}

/// Operations against the single `/graphql` endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphqlOperations;

impl Operations for GraphqlOperations {
    fn projects(&self) -> Call {
        call(
            "Projects",
            format!("query Projects {{ projects {{ {} }} }}", PROJECT),
            json!({}),
            "projects",
        )
    }

    fn project(&self, id: &str) -> Call {
        call(
            "Project",
            format!("query Project($id: ID!) {{ project(id: $id) {{ {} }} }}", PROJECT),
            json!({ "id": id }),
            "project",
        )
    }

    fn create_project(&self, input: &CreateProjectInput) -> Result<Call, ApiError> {
        Ok(call(
            "CreateProject",
            format!(
                "mutation CreateProject($input: CreateProjectInput!) {{ createProject(input: $input) {{ {} }} }}",
                PROJECT
            ),
            json!({ "input": input_value(input, &[])? }),
            "createProject",
        ))
    }

    fn update_project(&self, id: &str, input: &UpdateProjectInput) -> Result<Call, ApiError> {
        Ok(call(
            "UpdateProject",
            format!(
                "mutation UpdateProject($id: ID!, $input: UpdateProjectInput!) {{ updateProject(id: $id, input: $input) {{ {} }} }}",
                PROJECT
            ),
            json!({ "id": id, "input": input_value(input, &[])? }),
            "updateProject",
        ))
    }

    fn delete_project(&self, id: &str) -> Call {
        call(
            "DeleteProject",
            "mutation DeleteProject($id: ID!) { deleteProject(id: $id) }".to_string(),
            json!({ "id": id }),
            "deleteProject",
        )
    }

    fn tasks_by_project(&self, project_id: &str) -> Call {
        call(
            "TasksByProject",
            format!(
                "query TasksByProject($projectId: ID!) {{ tasksByProject(projectId: $projectId) {{ {} }} }}",
                task_fields()
            ),
            json!({ "projectId": project_id }),
            "tasksByProject",
        )
    }

    fn create_task(&self, project_id: &str, input: &CreateTaskInput) -> Result<Call, ApiError> {
        Ok(call(
            "CreateTask",
            format!(
                "mutation CreateTask($input: CreateTaskInput!) {{ createTask(input: $input) {{ {} }} }}",
                task_fields()
            ),
            json!({ "input": input_value(input, &[("projectId", project_id)])? }),
            "createTask",
        ))
    }

    fn update_task(&self, id: &str, input: &UpdateTaskInput) -> Result<Call, ApiError> {
        Ok(call(
            "UpdateTask",
            format!(
                "mutation UpdateTask($id: ID!, $input: UpdateTaskInput!) {{ updateTask(id: $id, input: $input) {{ {} }} }}",
                task_fields()
            ),
            json!({ "id": id, "input": input_value(input, &[])? }),
            "updateTask",
        ))
    }

    fn delete_task(&self, id: &str) -> Call {
        call(
            "DeleteTask",
            "mutation DeleteTask($id: ID!) { deleteTask(id: $id) }".to_string(),
            json!({ "id": id }),
            "deleteTask",
        )
    }

    fn attachments_by_task(&self, task_id: &str) -> Call {
        call(
            "AttachmentsByTask",
            format!(
                "query AttachmentsByTask($taskId: ID!) {{ attachmentsByTask(taskId: $taskId) {{ {} }} }}",
                ATTACHMENT
            ),
            json!({ "taskId": task_id }),
            "attachmentsByTask",
        )
    }

    /// GraphQL multipart request: an `operations` document with a null slot per
    /// file, a `map` from part name to variable path, then the files as `0`, `1`, ...
    fn upload_attachments(&self, task_id: &str, files: &[NewAttachment]) -> Result<Call, ApiError> {
        let query = format!(
            "mutation UploadAttachments($taskId: ID!, $files: [Upload!]!) {{ uploadAttachments(taskId: $taskId, files: $files) {{ {} }} }}",
            ATTACHMENT
        );
        let operations = json!({
            "operationName": "UploadAttachments",
            "query": query,
            "variables": { "taskId": task_id, "files": vec![Value::Null; files.len()] },
        });
        let map: Map<String, Value> = (0..files.len())
            .map(|i| (i.to_string(), json!([format!("variables.files.{}", i)])))
            .collect();

        let request = ApiRequest {
            label: "UploadAttachments".to_string(),
            method: HttpMethod::Post,
            path: GRAPHQL_PATH.to_string(),
            body: RequestBody::Multipart {
                fields: vec![
                    ("operations".to_string(), serde_json::to_string(&operations)?),
                    ("map".to_string(), serde_json::to_string(&map)?),
                ],
                files: files
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (i.to_string(), f.clone()))
                    .collect(),
            },
        };
        Ok(Call::new(request, "uploadAttachments"))
    }

    fn delete_attachment(&self, id: &str) -> Call {
        call(
            "DeleteAttachment",
            "mutation DeleteAttachment($id: ID!) { deleteAttachment(id: $id) }".to_string(),
            json!({ "id": id }),
            "deleteAttachment",
        )
    }

    fn users(&self) -> Call {
        call(
            "Users",
            format!("query Users {{ users {{ {} }} }}", USER),
            json!({}),
            "users",
        )
    }
}
