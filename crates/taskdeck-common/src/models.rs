use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    #[default]
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub username: String,
    #[serde(default)]
    pub role: UserRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [Self::Todo, Self::InProgress, Self::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DONE" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Per-project task totals by status, maintained incrementally by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    #[serde(rename = "TODO", default)]
    pub todo: u32,
    #[serde(rename = "IN_PROGRESS", default)]
    pub in_progress: u32,
    #[serde(rename = "DONE", default)]
    pub done: u32,
}

impl TaskCounts {
    pub fn new(todo: u32, in_progress: u32, done: u32) -> Self {
        Self {
            todo,
            in_progress,
            done,
        }
    }

    pub fn get(&self, status: TaskStatus) -> u32 {
        match status {
            TaskStatus::Todo => self.todo,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Done => self.done,
        }
    }

    /// Add `delta` to one bucket, saturating at zero. Returns the delta actually applied.
    pub fn adjust(&mut self, status: TaskStatus, delta: i64) -> i64 {
        let slot = match status {
            TaskStatus::Todo => &mut self.todo,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Done => &mut self.done,
        };
        let before = i64::from(*slot);
        let after = (before + delta).clamp(0, i64::from(u32::MAX));
        *slot = after as u32;
        after - before
    }

    pub fn total(&self) -> u32 {
        self.todo + self.in_progress + self.done
    }

    /// Tally a set of statuses from scratch. Only used to check the incremental
    /// bookkeeping, never to overwrite it.
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a TaskStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.adjust(*status, 1);
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<User>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub task_counts: TaskCounts,
}

impl Project {
    /// The optimistic stand-in shown while a create is in flight.
    pub fn speculative(
        id: EntityId,
        input: &CreateProjectInput,
        members: Vec<User>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
            members,
            created_at: now,
            task_counts: TaskCounts::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub project_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn speculative(
        id: EntityId,
        input: &CreateTaskInput,
        author: Option<User>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
            status: input.status.unwrap_or_default(),
            assignee: author
                .as_ref()
                .map(|u| u.id.to_string())
                .unwrap_or_default(),
            user: author,
            project_id: input.project_id.clone(),
            due_date: input.due_date,
            created_at: now,
        }
    }
}

/// A task as the server returns it, with its attachments embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub attachments: Vec<AttachmentSummary>,
}

impl TaskRecord {
    pub fn into_parts(self) -> (Task, Vec<Attachment>) {
        let task_id = self.task.id.clone();
        let attachments = self
            .attachments
            .into_iter()
            .map(|a| a.into_attachment(task_id.clone()))
            .collect();
        (self.task, attachments)
    }
}

/// Attachment fields as they appear in server payloads (no owning task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentSummary {
    pub id: EntityId,
    pub original_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AttachmentSummary {
    pub fn into_attachment(self, task_id: EntityId) -> Attachment {
        Attachment {
            id: self.id,
            task_id,
            original_name: self.original_name,
            mime_type: self.mime_type,
            size: self.size,
            uploaded_by: self.uploaded_by,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: EntityId,
    pub task_id: EntityId,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Inputs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectInput {
    pub title: String,
    pub description: String,
    /// Member user ids.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    pub title: String,
    pub description: String,
    /// Sent separately as a server id; a pending project is rejected before sending.
    #[serde(skip)]
    pub project_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl UpdateTaskInput {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

pub type RegisterInput = LoginInput;

/// A file queued for upload. Holds its bytes so the request can be replayed.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for NewAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAttachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Token and identity returned by login, register and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_counts_adjust_saturates_and_reports_applied_delta() {
        let mut counts = TaskCounts::new(1, 0, 0);
        assert_eq!(counts.adjust(TaskStatus::Todo, -1), -1);
        assert_eq!(counts.adjust(TaskStatus::Todo, -1), 0);
        assert_eq!(counts.todo, 0);
        assert_eq!(counts.adjust(TaskStatus::Done, 2), 2);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn task_counts_use_status_keys_on_the_wire() {
        let counts: TaskCounts =
            serde_json::from_str(r#"{"TODO":2,"IN_PROGRESS":1,"DONE":0}"#).unwrap();
        assert_eq!(counts, TaskCounts::new(2, 1, 0));
    }

    #[test]
    fn tally_matches_statuses() {
        let statuses = [TaskStatus::Todo, TaskStatus::Done, TaskStatus::Todo];
        assert_eq!(TaskCounts::tally(&statuses), TaskCounts::new(2, 0, 1));
    }

    #[test]
    fn task_status_parses_wire_names() {
        assert_eq!("IN_PROGRESS".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert!("in_progress".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_record_splits_embedded_attachments() {
        let json = r#"{
            "id": "t1",
            "title": "Write docs",
            "description": "",
            "status": "DONE",
            "assignee": "u1",
            "projectId": "p1",
            "createdAt": "2024-05-01T10:00:00Z",
            "user": {"id": "u1", "username": "ann", "role": "ADMIN"},
            "attachments": [
                {"id": "a1", "originalName": "spec.pdf", "mimeType": "application/pdf",
                 "size": 42, "createdAt": "2024-05-01T10:01:00Z"}
            ]
        }"#;
        let record: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.task.status, TaskStatus::Done);
        assert_eq!(record.task.user.as_ref().map(|u| u.role), Some(UserRole::Admin));

        let (task, attachments) = record.into_parts();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].task_id, task.id);
        assert_eq!(attachments[0].size, 42);
    }

    #[test]
    fn create_task_input_never_serializes_project_id() {
        let input = CreateTaskInput {
            title: "t".into(),
            description: "d".into(),
            project_id: EntityId::Pending("temp-1".into()),
            status: None,
            due_date: None,
        };
        let value = serde_json::to_value(&input).unwrap();
        assert!(value.get("projectId").is_none());
        assert!(value.get("status").is_none());
    }

    #[test]
    fn speculative_task_defaults_status_to_todo() {
        let input = CreateTaskInput {
            title: "t".into(),
            description: String::new(),
            project_id: EntityId::confirmed("p1"),
            status: None,
            due_date: None,
        };
        let author = User {
            id: EntityId::confirmed("u1"),
            username: "ann".into(),
            role: UserRole::Member,
        };
        let task = Task::speculative(
            EntityId::Pending("temp-1".into()),
            &input,
            Some(author),
            Utc::now(),
        );
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.assignee, "u1");
    }
}
