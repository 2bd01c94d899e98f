//! Normalized client-side entity cache.
//!
//! Entities live in id-keyed arenas; ordering lives in separate index lists
//! (`project_order`, per-project task lists, per-task attachment lists), so one
//! entity is never duplicated across the views that show it.
//!
//! Speculative writes go through [`CacheOp`]s (see [`ops`]). Everything else in
//! this module is either a reader, a server-driven load, or a commit of a server
//! answer. Commits are not undoable.

mod ops;

pub use ops::{CacheOp, ProjectPatch, TaskPatch, Undo};

use std::collections::HashMap;

use taskdeck_common::{
    Attachment, EntityId, Project, Task, TaskCounts, TaskRecord, TaskStatus, User,
};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityCache {
    projects: HashMap<EntityId, Project>,
    project_order: Vec<EntityId>,
    tasks: HashMap<EntityId, Task>,
    task_order: HashMap<EntityId, Vec<EntityId>>,
    attachments: HashMap<EntityId, Attachment>,
    attachment_order: HashMap<EntityId, Vec<EntityId>>,
    /// Counters of projects removed while their delete is in flight.
    detached_counts: HashMap<EntityId, TaskCounts>,
    users: Vec<User>,
}

fn position(list: Option<&Vec<EntityId>>, id: &EntityId) -> Option<usize> {
    list.and_then(|l| l.iter().position(|x| x == id))
}

fn replace_id(list: &mut [EntityId], old: &EntityId, new: &EntityId) {
    if let Some(slot) = list.iter_mut().find(|x| *x == old) {
        *slot = new.clone();
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn projects(&self) -> Vec<&Project> {
        self.project_order
            .iter()
            .filter_map(|id| self.projects.get(id))
            .collect()
    }

    pub fn project(&self, id: &EntityId) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn project_index(&self, id: &EntityId) -> Option<usize> {
        position(Some(&self.project_order), id)
    }

    /// Tasks of a project in list order.
    pub fn tasks(&self, project_id: &EntityId) -> Vec<&Task> {
        self.task_order
            .get(project_id)
            .map(|order| order.iter().filter_map(|id| self.tasks.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn task(&self, id: &EntityId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_index(&self, id: &EntityId) -> Option<usize> {
        let task = self.tasks.get(id)?;
        position(self.task_order.get(&task.project_id), id)
    }

    /// Whether the project's task list has been loaded or written to.
    pub fn has_task_list(&self, project_id: &EntityId) -> bool {
        self.task_order.contains_key(project_id)
    }

    pub fn attachments(&self, task_id: &EntityId) -> Vec<&Attachment> {
        self.attachment_order
            .get(task_id)
            .map(|order| order.iter().filter_map(|id| self.attachments.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn attachment(&self, id: &EntityId) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    pub fn attachment_index(&self, id: &EntityId) -> Option<usize> {
        let attachment = self.attachments.get(id)?;
        position(self.attachment_order.get(&attachment.task_id), id)
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Resolve user ids against the cached user list. `None` unless every id is known.
    pub fn resolve_users(&self, ids: &[String]) -> Option<Vec<User>> {
        ids.iter()
            .map(|id| self.users.iter().find(|u| u.id.as_str() == id).cloned())
            .collect()
    }

    // ── Server loads ─────────────────────────────────────────────────

    /// Replace the confirmed project list. Optimistic (pending) projects stay,
    /// after the server's entries.
    pub(crate) fn load_projects(&mut self, projects: Vec<Project>) {
        let pending: Vec<EntityId> = self
            .project_order
            .iter()
            .filter(|id| id.is_pending())
            .cloned()
            .collect();
        self.projects.retain(|id, _| id.is_pending());
        self.project_order = projects.iter().map(|p| p.id.clone()).collect();
        for project in projects {
            self.store_project(project);
        }
        self.project_order.extend(pending);
        debug!(count = self.project_order.len(), "Loaded projects");
    }

    pub(crate) fn load_project(&mut self, project: Project) {
        if !self.project_order.contains(&project.id) {
            self.project_order.push(project.id.clone());
        }
        self.store_project(project);
    }

    /// Store a server project, counting optimistic tasks the server has not seen yet.
    fn store_project(&mut self, mut project: Project) {
        self.detached_counts.remove(&project.id);
        for task in self.tasks(&project.id) {
            if task.id.is_pending() {
                project.task_counts.adjust(task.status, 1);
            }
        }
        self.projects.insert(project.id.clone(), project);
    }

    /// Replace a project's confirmed tasks and their attachments. Counters are
    /// left to the project payload.
    pub(crate) fn load_tasks(&mut self, project_id: &EntityId, records: Vec<TaskRecord>) {
        let previous = self.task_order.remove(project_id).unwrap_or_default();
        let mut pending = Vec::new();
        for id in previous {
            if id.is_pending() {
                pending.push(id);
            } else {
                self.tasks.remove(&id);
            }
        }

        let mut order = Vec::with_capacity(records.len() + pending.len());
        for record in records {
            let (task, attachments) = record.into_parts();
            order.push(task.id.clone());
            self.replace_confirmed_attachments(&task.id, attachments);
            self.tasks.insert(task.id.clone(), task);
        }
        order.extend(pending);
        debug!(project = %project_id, count = order.len(), "Loaded tasks");
        self.task_order.insert(project_id.clone(), order);
    }

    pub(crate) fn load_attachments(&mut self, task_id: &EntityId, attachments: Vec<Attachment>) {
        self.replace_confirmed_attachments(task_id, attachments);
    }

    fn replace_confirmed_attachments(&mut self, task_id: &EntityId, attachments: Vec<Attachment>) {
        let previous = self.attachment_order.remove(task_id).unwrap_or_default();
        let mut pending = Vec::new();
        for id in previous {
            if id.is_pending() {
                pending.push(id);
            } else {
                self.attachments.remove(&id);
            }
        }
        let mut order: Vec<EntityId> = attachments.iter().map(|a| a.id.clone()).collect();
        for attachment in attachments {
            self.attachments.insert(attachment.id.clone(), attachment);
        }
        order.extend(pending);
        self.attachment_order.insert(task_id.clone(), order);
    }

    pub(crate) fn load_users(&mut self, users: Vec<User>) {
        self.users = users;
    }

    // ── Commits ──────────────────────────────────────────────────────

    /// Swap an optimistic project for the server's, keeping its list position.
    /// Returns `false` if the optimistic entry is gone (e.g. the cache was reset).
    pub(crate) fn promote_project(&mut self, temp_id: &EntityId, project: Project) -> bool {
        if self.projects.remove(temp_id).is_none() {
            return false;
        }
        if self.project_order.contains(&project.id) {
            self.project_order.retain(|id| id != temp_id);
        } else {
            replace_id(&mut self.project_order, temp_id, &project.id);
        }
        if let Some(tasks) = self.task_order.remove(temp_id) {
            self.task_order.insert(project.id.clone(), tasks);
        }
        self.projects.insert(project.id.clone(), project);
        true
    }

    /// Swap an optimistic task for the server's, keeping its list position and
    /// moving one counter unit if the server settled on a different status.
    pub(crate) fn promote_task(
        &mut self,
        temp_id: &EntityId,
        task: Task,
        attachments: Vec<Attachment>,
    ) -> bool {
        let Some(speculative) = self.tasks.remove(temp_id) else {
            return false;
        };
        self.reconcile_status(&speculative.project_id, speculative.status, task.status);
        if let Some(order) = self.task_order.get_mut(&speculative.project_id) {
            if order.contains(&task.id) {
                order.retain(|id| id != temp_id);
            } else {
                replace_id(order, temp_id, &task.id);
            }
        }
        let mut attachment_ids = self.attachment_order.remove(temp_id).unwrap_or_default();
        for attachment in attachments {
            if !attachment_ids.contains(&attachment.id) {
                attachment_ids.push(attachment.id.clone());
            }
            self.attachments.insert(attachment.id.clone(), attachment);
        }
        if !attachment_ids.is_empty() {
            self.attachment_order.insert(task.id.clone(), attachment_ids);
        }
        self.tasks.insert(task.id.clone(), task);
        true
    }

    pub(crate) fn promote_attachment(&mut self, temp_id: &EntityId, attachment: Attachment) -> bool {
        let Some(speculative) = self.attachments.remove(temp_id) else {
            return false;
        };
        if let Some(order) = self.attachment_order.get_mut(&speculative.task_id) {
            if order.contains(&attachment.id) {
                order.retain(|id| id != temp_id);
            } else {
                replace_id(order, temp_id, &attachment.id);
            }
        }
        self.attachments.insert(attachment.id.clone(), attachment);
        true
    }

    /// Take the server's version of an updated project. The local counters are
    /// kept; they already reflect every task write this client has made.
    pub(crate) fn confirm_project(&mut self, mut project: Project) {
        let Some(cached) = self.projects.get_mut(&project.id) else {
            return;
        };
        project.task_counts = cached.task_counts;
        *cached = project;
    }

    /// Take the server's version of an updated task, reconciling counters against
    /// the cached status. Ignored if the task has been deleted meanwhile.
    pub(crate) fn confirm_task(&mut self, task: Task) {
        let Some(cached) = self.tasks.get(&task.id) else {
            return;
        };
        let (project_id, old_status) = (cached.project_id.clone(), cached.status);
        self.reconcile_status(&project_id, old_status, task.status);
        self.tasks.insert(task.id.clone(), task);
    }

    /// Drop a deleted project's tasks and their attachments.
    pub(crate) fn evict_project_tasks(&mut self, project_id: &EntityId) {
        self.detached_counts.remove(project_id);
        let mut ids = self.task_order.remove(project_id).unwrap_or_default();
        ids.extend(
            self.tasks
                .values()
                .filter(|t| &t.project_id == project_id)
                .map(|t| t.id.clone()),
        );
        for id in ids {
            self.tasks.remove(&id);
            for aid in self.attachment_order.remove(&id).unwrap_or_default() {
                self.attachments.remove(&aid);
            }
        }
    }

    fn reconcile_status(&mut self, project_id: &EntityId, cached: TaskStatus, server: TaskStatus) {
        if cached != server {
            self.adjust_counts(project_id, cached, -1);
            self.adjust_counts(project_id, server, 1);
        }
    }

    fn adjust_counts(&mut self, project_id: &EntityId, status: TaskStatus, delta: i64) {
        let counts = match self.projects.get_mut(project_id) {
            Some(project) => Some(&mut project.task_counts),
            None => self.detached_counts.get_mut(project_id),
        };
        if let Some(counts) = counts {
            counts.adjust(status, delta);
        }
    }
}
