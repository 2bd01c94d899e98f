//! Optimistic mutations over the entity cache.
//!
//! Every mutation follows the same three steps:
//!
//! 1. **Stage**: write the speculative result into the cache and register a
//!    [`PendingMutation`] holding the undo data. No `.await` happens before this.
//! 2. **Send**: call the [`EntityApi`]; the session manager handles token refresh.
//! 3. **Settle**: on success commit the server's answer (promote a temporary id,
//!    reconcile counters); on any failure revert the undo, then return the error.
//!
//! A cache reset (login, logout) drops every pending mutation; answers that
//! arrive afterwards are discarded.

mod hydrate;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use taskdeck_common::{
    Attachment, CreateProjectInput, CreateTaskInput, EntityId, EntityKind, NewAttachment, Project,
    Task, TempIdGenerator, UpdateProjectInput, UpdateTaskInput,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::EntityApi;
use crate::cache::{CacheOp, EntityCache, ProjectPatch, TaskPatch, Undo};
use crate::errors::{ApiError, MutationError};
use crate::session::IdentitySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// A mutation whose server answer has not arrived yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub mutation_id: Uuid,
    pub entity_kind: EntityKind,
    pub operation: MutationKind,
    pub target: EntityId,
    pub undo: Undo,
}

pub struct MutationCoordinator {
    api: Arc<dyn EntityApi>,
    cache: Mutex<EntityCache>,
    pending: Mutex<HashMap<Uuid, PendingMutation>>,
    temp_ids: TempIdGenerator,
    identity: Arc<dyn IdentitySource>,
}

/// Require a server-assigned id before anything is written or sent.
fn server_id(kind: EntityKind, id: &EntityId) -> Result<&str, MutationError> {
    id.server_id().ok_or_else(|| MutationError::PendingEntity {
        kind,
        id: id.clone(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MutationCoordinator {
    pub fn new(api: Arc<dyn EntityApi>, identity: Arc<dyn IdentitySource>) -> Self {
        Self {
            api,
            cache: Mutex::new(EntityCache::new()),
            pending: Mutex::new(HashMap::new()),
            temp_ids: TempIdGenerator::new(),
            identity,
        }
    }

    // ── Observability ────────────────────────────────────────────────

    /// In-flight mutations, in no particular order.
    pub fn pending(&self) -> Vec<PendingMutation> {
        lock(&self.pending).values().cloned().collect()
    }

    /// A copy of the whole cache.
    pub fn snapshot(&self) -> EntityCache {
        lock(&self.cache).clone()
    }

    /// Run `f` against the cache without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&EntityCache) -> R) -> R {
        f(&lock(&self.cache))
    }

    /// Forget everything cached and every pending mutation.
    pub fn reset_cache(&self) {
        let mut cache = lock(&self.cache);
        let mut pending = lock(&self.pending);
        if !pending.is_empty() {
            info!(dropped = pending.len(), "Dropping pending mutations on cache reset");
        }
        pending.clear();
        *cache = EntityCache::new();
    }

    // ── Stage / settle ───────────────────────────────────────────────

    fn stage(
        &self,
        entity_kind: EntityKind,
        operation: MutationKind,
        target: &EntityId,
        build: impl FnOnce(&EntityCache) -> Vec<CacheOp>,
    ) -> Uuid {
        let mut cache = lock(&self.cache);
        let ops = build(&cache);
        let undo = cache.apply_all(ops);
        let mutation_id = Uuid::new_v4();
        lock(&self.pending).insert(
            mutation_id,
            PendingMutation {
                mutation_id,
                entity_kind,
                operation,
                target: target.clone(),
                undo,
            },
        );
        debug!(%mutation_id, kind = %entity_kind, %operation, target = %target, "Staged optimistic write");
        mutation_id
    }

    /// Apply the server's answer, unless the mutation was dropped by a reset.
    fn commit(&self, mutation_id: Uuid, apply: impl FnOnce(&mut EntityCache)) {
        let mut cache = lock(&self.cache);
        if lock(&self.pending).remove(&mutation_id).is_some() {
            apply(&mut cache);
            debug!(%mutation_id, "Committed mutation");
        } else {
            debug!(%mutation_id, "Discarding answer for dropped mutation");
        }
    }

    /// Undo the speculative write, then hand back the error.
    fn rollback(&self, mutation_id: Uuid, err: ApiError) -> MutationError {
        let mut cache = lock(&self.cache);
        if let Some(mutation) = lock(&self.pending).remove(&mutation_id) {
            warn!(
                %mutation_id,
                kind = %mutation.entity_kind,
                operation = %mutation.operation,
                target = %mutation.target,
                error = %err,
                "Mutation failed; rolling back"
            );
            cache.revert(mutation.undo);
        }
        MutationError::Api(err)
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub async fn create_project(&self, input: CreateProjectInput) -> Result<Project, MutationError> {
        let temp_id = self.temp_ids.next_id();
        let mutation = self.stage(EntityKind::Project, MutationKind::Create, &temp_id, |cache| {
            let members = cache
                .users()
                .iter()
                .filter(|u| input.members.iter().any(|m| m == u.id.as_str()))
                .cloned()
                .collect();
            vec![CacheOp::InsertProject {
                project: Project::speculative(temp_id.clone(), &input, members, Utc::now()),
                index: usize::MAX,
            }]
        });

        match self.api.create_project(&input).await {
            Ok(project) => {
                self.commit(mutation, |cache| {
                    cache.promote_project(&temp_id, project.clone());
                });
                Ok(project)
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    pub async fn update_project(
        &self,
        id: &EntityId,
        input: UpdateProjectInput,
    ) -> Result<Project, MutationError> {
        let sid = server_id(EntityKind::Project, id)?;
        let mutation = self.stage(EntityKind::Project, MutationKind::Update, id, |cache| {
            vec![CacheOp::PatchProject {
                id: id.clone(),
                patch: ProjectPatch {
                    title: input.title.clone(),
                    description: input.description.clone(),
                    members: input.members.as_deref().and_then(|ids| cache.resolve_users(ids)),
                },
            }]
        });

        match self.api.update_project(sid, &input).await {
            Ok(project) => {
                self.commit(mutation, |cache| cache.confirm_project(project.clone()));
                Ok(project)
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    /// Remove a project. Once the server confirms, its tasks leave the cache too.
    pub async fn delete_project(&self, id: &EntityId) -> Result<(), MutationError> {
        let sid = server_id(EntityKind::Project, id)?;
        let mutation = self.stage(EntityKind::Project, MutationKind::Delete, id, |_| {
            vec![CacheOp::RemoveProject { id: id.clone() }]
        });

        match self.api.delete_project(sid).await {
            Ok(()) => {
                self.commit(mutation, |cache| cache.evict_project_tasks(id));
                Ok(())
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Create a task at the end of its project's list, counting it right away.
    pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task, MutationError> {
        let project_sid = server_id(EntityKind::Project, &input.project_id)?;
        let temp_id = self.temp_ids.next_id();
        let author = self.identity.current_user();
        let mutation = self.stage(EntityKind::Task, MutationKind::Create, &temp_id, |_| {
            vec![CacheOp::InsertTask {
                task: Task::speculative(temp_id.clone(), &input, author, Utc::now()),
                index: usize::MAX,
                attachments: None,
            }]
        });

        match self.api.create_task(project_sid, &input).await {
            Ok(record) => {
                let (task, attachments) = record.into_parts();
                self.commit(mutation, |cache| {
                    cache.promote_task(&temp_id, task.clone(), attachments);
                });
                Ok(task)
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    /// Patch a task in place. A status change moves the project counters at once.
    pub async fn update_task(&self, id: &EntityId, input: UpdateTaskInput) -> Result<Task, MutationError> {
        let sid = server_id(EntityKind::Task, id)?;
        let mutation = self.stage(EntityKind::Task, MutationKind::Update, id, |_| {
            vec![CacheOp::PatchTask {
                id: id.clone(),
                patch: TaskPatch {
                    title: input.title.clone(),
                    description: input.description.clone(),
                    status: input.status,
                    due_date: input.due_date.map(Some),
                },
            }]
        });

        match self.api.update_task(sid, &input).await {
            Ok(record) => {
                let task = record.task;
                self.commit(mutation, |cache| cache.confirm_task(task.clone()));
                Ok(task)
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    pub async fn delete_task(&self, id: &EntityId) -> Result<(), MutationError> {
        let sid = server_id(EntityKind::Task, id)?;
        let mutation = self.stage(EntityKind::Task, MutationKind::Delete, id, |_| {
            vec![CacheOp::RemoveTask {
                id: id.clone(),
                prune_list: false,
            }]
        });

        match self.api.delete_task(sid).await {
            Ok(()) => {
                self.commit(mutation, |_| {});
                Ok(())
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    // ── Attachments ──────────────────────────────────────────────────

    /// Upload files to a task. Each file shows up immediately under a temporary
    /// id; the server's attachments replace them by position.
    pub async fn upload_attachments(
        &self,
        task_id: &EntityId,
        files: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, MutationError> {
        let sid = server_id(EntityKind::Task, task_id)?;
        if files.is_empty() {
            return Err(ApiError::InvalidRequest("No files provided".to_string()).into());
        }
        let uploader = self.identity.current_user().map(|u| u.id.to_string());
        let now = Utc::now();
        let speculative: Vec<Attachment> = files
            .iter()
            .map(|file| Attachment {
                id: self.temp_ids.next_id(),
                task_id: task_id.clone(),
                original_name: file.file_name.clone(),
                mime_type: file.mime_type.clone(),
                size: file.bytes.len() as u64,
                uploaded_by: uploader.clone(),
                created_at: now,
            })
            .collect();
        let temp_ids: Vec<EntityId> = speculative.iter().map(|a| a.id.clone()).collect();
        let mutation = self.stage(EntityKind::Attachment, MutationKind::Create, task_id, |_| {
            speculative
                .into_iter()
                .map(|attachment| CacheOp::InsertAttachment {
                    attachment,
                    index: usize::MAX,
                })
                .collect()
        });

        match self.api.upload_attachments(sid, &files).await {
            Ok(summaries) => {
                let attachments: Vec<Attachment> = summaries
                    .into_iter()
                    .map(|s| s.into_attachment(task_id.clone()))
                    .collect();
                self.commit(mutation, |cache| {
                    for (i, attachment) in attachments.iter().enumerate() {
                        match temp_ids.get(i) {
                            Some(temp_id) => {
                                cache.promote_attachment(temp_id, attachment.clone());
                            }
                            None => {
                                cache.apply(CacheOp::InsertAttachment {
                                    attachment: attachment.clone(),
                                    index: usize::MAX,
                                });
                            }
                        }
                    }
                    for temp_id in temp_ids.iter().skip(attachments.len()) {
                        cache.apply(CacheOp::RemoveAttachment {
                            id: temp_id.clone(),
                            prune_list: false,
                        });
                    }
                });
                Ok(attachments)
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }

    pub async fn delete_attachment(&self, id: &EntityId) -> Result<(), MutationError> {
        let sid = server_id(EntityKind::Attachment, id)?;
        let mutation = self.stage(EntityKind::Attachment, MutationKind::Delete, id, |_| {
            vec![CacheOp::RemoveAttachment {
                id: id.clone(),
                prune_list: false,
            }]
        });

        match self.api.delete_attachment(sid).await {
            Ok(()) => {
                self.commit(mutation, |_| {});
                Ok(())
            }
            Err(e) => Err(self.rollback(mutation, e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::cache::test_support::pid;
    use taskdeck_common::{TaskCounts, TaskStatus};

    fn counts(coordinator: &MutationCoordinator) -> TaskCounts {
        coordinator.read(|c| c.project(&pid("p1")).map(|p| p.task_counts).unwrap_or_default())
    }

    /// Counters must match a fresh tally of the cached task list.
    fn assert_counts_consistent(coordinator: &MutationCoordinator) {
        coordinator.read(|cache| {
            let statuses: Vec<TaskStatus> = cache.tasks(&pid("p1")).iter().map(|t| t.status).collect();
            let project = cache.project(&pid("p1")).unwrap();
            assert_eq!(project.task_counts, TaskCounts::tally(&statuses));
            assert_eq!(project.task_counts.total() as usize, statuses.len());
        });
    }

    fn new_task(title: &str) -> CreateTaskInput {
        CreateTaskInput {
            title: title.into(),
            description: String::new(),
            project_id: pid("p1"),
            status: None,
            due_date: None,
        }
    }

    fn task_ids(coordinator: &MutationCoordinator) -> Vec<String> {
        coordinator.read(|c| c.tasks(&pid("p1")).iter().map(|t| t.id.to_string()).collect())
    }

    #[tokio::test]
    async fn status_update_moves_counters_and_failure_restores_them() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        let before = coordinator.snapshot();
        assert_eq!(counts(&coordinator), TaskCounts::new(2, 1, 0));
        api.hold();
        api.fail_on("t1");

        let handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .update_task(&pid("t1"), UpdateTaskInput::status(TaskStatus::Done))
                    .await
            })
        };
        wait_until_pending(&coordinator, 1).await;

        assert_eq!(counts(&coordinator), TaskCounts::new(1, 1, 1));
        assert_eq!(coordinator.read(|c| c.task(&pid("t1")).unwrap().status), TaskStatus::Done);

        api.release(1);
        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(err, MutationError::Api(ApiError::Validation { .. })));
        assert_eq!(counts(&coordinator), TaskCounts::new(2, 1, 0));
        assert_eq!(coordinator.read(|c| c.task(&pid("t1")).unwrap().status), TaskStatus::Todo);
        assert_eq!(coordinator.snapshot(), before);
        assert!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn status_update_success_keeps_new_counters() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api).await;

        let task = coordinator
            .update_task(&pid("t1"), UpdateTaskInput::status(TaskStatus::Done))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(counts(&coordinator), TaskCounts::new(1, 1, 1));
        assert_counts_consistent(&coordinator);
    }

    #[tokio::test]
    async fn create_task_is_promoted_in_place() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.hold();

        let handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.create_task(new_task("Write docs")).await })
        };
        wait_until_pending(&coordinator, 1).await;

        let speculative = task_ids(&coordinator);
        assert_eq!(speculative.len(), 4);
        assert!(speculative[3].starts_with("temp-"));
        assert_eq!(counts(&coordinator), TaskCounts::new(3, 1, 0));
        let author = coordinator.read(|c| c.tasks(&pid("p1"))[3].user.clone());
        assert_eq!(author.unwrap().username, "ann");

        api.release(1);
        let created = handle.await.unwrap().unwrap();

        assert_eq!(task_ids(&coordinator), vec!["t1", "t2", "t3", created.id.as_str()]);
        assert!(!created.id.is_pending());
        assert_eq!(counts(&coordinator), TaskCounts::new(3, 1, 0));
        assert_counts_consistent(&coordinator);
    }

    #[tokio::test]
    async fn failed_create_restores_cache_exactly() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        let before = coordinator.snapshot();
        api.fail_on("Doomed");

        let result = coordinator.create_task(new_task("Doomed")).await;

        assert!(result.is_err());
        assert_eq!(coordinator.snapshot(), before);
    }

    #[tokio::test]
    async fn failed_create_under_unloaded_task_list_restores_cache_exactly() {
        let api = FakeApi::seeded();
        let coordinator = MutationCoordinator::new(api.clone(), Arc::new(FakeIdentity));
        coordinator.load_projects().await.unwrap();
        let before = coordinator.snapshot();
        api.fail_on("Doomed");

        let result = coordinator.create_task(new_task("Doomed")).await;

        assert!(result.is_err());
        assert!(!coordinator.read(|c| c.has_task_list(&pid("p1"))));
        assert_eq!(coordinator.snapshot(), before);
    }

    #[tokio::test]
    async fn failed_upload_to_unloaded_attachment_list_restores_cache_exactly() {
        let api = FakeApi::seeded();
        let coordinator = MutationCoordinator::new(api.clone(), Arc::new(FakeIdentity));
        coordinator.load_projects().await.unwrap();
        let before = coordinator.snapshot();
        api.fail_on("t1");

        let files = vec![
            NewAttachment {
                file_name: "a.txt".into(),
                mime_type: "text/plain".into(),
                bytes: b"a".to_vec(),
            },
            NewAttachment {
                file_name: "b.txt".into(),
                mime_type: "text/plain".into(),
                bytes: b"b".to_vec(),
            },
        ];
        assert!(coordinator.upload_attachments(&pid("t1"), files).await.is_err());

        assert_eq!(coordinator.snapshot(), before);
    }

    #[tokio::test]
    async fn task_under_pending_project_is_rejected_before_any_write() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        let before = coordinator.snapshot();
        let mut input = new_task("Orphan");
        input.project_id = EntityId::Pending("temp-1-0".into());

        let err = coordinator.create_task(input).await.unwrap_err();

        assert!(matches!(err, MutationError::PendingEntity { kind: EntityKind::Project, .. }));
        assert_eq!(coordinator.snapshot(), before);
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mutating_a_pending_task_is_rejected() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;

        let err = coordinator
            .delete_task(&EntityId::Pending("temp-1-0".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::PendingEntity { kind: EntityKind::Task, .. }));
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_reinserts_at_same_position() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        let before = coordinator.snapshot();
        api.fail_on("t2");

        let result = coordinator.delete_task(&pid("t2")).await;

        assert!(result.is_err());
        assert_eq!(task_ids(&coordinator), vec!["t1", "t2", "t3"]);
        assert_eq!(coordinator.snapshot(), before);
    }

    #[tokio::test]
    async fn mixed_outcomes_keep_counters_consistent() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.fail_on("Rejected");
        api.fail_on("t3");

        coordinator.create_task(new_task("Accepted")).await.unwrap();
        assert!(coordinator.create_task(new_task("Rejected")).await.is_err());
        coordinator
            .update_task(&pid("t1"), UpdateTaskInput::status(TaskStatus::InProgress))
            .await
            .unwrap();
        assert!(
            coordinator
                .update_task(&pid("t3"), UpdateTaskInput::status(TaskStatus::Done))
                .await
                .is_err()
        );
        coordinator.delete_task(&pid("t2")).await.unwrap();
        assert!(coordinator.delete_task(&pid("t3")).await.is_err());

        assert_counts_consistent(&coordinator);
        assert_eq!(counts(&coordinator), TaskCounts::new(1, 2, 0));
        assert!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn failed_update_after_delete_leaves_counters_consistent() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.hold();
        api.fail_on("t1");

        let update = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .update_task(&pid("t1"), UpdateTaskInput::status(TaskStatus::Done))
                    .await
            })
        };
        wait_until_pending(&coordinator, 1).await;
        let delete = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.delete_task(&pid("t1")).await })
        };
        wait_until_pending(&coordinator, 2).await;
        assert_counts_consistent(&coordinator);

        // both fail: "t1" is on the failing list for every mutation
        api.release(2);
        assert!(update.await.unwrap().is_err());
        assert!(delete.await.unwrap().is_err());

        assert_counts_consistent(&coordinator);
        assert!(coordinator.read(|c| c.task(&pid("t1")).is_some()));
    }

    #[tokio::test]
    async fn confirmed_project_delete_evicts_its_tasks() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api).await;

        coordinator.delete_project(&pid("p1")).await.unwrap();

        coordinator.read(|c| {
            assert!(c.project(&pid("p1")).is_none());
            assert!(c.task(&pid("t1")).is_none());
            assert!(c.tasks(&pid("p1")).is_empty());
        });
    }

    #[tokio::test]
    async fn task_update_during_failed_project_delete_keeps_counters() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.hold();
        api.fail_on("p1");

        let delete = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.delete_project(&pid("p1")).await })
        };
        wait_until_pending(&coordinator, 1).await;
        assert!(coordinator.read(|c| c.project(&pid("p1")).is_none()));
        let update = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .update_task(&pid("t1"), UpdateTaskInput::status(TaskStatus::Done))
                    .await
            })
        };
        wait_until_pending(&coordinator, 2).await;

        api.release(2);
        assert!(delete.await.unwrap().is_err());
        assert!(update.await.unwrap().is_ok());

        assert_eq!(counts(&coordinator), TaskCounts::new(1, 1, 1));
        assert_counts_consistent(&coordinator);
        assert!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn failed_task_update_during_failed_project_delete_restores_everything() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        let before = coordinator.snapshot();
        api.hold();
        api.fail_on("p1");
        api.fail_on("t3");

        let delete = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.delete_project(&pid("p1")).await })
        };
        wait_until_pending(&coordinator, 1).await;
        let update = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .update_task(&pid("t3"), UpdateTaskInput::status(TaskStatus::Todo))
                    .await
            })
        };
        wait_until_pending(&coordinator, 2).await;

        api.release(2);
        assert!(delete.await.unwrap().is_err());
        assert!(update.await.unwrap().is_err());

        assert_eq!(coordinator.snapshot(), before);
        assert_counts_consistent(&coordinator);
    }

    #[tokio::test]
    async fn failed_project_update_restores_title() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.fail_on("p1");

        let input = UpdateProjectInput {
            title: Some("Renamed".into()),
            ..UpdateProjectInput::default()
        };
        assert!(coordinator.update_project(&pid("p1"), input).await.is_err());

        assert_eq!(coordinator.read(|c| c.project(&pid("p1")).unwrap().title.clone()), "Project p1");
    }

    #[tokio::test]
    async fn created_project_is_appended_and_promoted() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api).await;

        let project = coordinator
            .create_project(CreateProjectInput {
                title: "Launch".into(),
                description: "Q3".into(),
                members: vec!["u1".into()],
            })
            .await
            .unwrap();

        let ids: Vec<String> = coordinator.read(|c| c.projects().iter().map(|p| p.id.to_string()).collect());
        assert_eq!(ids, vec!["p1".to_string(), project.id.to_string()]);
        assert_eq!(coordinator.read(|c| c.project(&project.id).unwrap().task_counts), TaskCounts::default());
    }

    #[tokio::test]
    async fn uploads_are_promoted_by_position() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.hold();
        let files = vec![
            NewAttachment {
                file_name: "a.txt".into(),
                mime_type: "text/plain".into(),
                bytes: b"a".to_vec(),
            },
            NewAttachment {
                file_name: "b.txt".into(),
                mime_type: "text/plain".into(),
                bytes: b"bb".to_vec(),
            },
        ];

        let handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.upload_attachments(&pid("t1"), files).await })
        };
        wait_until_pending(&coordinator, 1).await;
        let speculative = coordinator.read(|c| {
            c.attachments(&pid("t1"))
                .iter()
                .map(|a| (a.id.is_pending(), a.size))
                .collect::<Vec<_>>()
        });
        assert_eq!(speculative, vec![(true, 1), (true, 2)]);

        api.release(1);
        let uploaded = handle.await.unwrap().unwrap();

        let cached: Vec<String> =
            coordinator.read(|c| c.attachments(&pid("t1")).iter().map(|a| a.original_name.clone()).collect());
        assert_eq!(cached, vec!["a.txt", "b.txt"]);
        assert!(uploaded.iter().all(|a| !a.id.is_pending()));
        assert!(coordinator.read(|c| c.attachments(&pid("t1")).iter().all(|a| !a.id.is_pending())));
    }

    #[tokio::test]
    async fn failed_attachment_delete_restores_it() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        let uploaded = coordinator
            .upload_attachments(
                &pid("t1"),
                vec![NewAttachment {
                    file_name: "a.txt".into(),
                    mime_type: "text/plain".into(),
                    bytes: b"a".to_vec(),
                }],
            )
            .await
            .unwrap();
        let id = uploaded[0].id.clone();
        api.fail_on(id.as_str());

        assert!(coordinator.delete_attachment(&id).await.is_err());
        assert!(coordinator.read(|c| c.attachment(&id).is_some()));
    }

    #[tokio::test]
    async fn reset_drops_pending_and_discards_late_answers() {
        let api = FakeApi::seeded();
        let coordinator = hydrated(api.clone()).await;
        api.hold();

        let handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.create_task(new_task("Late")).await })
        };
        wait_until_pending(&coordinator, 1).await;
        coordinator.reset_cache();
        assert!(coordinator.pending().is_empty());

        api.release(1);
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(coordinator.snapshot(), EntityCache::new());
    }
}
