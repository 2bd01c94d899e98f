//! Undoable cache writes.
//!
//! Every speculative write is a [`CacheOp`]. Applying one returns its inverse,
//! which only touches what the op touched: an insert is undone by removing that
//! id, a patch by restoring the fields it changed, a removal by reinserting the
//! captured entity at its captured position. Task ops carry their counter
//! adjustment with them, so an inverse that turns into a no-op (the task is gone)
//! leaves the counters alone as well.
//!
//! A removed project's counters stay in the cache until the project comes back
//! or its delete is confirmed, and task writes keep landing on them meanwhile.
//! An insert that had to create an index list marks its inverse to drop that list
//! again once it is empty.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use taskdeck_common::{Attachment, EntityId, Project, Task, TaskStatus, User};
use tracing::debug;

use super::EntityCache;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub members: Option<Vec<User>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    InsertProject {
        project: Project,
        index: usize,
    },
    RemoveProject {
        id: EntityId,
    },
    PatchProject {
        id: EntityId,
        patch: ProjectPatch,
    },
    /// Also bumps the owning project's counter for the task's status.
    /// `attachments` is `None` when the task's attachment list was never loaded.
    InsertTask {
        task: Task,
        index: usize,
        attachments: Option<Vec<Attachment>>,
    },
    /// Also drops the task's attachments and decrements its project's counter.
    RemoveTask {
        id: EntityId,
        prune_list: bool,
    },
    /// A status change moves one unit between the project's counters.
    PatchTask {
        id: EntityId,
        patch: TaskPatch,
    },
    InsertAttachment {
        attachment: Attachment,
        index: usize,
    },
    RemoveAttachment {
        id: EntityId,
        prune_list: bool,
    },
}

/// Inverse ops for a batch, in application order. Plain data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Undo(Vec<CacheOp>);

impl Undo {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ops(&self) -> &[CacheOp] {
        &self.0
    }
}

fn swap<T>(slot: &mut T, value: Option<T>) -> Option<T> {
    value.map(|v| std::mem::replace(slot, v))
}

fn insert_at(list: &mut Vec<EntityId>, index: usize, id: EntityId) -> usize {
    let index = index.min(list.len());
    list.insert(index, id);
    index
}

fn remove_from(list: &mut Vec<EntityId>, id: &EntityId) -> Option<usize> {
    let index = list.iter().position(|x| x == id)?;
    list.remove(index);
    Some(index)
}

/// Remove `id` from the list under `key`, dropping the list if `prune` and it ended up empty.
fn remove_indexed(
    lists: &mut HashMap<EntityId, Vec<EntityId>>,
    key: &EntityId,
    id: &EntityId,
    prune: bool,
) -> usize {
    let Some(list) = lists.get_mut(key) else {
        return usize::MAX;
    };
    let index = remove_from(list, id).unwrap_or(usize::MAX);
    if prune && list.is_empty() {
        lists.remove(key);
    }
    index
}

impl EntityCache {
    /// Apply a batch and return what undoes it.
    pub(crate) fn apply_all(&mut self, ops: Vec<CacheOp>) -> Undo {
        Undo(ops.into_iter().filter_map(|op| self.apply(op)).collect())
    }

    /// Undo a batch, last op first.
    pub(crate) fn revert(&mut self, undo: Undo) {
        for op in undo.0.into_iter().rev() {
            self.apply(op);
        }
    }

    /// Apply one op. `None` means it was a no-op and needs no undo.
    pub(crate) fn apply(&mut self, op: CacheOp) -> Option<CacheOp> {
        debug!(?op, "Applying cache op");
        match op {
            CacheOp::InsertProject { mut project, index } => {
                if self.projects.contains_key(&project.id) {
                    return None;
                }
                let id = project.id.clone();
                if let Some(counts) = self.detached_counts.remove(&id) {
                    project.task_counts = counts;
                }
                insert_at(&mut self.project_order, index, id.clone());
                self.projects.insert(id.clone(), project);
                Some(CacheOp::RemoveProject { id })
            }
            CacheOp::RemoveProject { id } => {
                let project = self.projects.remove(&id)?;
                let index = remove_from(&mut self.project_order, &id).unwrap_or(usize::MAX);
                self.detached_counts.insert(id, project.task_counts);
                Some(CacheOp::InsertProject { project, index })
            }
            CacheOp::PatchProject { id, patch } => {
                let project = self.projects.get_mut(&id)?;
                let previous = ProjectPatch {
                    title: swap(&mut project.title, patch.title),
                    description: swap(&mut project.description, patch.description),
                    members: swap(&mut project.members, patch.members),
                };
                Some(CacheOp::PatchProject { id, patch: previous })
            }
            CacheOp::InsertTask {
                task,
                index,
                attachments,
            } => {
                if self.tasks.contains_key(&task.id) {
                    return None;
                }
                let id = task.id.clone();
                self.adjust_counts(&task.project_id, task.status, 1);
                let prune_list = !self.task_order.contains_key(&task.project_id);
                let order = self.task_order.entry(task.project_id.clone()).or_default();
                insert_at(order, index, id.clone());
                if let Some(attachments) = attachments {
                    let order = self.attachment_order.entry(id.clone()).or_default();
                    for attachment in attachments {
                        order.push(attachment.id.clone());
                        self.attachments.insert(attachment.id.clone(), attachment);
                    }
                }
                self.tasks.insert(id.clone(), task);
                Some(CacheOp::RemoveTask { id, prune_list })
            }
            CacheOp::RemoveTask { id, prune_list } => {
                let task = self.tasks.remove(&id)?;
                let index = remove_indexed(&mut self.task_order, &task.project_id, &id, prune_list);
                let attachments = self.attachment_order.remove(&id).map(|ids| {
                    ids.iter()
                        .filter_map(|aid| self.attachments.remove(aid))
                        .collect()
                });
                self.adjust_counts(&task.project_id, task.status, -1);
                Some(CacheOp::InsertTask {
                    task,
                    index,
                    attachments,
                })
            }
            CacheOp::PatchTask { id, patch } => {
                let task = self.tasks.get_mut(&id)?;
                let project_id = task.project_id.clone();
                let old_status = task.status;
                let previous = TaskPatch {
                    title: swap(&mut task.title, patch.title),
                    description: swap(&mut task.description, patch.description),
                    status: swap(&mut task.status, patch.status),
                    due_date: swap(&mut task.due_date, patch.due_date),
                };
                let new_status = task.status;
                if old_status != new_status {
                    self.adjust_counts(&project_id, old_status, -1);
                    self.adjust_counts(&project_id, new_status, 1);
                }
                Some(CacheOp::PatchTask { id, patch: previous })
            }
            CacheOp::InsertAttachment { attachment, index } => {
                if self.attachments.contains_key(&attachment.id) {
                    return None;
                }
                let id = attachment.id.clone();
                let prune_list = !self.attachment_order.contains_key(&attachment.task_id);
                let order = self
                    .attachment_order
                    .entry(attachment.task_id.clone())
                    .or_default();
                insert_at(order, index, id.clone());
                self.attachments.insert(id.clone(), attachment);
                Some(CacheOp::RemoveAttachment { id, prune_list })
            }
            CacheOp::RemoveAttachment { id, prune_list } => {
                let attachment = self.attachments.remove(&id)?;
                let index =
                    remove_indexed(&mut self.attachment_order, &attachment.task_id, &id, prune_list);
                Some(CacheOp::InsertAttachment { attachment, index })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::*;
    use taskdeck_common::TaskCounts;

    #[test]
    fn insert_then_revert_restores_cache_exactly() {
        let mut cache = seeded_cache();
        let before = cache.clone();

        let undo = cache.apply_all(vec![CacheOp::InsertTask {
            task: task("temp-1", "p1", TaskStatus::Done),
            index: 0,
            attachments: None,
        }]);
        assert_eq!(cache.project(&pid("p1")).unwrap().task_counts, TaskCounts::new(2, 1, 1));

        cache.revert(undo);
        assert_eq!(cache, before);
    }

    #[test]
    fn remove_task_captures_position_and_attachments() {
        let mut cache = seeded_cache();
        cache.apply(CacheOp::InsertAttachment {
            attachment: attachment("a1", "t2"),
            index: 0,
        });
        let before = cache.clone();

        let undo = cache.apply_all(vec![CacheOp::RemoveTask {
            id: pid("t2"),
            prune_list: false,
        }]);
        assert!(cache.task(&pid("t2")).is_none());
        assert!(cache.attachment(&pid("a1")).is_none());
        assert_eq!(cache.project(&pid("p1")).unwrap().task_counts, TaskCounts::new(1, 1, 0));

        cache.revert(undo);
        assert_eq!(cache, before);
        let order: Vec<_> = cache.tasks(&pid("p1")).iter().map(|t| t.id.as_str().to_string()).collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn patch_task_status_moves_counter_and_inverse_moves_it_back() {
        let mut cache = seeded_cache();
        let undo = cache.apply_all(vec![CacheOp::PatchTask {
            id: pid("t1"),
            patch: TaskPatch {
                status: Some(TaskStatus::Done),
                ..TaskPatch::default()
            },
        }]);
        assert_eq!(cache.project(&pid("p1")).unwrap().task_counts, TaskCounts::new(1, 1, 1));

        cache.revert(undo);
        assert_eq!(cache.project(&pid("p1")).unwrap().task_counts, TaskCounts::new(2, 1, 0));
        assert_eq!(cache.task(&pid("t1")).unwrap().status, TaskStatus::Todo);
    }

    #[test]
    fn inverse_patch_is_noop_once_task_is_gone() {
        let mut cache = seeded_cache();
        let update = cache.apply_all(vec![CacheOp::PatchTask {
            id: pid("t1"),
            patch: TaskPatch {
                status: Some(TaskStatus::Done),
                ..TaskPatch::default()
            },
        }]);
        cache.apply_all(vec![CacheOp::RemoveTask {
            id: pid("t1"),
            prune_list: false,
        }]);
        assert_eq!(cache.project(&pid("p1")).unwrap().task_counts, TaskCounts::new(1, 1, 0));

        cache.revert(update);
        assert_eq!(cache.project(&pid("p1")).unwrap().task_counts, TaskCounts::new(1, 1, 0));
        assert!(cache.task(&pid("t1")).is_none());
    }

    #[test]
    fn project_patch_restores_only_changed_fields() {
        let mut cache = seeded_cache();
        let undo = cache.apply_all(vec![CacheOp::PatchProject {
            id: pid("p1"),
            patch: ProjectPatch {
                title: Some("Renamed".into()),
                ..ProjectPatch::default()
            },
        }]);
        // a concurrent description change that must survive the revert
        cache.apply(CacheOp::PatchProject {
            id: pid("p1"),
            patch: ProjectPatch {
                description: Some("New description".into()),
                ..ProjectPatch::default()
            },
        });

        cache.revert(undo);
        let project = cache.project(&pid("p1")).unwrap();
        assert_eq!(project.title, "Project p1");
        assert_eq!(project.description, "New description");
    }

    #[test]
    fn task_writes_while_project_is_removed_survive_its_reinsertion() {
        let mut cache = seeded_cache();
        let delete = cache.apply_all(vec![CacheOp::RemoveProject { id: pid("p1") }]);

        cache.apply_all(vec![CacheOp::PatchTask {
            id: pid("t1"),
            patch: TaskPatch {
                status: Some(TaskStatus::Done),
                ..TaskPatch::default()
            },
        }]);
        insert_task(&mut cache, "temp-1", "p1", TaskStatus::InProgress);

        cache.revert(delete);
        let statuses: Vec<TaskStatus> = cache.tasks(&pid("p1")).iter().map(|t| t.status).collect();
        let counts = cache.project(&pid("p1")).unwrap().task_counts;
        assert_eq!(counts, TaskCounts::new(1, 2, 1));
        assert_eq!(counts, TaskCounts::tally(&statuses));
    }

    #[test]
    fn remove_then_revert_project_restores_cache_exactly() {
        let mut cache = seeded_cache();
        let before = cache.clone();

        let undo = cache.apply_all(vec![CacheOp::RemoveProject { id: pid("p1") }]);
        cache.revert(undo);

        assert_eq!(cache, before);
    }

    #[test]
    fn revert_drops_index_lists_the_insert_created() {
        let mut cache = EntityCache::new();
        cache.load_projects(vec![project("p1", TaskCounts::default())]);
        let before = cache.clone();

        let undo = cache.apply_all(vec![
            CacheOp::InsertTask {
                task: task("temp-1", "p1", TaskStatus::Todo),
                index: 0,
                attachments: None,
            },
            CacheOp::InsertAttachment {
                attachment: attachment("temp-2", "temp-1"),
                index: 0,
            },
        ]);
        assert!(cache.has_task_list(&pid("p1")));

        cache.revert(undo);
        assert!(!cache.has_task_list(&pid("p1")));
        assert_eq!(cache, before);
    }

    #[test]
    fn revert_keeps_loaded_empty_lists() {
        let mut cache = seeded_cache();
        cache.load_attachments(&pid("t1"), vec![]);
        let before = cache.clone();

        let undo = cache.apply_all(vec![CacheOp::RemoveTask {
            id: pid("t1"),
            prune_list: false,
        }]);
        cache.revert(undo);

        assert_eq!(cache, before);
        assert!(cache.attachments(&pid("t1")).is_empty());
    }

    #[test]
    fn ops_on_missing_entities_are_noops() {
        let mut cache = seeded_cache();
        let before = cache.clone();
        let undo = cache.apply_all(vec![
            CacheOp::RemoveProject { id: pid("nope") },
            CacheOp::RemoveAttachment {
                id: pid("nope"),
                prune_list: false,
            },
            CacheOp::PatchTask {
                id: pid("nope"),
                patch: TaskPatch::default(),
            },
        ]);
        assert!(undo.is_empty());
        assert_eq!(cache, before);
    }
}
