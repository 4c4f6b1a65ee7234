//! Drag-and-drop persistence for the project board.
//!
//! Section drops rewrite every section's position to its index in the new
//! order, one write at a time. Task drops only change the task's section;
//! the order of tasks inside a section is not stored.

use shared::{
    contract::DataClientExt,
    domain::{ProjectId, Section, SectionId, Task, TaskId},
    records::{SectionPatch, TaskPatch, Update},
};
use tracing::{debug, info, warn};

use crate::{
    cache::{CachePatch, QueryKey},
    error::{ClientError, ValidationError},
    repository::Repository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSlot {
    pub section: SectionId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragResult {
    Section {
        section: SectionId,
        source_index: usize,
        destination_index: Option<usize>,
    },
    Task {
        task: TaskId,
        source: TaskSlot,
        destination: Option<TaskSlot>,
    },
}

impl DragResult {
    /// Dropped outside any target, or back where it started.
    pub fn is_noop(&self) -> bool {
        match self {
            DragResult::Section {
                source_index,
                destination_index,
                ..
            } => destination_index.map_or(true, |dest| dest == *source_index),
            DragResult::Task {
                source,
                destination,
                ..
            } => destination.map_or(true, |dest| dest == *source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderOutcome {
    Unchanged,
    /// Final `(section, position)` pairs, in board order.
    SectionsReordered(Vec<(SectionId, i64)>),
    TaskMoved {
        task: TaskId,
        from: SectionId,
        to: SectionId,
    },
}

#[derive(Clone)]
pub struct ReorderEngine {
    repo: Repository,
}

impl ReorderEngine {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn apply(
        &self,
        project: ProjectId,
        drag: DragResult,
    ) -> Result<ReorderOutcome, ClientError> {
        if drag.is_noop() {
            debug!(%project, "reorder: drop without movement ignored");
            return Ok(ReorderOutcome::Unchanged);
        }
        match drag {
            DragResult::Section {
                section,
                source_index,
                destination_index: Some(destination),
            } => {
                self.move_section(project, section, source_index, destination)
                    .await
            }
            DragResult::Task {
                task,
                source,
                destination: Some(destination),
            } => self.move_task(project, task, source, destination).await,
            _ => Ok(ReorderOutcome::Unchanged),
        }
    }

    async fn move_section(
        &self,
        project: ProjectId,
        section: SectionId,
        source_index: usize,
        destination_index: usize,
    ) -> Result<ReorderOutcome, ClientError> {
        let sections = self.repo.sections(project).await?;
        let ordered = splice_sections(sections, section, source_index, destination_index)?;

        let key = QueryKey::Sections(project);
        let cache = self.repo.cache();
        let total = ordered.len();
        let mut positions = Vec::with_capacity(total);

        for (index, row) in ordered.iter().enumerate() {
            let position = index as i64;
            let pending = cache.begin_write(
                &[key],
                &CachePatch::SetSectionPosition {
                    section: row.id,
                    position,
                },
            );
            let write = self
                .repo
                .client()
                .update(Update::<Section>::by_id(
                    row.id,
                    SectionPatch {
                        position: Some(position),
                        ..SectionPatch::default()
                    },
                ))
                .await;
            match write {
                Ok(_) => {
                    pending.commit();
                    positions.push((row.id, position));
                }
                Err(source) => {
                    pending.rollback();
                    cache.invalidate(&[key]);
                    warn!(%project, applied = index, total, error = %source, "reorder: section write failed");
                    return Err(ClientError::Reorder {
                        applied: index,
                        total,
                        source,
                    });
                }
            }
        }

        cache.invalidate(&[key]);
        info!(%project, sections = total, "reorder: section positions rewritten");
        Ok(ReorderOutcome::SectionsReordered(positions))
    }

    async fn move_task(
        &self,
        project: ProjectId,
        task: TaskId,
        source: TaskSlot,
        destination: TaskSlot,
    ) -> Result<ReorderOutcome, ClientError> {
        let sections = self.repo.sections(project).await?;
        if !sections.iter().any(|s| s.id == destination.section) {
            return Err(ValidationError::SectionNotInProject {
                section: destination.section,
                project,
            }
            .into());
        }

        let tasks = self.repo.project_tasks(project).await?;
        let Some(moved) = tasks.iter().find(|t| t.id == task) else {
            return Err(ClientError::not_found("task", task));
        };
        let column_len = |section: SectionId| {
            tasks
                .iter()
                .filter(|t| !t.is_subtask && t.section_id == section)
                .count()
        };
        if moved.section_id != source.section {
            return Err(ValidationError::Request(format!(
                "task {task} is not in section {}",
                source.section
            ))
            .into());
        }
        let source_len = column_len(source.section);
        if source.index >= source_len {
            return Err(ValidationError::IndexOutOfRange {
                what: "source task",
                index: source.index,
                len: source_len,
            }
            .into());
        }
        // Dropping into another column may append after its last card.
        let destination_len = column_len(destination.section);
        let destination_max = if destination.section == source.section {
            destination_len.saturating_sub(1)
        } else {
            destination_len
        };
        if destination.index > destination_max {
            return Err(ValidationError::IndexOutOfRange {
                what: "destination task",
                index: destination.index,
                len: destination_max + 1,
            }
            .into());
        }

        let from = moved.section_id;
        let cache = self.repo.cache();
        let tasks_key = QueryKey::ProjectTasks(project);
        let pending = cache.begin_write(
            &[tasks_key],
            &CachePatch::MoveTask {
                task,
                section: destination.section,
            },
        );
        let write = self
            .repo
            .client()
            .update(Update::<Task>::by_id(
                task,
                TaskPatch {
                    section_id: Some(destination.section),
                    ..TaskPatch::default()
                },
            ))
            .await;

        match write {
            Ok(_) => {
                pending.commit();
                cache.invalidate(&[tasks_key, QueryKey::AllTasks]);
                info!(%project, %task, %from, to = %destination.section, "reorder: task moved");
                Ok(ReorderOutcome::TaskMoved {
                    task,
                    from,
                    to: destination.section,
                })
            }
            Err(err) => {
                pending.rollback();
                warn!(%project, %task, error = %err, "reorder: task move failed");
                Err(err.into())
            }
        }
    }
}

/// Moves `section` from `source_index` to `destination_index` in the
/// position-ordered list.
pub fn splice_sections(
    mut sections: Vec<Section>,
    section: SectionId,
    source_index: usize,
    destination_index: usize,
) -> Result<Vec<Section>, ValidationError> {
    let len = sections.len();
    if source_index >= len || sections[source_index].id != section {
        return Err(ValidationError::IndexOutOfRange {
            what: "source section",
            index: source_index,
            len,
        });
    }
    if destination_index >= len {
        return Err(ValidationError::IndexOutOfRange {
            what: "destination section",
            index: destination_index,
            len,
        });
    }
    let moved = sections.remove(source_index);
    sections.insert(destination_index, moved);
    Ok(sections)
}

#[cfg(test)]
#[path = "tests/reorder_tests.rs"]
mod tests;
