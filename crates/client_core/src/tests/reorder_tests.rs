use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use super::*;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::{
    contract::DataClient,
    domain::{Priority, Privacy, Project, Team},
    error::BackendError,
    protocol::{DataRequest, Filter},
    records::{Insert, NewProject, NewSection, NewTask, NewTeam, Select},
};
use storage::Storage;

use crate::cache::QueryCache;

/// Storage that records mutations and can fail the n-th update.
struct Recording {
    inner: Storage,
    updates: AtomicUsize,
    fail_update_at: Option<usize>,
    mutations: Mutex<Vec<DataRequest>>,
}

#[async_trait]
impl DataClient for Recording {
    async fn execute(&self, request: DataRequest) -> Result<Vec<Value>, BackendError> {
        if matches!(request, DataRequest::Update { .. }) {
            let n = self.updates.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_update_at {
                return Err(BackendError::remote("connection reset"));
            }
        }
        if request.is_mutation() {
            self.mutations.lock().expect("lock").push(request.clone());
        }
        self.inner.execute(request).await
    }
}

struct Board {
    client: Arc<Recording>,
    engine: ReorderEngine,
    repo: Repository,
    project: ProjectId,
    sections: Vec<Section>,
    tasks: Vec<Task>,
}

impl Board {
    fn mutation_count(&self) -> usize {
        self.client.mutations.lock().expect("lock").len()
    }
}

async fn board_with(fail_update_at: Option<usize>) -> Board {
    let inner = Storage::new("sqlite::memory:").await.expect("storage");
    let now = Utc::now();
    let team = inner
        .insert(Insert::<Team>::one(NewTeam {
            name: "Core".into(),
            created_by: None,
            created_at: now,
        }))
        .await
        .expect("team")
        .remove(0);
    let project = inner
        .insert(Insert::<Project>::one(NewProject {
            name: "Roadmap".into(),
            team_id: team.id,
            privacy: Privacy::Private,
            created_by: None,
            created_at: now,
        }))
        .await
        .expect("project")
        .remove(0);
    let mut sections = inner
        .insert(Insert::<Section>::many(
            ["Backlog", "To Do", "Doing", "Done"]
                .into_iter()
                .enumerate()
                .map(|(position, name)| NewSection {
                    name: name.into(),
                    project_id: project.id,
                    position: position as i64,
                    created_at: now,
                })
                .collect(),
        ))
        .await
        .expect("sections");
    sections.sort_by_key(|s| s.position);

    let new_task = |description: &str, section: SectionId| NewTask {
        description: description.into(),
        section_id: section,
        project_id: project.id,
        assigned_to: None,
        priority: Priority::Medium,
        due_date: None,
        completed: false,
        parent_task_id: None,
        is_subtask: false,
        created_by: None,
        created_at: now,
    };
    let tasks = inner
        .insert(Insert::<Task>::many(vec![
            new_task("design", sections[0].id),
            new_task("estimate", sections[0].id),
            new_task("build", sections[1].id),
        ]))
        .await
        .expect("tasks");

    let client = Arc::new(Recording {
        inner,
        updates: AtomicUsize::new(0),
        fail_update_at,
        mutations: Mutex::new(Vec::new()),
    });
    let dyn_client: Arc<dyn DataClient> = client.clone();
    let repo = Repository::new(dyn_client, Arc::new(QueryCache::new()));
    Board {
        engine: ReorderEngine::new(repo.clone()),
        client,
        repo,
        project: project.id,
        sections,
        tasks,
    }
}

async fn stored_sections(board: &Board) -> Vec<Section> {
    let mut rows = board
        .client
        .inner
        .select(Select::<Section>::matching(
            Filter::new().eq("project_id", board.project),
        ))
        .await
        .expect("sections");
    rows.sort_by_key(|s| s.position);
    rows
}

#[tokio::test]
async fn section_drop_rewrites_positions_to_new_indices() {
    let board = board_with(None).await;
    let moved = board.sections[0].id;

    let outcome = board
        .engine
        .apply(
            board.project,
            DragResult::Section {
                section: moved,
                source_index: 0,
                destination_index: Some(2),
            },
        )
        .await
        .expect("reorder");

    let positions = match outcome {
        ReorderOutcome::SectionsReordered(positions) => positions,
        other => panic!("expected a section reorder, got {other:?}"),
    };
    assert_eq!(positions.len(), 4);
    assert_eq!(positions[2], (moved, 2));

    let stored = stored_sections(&board).await;
    let names: Vec<&str> = stored.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["To Do", "Doing", "Backlog", "Done"]);
    let stored_positions: Vec<i64> = stored.iter().map(|s| s.position).collect();
    assert_eq!(stored_positions, [0, 1, 2, 3]);
    assert_eq!(board.mutation_count(), 4);
}

#[tokio::test]
async fn drops_without_movement_touch_nothing() {
    let board = board_with(None).await;

    for drag in [
        DragResult::Section {
            section: board.sections[1].id,
            source_index: 1,
            destination_index: None,
        },
        DragResult::Section {
            section: board.sections[1].id,
            source_index: 1,
            destination_index: Some(1),
        },
        DragResult::Task {
            task: board.tasks[0].id,
            source: TaskSlot {
                section: board.sections[0].id,
                index: 0,
            },
            destination: None,
        },
    ] {
        assert!(drag.is_noop());
        let outcome = board.engine.apply(board.project, drag).await.expect("noop");
        assert_eq!(outcome, ReorderOutcome::Unchanged);
    }
    assert_eq!(board.mutation_count(), 0);
    assert!(board.repo.cache().is_empty());
}

#[tokio::test]
async fn failed_section_write_reports_how_far_it_got() {
    let board = board_with(Some(2)).await;
    board.repo.sections(board.project).await.expect("warm cache");

    let err = board
        .engine
        .apply(
            board.project,
            DragResult::Section {
                section: board.sections[3].id,
                source_index: 3,
                destination_index: Some(0),
            },
        )
        .await
        .expect_err("third write fails");

    match err {
        ClientError::Reorder { applied, total, .. } => {
            assert_eq!(applied, 2);
            assert_eq!(total, 4);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(board
        .repo
        .cache()
        .is_stale(&QueryKey::Sections(board.project)));
    assert_eq!(board.mutation_count(), 2);
}

#[tokio::test]
async fn section_drag_with_mismatched_source_is_rejected() {
    let board = board_with(None).await;
    let err = board
        .engine
        .apply(
            board.project,
            DragResult::Section {
                section: board.sections[0].id,
                source_index: 1,
                destination_index: Some(3),
            },
        )
        .await
        .expect_err("wrong source index");
    assert!(err.is_validation());
    assert_eq!(board.mutation_count(), 0);
}

#[tokio::test]
async fn task_drop_changes_only_the_moved_task() {
    let board = board_with(None).await;
    let moved = board.tasks[1].id;
    let before = board.repo.project_tasks(board.project).await.expect("tasks");

    let outcome = board
        .engine
        .apply(
            board.project,
            DragResult::Task {
                task: moved,
                source: TaskSlot {
                    section: board.sections[0].id,
                    index: 1,
                },
                destination: Some(TaskSlot {
                    section: board.sections[2].id,
                    index: 0,
                }),
            },
        )
        .await
        .expect("move");

    assert_eq!(
        outcome,
        ReorderOutcome::TaskMoved {
            task: moved,
            from: board.sections[0].id,
            to: board.sections[2].id,
        }
    );
    assert_eq!(board.mutation_count(), 1);

    let after = board.repo.project_tasks(board.project).await.expect("tasks");
    for task in &after {
        let prior = before.iter().find(|t| t.id == task.id).expect("same tasks");
        if task.id == moved {
            assert_eq!(task.section_id, board.sections[2].id);
        } else {
            assert_eq!(task.section_id, prior.section_id);
        }
    }
}

#[tokio::test]
async fn task_can_be_appended_to_another_column_but_not_past_its_end() {
    let board = board_with(None).await;
    let source = TaskSlot {
        section: board.sections[0].id,
        index: 0,
    };

    let err = board
        .engine
        .apply(
            board.project,
            DragResult::Task {
                task: board.tasks[0].id,
                source,
                destination: Some(TaskSlot {
                    section: board.sections[1].id,
                    index: 2,
                }),
            },
        )
        .await
        .expect_err("past the end");
    assert!(err.is_validation());

    board
        .engine
        .apply(
            board.project,
            DragResult::Task {
                task: board.tasks[0].id,
                source,
                destination: Some(TaskSlot {
                    section: board.sections[1].id,
                    index: 1,
                }),
            },
        )
        .await
        .expect("append after last card");
}

#[tokio::test]
async fn task_drop_into_foreign_section_is_rejected() {
    let board = board_with(None).await;
    let err = board
        .engine
        .apply(
            board.project,
            DragResult::Task {
                task: board.tasks[2].id,
                source: TaskSlot {
                    section: board.sections[1].id,
                    index: 0,
                },
                destination: Some(TaskSlot {
                    section: SectionId::random(),
                    index: 0,
                }),
            },
        )
        .await
        .expect_err("foreign section");
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::SectionNotInProject { .. })
    ));
    assert_eq!(board.mutation_count(), 0);
}

#[tokio::test]
async fn failed_task_move_rolls_the_board_back() {
    let board = board_with(Some(0)).await;
    let before = board.repo.project_tasks(board.project).await.expect("tasks");

    board
        .engine
        .apply(
            board.project,
            DragResult::Task {
                task: board.tasks[2].id,
                source: TaskSlot {
                    section: board.sections[1].id,
                    index: 0,
                },
                destination: Some(TaskSlot {
                    section: board.sections[3].id,
                    index: 0,
                }),
            },
        )
        .await
        .expect_err("write fails");

    let cached = board
        .repo
        .cache()
        .rows::<Task>(&QueryKey::ProjectTasks(board.project))
        .expect("still cached");
    assert_eq!(cached, before);
}

#[test]
fn splice_moves_one_section_and_keeps_the_rest_in_order() {
    let project = ProjectId::random();
    let sections: Vec<Section> = (0..4)
        .map(|i| Section {
            id: SectionId::random(),
            name: format!("s{i}"),
            project_id: project,
            position: i,
            created_at: None,
        })
        .collect();

    let spliced = splice_sections(sections.clone(), sections[3].id, 3, 1).expect("splice");
    let names: Vec<&str> = spliced.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["s0", "s3", "s1", "s2"]);

    assert!(splice_sections(sections.clone(), sections[0].id, 0, 4).is_err());
    assert!(splice_sections(sections, SectionId::random(), 0, 1).is_err());
}
