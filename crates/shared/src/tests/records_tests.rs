use serde_json::json;

use crate::{
    domain::{Priority, Privacy, Project, SectionId, Task, TaskId, UserId},
    error::ErrorCode,
    protocol::{DataRequest, Filter},
    records::{Delete, Insert, NewSection, Select, TaskPatch, Update},
};

#[test]
fn priority_round_trips_through_nullable_column() {
    let high: Priority = serde_json::from_value(json!("High")).expect("high");
    assert_eq!(high, Priority::High);

    let missing: Priority = serde_json::from_value(json!(null)).expect("null");
    assert_eq!(missing, Priority::Unspecified);

    let lowercase: Priority = serde_json::from_value(json!("medium")).expect("lower");
    assert_eq!(lowercase, Priority::Medium);

    assert_eq!(serde_json::to_value(Priority::Low).expect("ser"), json!("Low"));
    assert_eq!(
        serde_json::to_value(Priority::Unspecified).expect("ser"),
        json!(null)
    );
}

#[test]
fn priority_tiers_are_fixed() {
    let tiers: Vec<u8> = Priority::ALL.iter().map(|p| p.tier()).collect();
    assert_eq!(tiers, vec![0, 1, 2, 3]);
    assert_eq!(Priority::Unspecified.label(), "Normal");
}

#[test]
fn privacy_accepts_capitalized_legacy_values() {
    let privacy: Privacy = serde_json::from_value(json!("Private")).expect("legacy");
    assert_eq!(privacy, Privacy::Private);
    assert_eq!(
        serde_json::to_value(Privacy::Public).expect("ser"),
        json!("public")
    );
}

#[test]
fn decodes_board_task_row_with_embeds() {
    let section = SectionId::random();
    let row = json!({
        "id": TaskId::random(),
        "description": "write release notes",
        "section_id": section,
        "project_id": uuid::Uuid::new_v4(),
        "assigned_to": null,
        "priority": null,
        "due_date": "2026-03-01T00:00:00+00:00",
        "completed": false,
        "parent_task_id": null,
        "is_subtask": false,
        "users": null,
        "subtasks": [
            { "id": TaskId::random(), "description": "draft", "completed": true, "priority": "Low" },
            { "id": TaskId::random(), "description": "review", "completed": false, "priority": null }
        ]
    });

    let task: Task = serde_json::from_value(row).expect("task");
    assert_eq!(task.section_id, section);
    assert_eq!(task.priority, Priority::Unspecified);
    assert!(task.due_date.is_some());
    assert_eq!(task.subtask_progress(), (1, 2));
}

#[test]
fn project_without_privacy_defaults_to_private() {
    let row = json!({
        "id": uuid::Uuid::new_v4(),
        "name": "Roadmap",
        "team_id": uuid::Uuid::new_v4(),
    });
    let project: Project = serde_json::from_value(row).expect("project");
    assert_eq!(project.privacy, Privacy::Private);
    assert_eq!(project.member_count(), 0);
}

#[test]
fn task_patch_serializes_only_set_fields_and_explicit_nulls() {
    let patch = TaskPatch {
        assigned_to: Some(None),
        completed: Some(true),
        ..TaskPatch::default()
    };
    let value = serde_json::to_value(&patch).expect("patch");
    assert_eq!(value, json!({ "assigned_to": null, "completed": true }));

    let assign = TaskPatch {
        assigned_to: Some(Some(UserId::random())),
        ..TaskPatch::default()
    };
    let value = serde_json::to_value(&assign).expect("patch");
    assert!(value["assigned_to"].is_string());
}

#[test]
fn select_rejects_columns_outside_schema() {
    let err = Select::<Task>::matching(Filter::new().eq("sectionId", "x"))
        .into_request()
        .expect_err("unknown column");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.message.contains("sectionId"));
}

#[test]
fn mutations_refuse_empty_filters() {
    let err = Delete::<Task>::matching(Filter::new())
        .into_request()
        .expect_err("unfiltered delete");
    assert_eq!(err.code, ErrorCode::Validation);

    let err = Update::<Task>::matching(Filter::new(), TaskPatch::default())
        .into_request()
        .expect_err("unfiltered update");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn update_without_fields_is_rejected() {
    let err = Update::<Task>::by_id(TaskId::random(), TaskPatch::default())
        .into_request()
        .expect_err("empty patch");
    assert!(err.message.contains("no fields"));
}

#[test]
fn insert_lowers_to_tagged_request() {
    let project_id = crate::domain::ProjectId::random();
    let request = Insert::<crate::domain::Section>::one(NewSection {
        name: "Backlog".into(),
        project_id,
        position: 3,
        created_at: chrono::Utc::now(),
    })
    .into_request()
    .expect("request");

    assert_eq!(request.method(), "INSERT");
    let wire = serde_json::to_value(&request).expect("wire");
    assert_eq!(wire["method"], json!("INSERT"));
    assert_eq!(wire["collection"], json!("sections"));
    match request {
        DataRequest::Insert { rows, .. } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["position"], json!(3));
        }
        other => panic!("unexpected request {other:?}"),
    }
}

#[test]
fn filter_treats_missing_fields_as_null() {
    let filter = Filter::new().eq("parent_task_id", Option::<TaskId>::None);
    assert!(filter.matches(&json!({ "id": "a" })));
    assert!(!filter.matches(&json!({ "parent_task_id": "b" })));
}
