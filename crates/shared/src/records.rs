//! Typed records and the per-operation request variants built on them.
//!
//! A [`Record`] ties a domain struct to its collection, its column schema,
//! its insert payload and its patch payload. [`Insert`], [`Update`],
//! [`Delete`] and [`Select`] lower into an untyped [`DataRequest`] only after
//! their filters have been checked against that schema.

use std::{fmt, marker::PhantomData};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{
        MemberId, Priority, Privacy, Project, ProjectId, Section, SectionId, Task, TaskId, Team,
        TeamId, TeamMember, User, UserId,
    },
    error::BackendError,
    protocol::{Collection, DataRequest, Embed, Filter, Projection},
};

pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Id: Serialize + Copy + Eq + fmt::Display + Send + Sync;
    type New: Serialize + Send + Sync;
    type Patch: Serialize + Send + Sync;

    const COLLECTION: Collection;
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Self::Id;

    fn projection() -> Projection {
        Projection::all()
    }
}

pub struct Insert<T: Record> {
    pub rows: Vec<T::New>,
}

impl<T: Record> Insert<T> {
    pub fn one(row: T::New) -> Self {
        Self { rows: vec![row] }
    }

    pub fn many(rows: Vec<T::New>) -> Self {
        Self { rows }
    }

    pub fn into_request(self) -> Result<DataRequest, BackendError> {
        if self.rows.is_empty() {
            return Err(BackendError::validation(format!(
                "insert into {} has no rows",
                T::COLLECTION
            )));
        }
        let rows = self
            .rows
            .iter()
            .map(|row| object_value::<T>(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DataRequest::Insert {
            collection: T::COLLECTION,
            rows,
        })
    }
}

pub struct Update<T: Record> {
    pub filter: Filter,
    pub patch: T::Patch,
}

impl<T: Record> Update<T> {
    pub fn by_id(id: T::Id, patch: T::Patch) -> Self {
        Self {
            filter: Filter::by_id(id),
            patch,
        }
    }

    pub fn matching(filter: Filter, patch: T::Patch) -> Self {
        Self { filter, patch }
    }

    pub fn into_request(self) -> Result<DataRequest, BackendError> {
        guard_filter::<T>(&self.filter)?;
        let patch = object_value::<T>(&self.patch)?;
        if patch.as_object().is_some_and(|fields| fields.is_empty()) {
            return Err(BackendError::validation(format!(
                "update of {} has no fields",
                T::COLLECTION
            )));
        }
        Ok(DataRequest::Update {
            collection: T::COLLECTION,
            filter: self.filter,
            patch,
        })
    }
}

pub struct Delete<T: Record> {
    pub filter: Filter,
    marker: PhantomData<T>,
}

impl<T: Record> Delete<T> {
    pub fn by_id(id: T::Id) -> Self {
        Self::matching(Filter::by_id(id))
    }

    pub fn matching(filter: Filter) -> Self {
        Self {
            filter,
            marker: PhantomData,
        }
    }

    pub fn into_request(self) -> Result<DataRequest, BackendError> {
        guard_filter::<T>(&self.filter)?;
        Ok(DataRequest::Delete {
            collection: T::COLLECTION,
            filter: self.filter,
        })
    }
}

pub struct Select<T: Record> {
    pub filter: Filter,
    pub projection: Projection,
    marker: PhantomData<T>,
}

impl<T: Record> Select<T> {
    pub fn all() -> Self {
        Self::matching(Filter::new())
    }

    pub fn matching(filter: Filter) -> Self {
        Self {
            filter,
            projection: T::projection(),
            marker: PhantomData,
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn into_request(self) -> Result<DataRequest, BackendError> {
        self.filter.validate(T::COLLECTION, T::COLUMNS)?;
        Ok(DataRequest::Select {
            collection: T::COLLECTION,
            filter: self.filter,
            projection: self.projection,
        })
    }
}

/// Mutations must name their rows; an empty filter would touch every row.
fn guard_filter<T: Record>(filter: &Filter) -> Result<(), BackendError> {
    if filter.is_empty() {
        return Err(BackendError::validation(format!(
            "refusing unfiltered mutation on {}",
            T::COLLECTION
        )));
    }
    filter.validate(T::COLLECTION, T::COLUMNS)
}

fn object_value<T: Record>(payload: &impl Serialize) -> Result<Value, BackendError> {
    let value = serde_json::to_value(payload)?;
    if !value.is_object() {
        return Err(BackendError::validation(format!(
            "payload for {} must be an object",
            T::COLLECTION
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patch type of records that are never updated in place. No value exists,
/// so an `Update` of such a record cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Immutable {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeam {
    pub name: String,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeamMember {
    pub team_id: TeamId,
    pub user_id: Option<UserId>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub team_id: TeamId,
    pub privacy: Privacy,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
}

impl ProjectPatch {
    pub fn apply_to(&self, project: &mut Project) {
        if let Some(name) = &self.name {
            project.name = name.clone();
        }
        if let Some(privacy) = self.privacy {
            project.privacy = privacy;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSection {
    pub name: String,
    pub project_id: ProjectId,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub description: String,
    pub section_id: SectionId,
    pub project_id: ProjectId,
    pub assigned_to: Option<UserId>,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub parent_task_id: Option<TaskId>,
    pub is_subtask: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Partial task update. `Some(None)` on a nullable field clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Option<UserId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(section_id) = self.section_id {
            task.section_id = section_id;
        }
        if let Some(assigned_to) = self.assigned_to {
            task.assigned_to = assigned_to;
            if task.assignee.as_ref().map(|user| user.id) != assigned_to {
                task.assignee = None;
            }
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

impl Record for User {
    type Id = UserId;
    type New = NewUser;
    type Patch = Immutable;

    const COLLECTION: Collection = Collection::Users;
    const COLUMNS: &'static [&'static str] =
        &["id", "email", "full_name", "created_at", "updated_at"];

    fn id(&self) -> UserId {
        self.id
    }
}

impl Record for TeamMember {
    type Id = MemberId;
    type New = NewTeamMember;
    type Patch = Immutable;

    const COLLECTION: Collection = Collection::TeamMembers;
    const COLUMNS: &'static [&'static str] = &["id", "team_id", "user_id", "email", "created_at"];

    fn id(&self) -> MemberId {
        self.id
    }

    fn projection() -> Projection {
        Projection::all().embed(
            Embed::one("users", Collection::Users, "user_id", "id")
                .with(Projection::columns(&["id", "email", "full_name"])),
        )
    }
}

impl Record for Team {
    type Id = TeamId;
    type New = NewTeam;
    type Patch = TeamPatch;

    const COLLECTION: Collection = Collection::Teams;
    const COLUMNS: &'static [&'static str] = &["id", "name", "created_by", "created_at"];

    fn id(&self) -> TeamId {
        self.id
    }

    fn projection() -> Projection {
        Projection::all().embed(
            Embed::many("team_members", Collection::TeamMembers, "id", "team_id")
                .with(TeamMember::projection()),
        )
    }
}

impl Record for Project {
    type Id = ProjectId;
    type New = NewProject;
    type Patch = ProjectPatch;

    const COLLECTION: Collection = Collection::Projects;
    const COLUMNS: &'static [&'static str] =
        &["id", "name", "team_id", "privacy", "created_by", "created_at"];

    fn id(&self) -> ProjectId {
        self.id
    }

    fn projection() -> Projection {
        Projection::all().embed(
            Embed::one("teams", Collection::Teams, "team_id", "id")
                .inner()
                .with(Team::projection()),
        )
    }
}

impl Record for Section {
    type Id = SectionId;
    type New = NewSection;
    type Patch = SectionPatch;

    const COLLECTION: Collection = Collection::Sections;
    const COLUMNS: &'static [&'static str] =
        &["id", "name", "project_id", "position", "created_at"];

    fn id(&self) -> SectionId {
        self.id
    }
}

impl Record for Task {
    type Id = TaskId;
    type New = NewTask;
    type Patch = TaskPatch;

    const COLLECTION: Collection = Collection::Tasks;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "description",
        "section_id",
        "project_id",
        "assigned_to",
        "priority",
        "due_date",
        "completed",
        "parent_task_id",
        "is_subtask",
        "created_by",
        "created_at",
    ];

    fn id(&self) -> TaskId {
        self.id
    }

    /// Board projection: assignee plus the task's own subtasks.
    fn projection() -> Projection {
        Projection::all()
            .embed(
                Embed::one("users", Collection::Users, "assigned_to", "id")
                    .with(Projection::columns(&["id", "email", "full_name"])),
            )
            .embed(
                Embed::many("subtasks", Collection::Tasks, "id", "parent_task_id").with(
                    Projection::columns(&[
                        "id",
                        "description",
                        "completed",
                        "priority",
                        "created_at",
                        "created_by",
                    ]),
                ),
            )
    }
}

impl Task {
    /// Cross-project listing: section name, assignee and project with team.
    pub fn listing_projection() -> Projection {
        Projection::all()
            .embed(
                Embed::one("sections", Collection::Sections, "section_id", "id")
                    .with(Projection::columns(&["id", "name"])),
            )
            .embed(
                Embed::one("users", Collection::Users, "assigned_to", "id")
                    .with(Projection::columns(&["id", "full_name", "email"])),
            )
            .embed(
                Embed::one("projects", Collection::Projects, "project_id", "id").with(
                    Projection::columns(&["id", "name"]).embed(
                        Embed::one("teams", Collection::Teams, "team_id", "id")
                            .with(Projection::columns(&["id", "name"])),
                    ),
                ),
            )
    }
}
