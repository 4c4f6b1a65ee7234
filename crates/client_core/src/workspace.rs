use std::{future::Future, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use shared::{
    contract::{DataClient, DataClientExt},
    domain::{
        Priority, Privacy, Project, ProjectId, Section, SectionId, Task, TaskId, Team, TeamId,
        TeamMember, User, UserId, DEFAULT_SECTION_NAMES,
    },
    error::BackendError,
    protocol::Filter,
    records::{
        Delete, Insert, NewProject, NewSection, NewTask, NewTeam, NewTeamMember, NewUser,
        ProjectPatch, SectionPatch, TaskPatch, TeamPatch, Update,
    },
};
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    auth::{AuthBackend, SessionUser, SignUp},
    cache::{CachePatch, QueryCache, QueryKey},
    error::{ClientError, ValidationError},
    reorder::{DragResult, ReorderEngine, ReorderOutcome},
    repository::Repository,
    validation,
    views::{self, DashboardStats, Page, Pagination, TaskFilter},
};

#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskInput {
    pub project: ProjectId,
    pub section: SectionId,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<UserId>,
}

pub struct Workspace {
    repo: Repository,
    cache: Arc<QueryCache>,
    auth: Arc<dyn AuthBackend>,
    state: Arc<AppState>,
    reorder: ReorderEngine,
}

impl Workspace {
    pub fn new(
        client: Arc<dyn DataClient>,
        auth: Arc<dyn AuthBackend>,
        state: Arc<AppState>,
    ) -> Self {
        let cache = Arc::new(QueryCache::new());
        let repo = Repository::new(client, cache.clone());
        Self {
            reorder: ReorderEngine::new(repo.clone()),
            repo,
            cache,
            auth,
            state,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn client(&self) -> &dyn DataClient {
        self.repo.client()
    }

    /// Applies `patch` to every cached key, then settles each token on the
    /// outcome of `write`.
    async fn with_optimistic<R, F>(
        &self,
        keys: &[QueryKey],
        patch: CachePatch,
        write: F,
    ) -> Result<R, ClientError>
    where
        F: Future<Output = Result<R, BackendError>>,
    {
        let pending = self.cache.begin_write(keys, &patch);
        match write.await {
            Ok(value) => {
                pending.commit();
                self.cache.invalidate(keys);
                Ok(value)
            }
            Err(err) => {
                pending.rollback();
                warn!(?patch, error = %err, "optimistic change rolled back");
                Err(err.into())
            }
        }
    }

    // Session

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, ClientError> {
        let email = validation::credentials(email, password)?;
        let session = self.auth.sign_in(&email, password).await?;
        let user = session.user.clone();
        self.cache.clear();
        self.state.set_session(session).await?;
        Ok(user)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUp, ClientError> {
        let email = validation::credentials(email, password)?;
        let full_name = validation::full_name(full_name)?;
        let signed_up = self.auth.sign_up(&email, password, &full_name).await?;
        if let Some(session) = &signed_up.session {
            self.state.set_session(session.clone()).await?;
        }

        let now = Utc::now();
        self.client()
            .insert(Insert::<User>::one(NewUser {
                id: signed_up.user.id,
                email: signed_up.user.email.clone(),
                full_name: Some(full_name),
                created_at: now,
                updated_at: now,
            }))
            .await?;
        self.cache.invalidate(&[QueryKey::Users]);
        Ok(signed_up)
    }

    /// Ends the session locally even when the backend call fails.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        if let Some(session) = self.state.session().await {
            if let Err(err) = self.auth.sign_out(&session).await {
                warn!(error = %err, "remote sign-out failed; clearing local session anyway");
            }
        }
        self.state.clear().await?;
        self.cache.clear();
        info!("signed out");
        Ok(())
    }

    // Teams and members

    pub async fn teams(&self) -> Result<Vec<Team>, ClientError> {
        let teams = self.repo.teams().await?;
        self.state.reconcile_team(&teams).await?;
        Ok(teams)
    }

    pub async fn select_team(&self, team: TeamId) -> Result<Team, ClientError> {
        let team = self.repo.team(team).await?;
        self.state.set_current_team(Some(team.id)).await?;
        Ok(team)
    }

    pub async fn create_team(&self, name: &str, members: &[UserId]) -> Result<Team, ClientError> {
        let owner = self.state.current_user().await?;
        let name = validation::team_name(name)?;
        let now = Utc::now();

        let team = self
            .client()
            .insert(Insert::<Team>::one(NewTeam {
                name,
                created_by: Some(owner.id),
                created_at: now,
            }))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("team", "new"))?;

        let users = self.repo.users().await?;
        let rows: Vec<NewTeamMember> = validation::team_selection(owner.id, members)
            .into_iter()
            .filter_map(|user_id| {
                let email = if user_id == owner.id {
                    Some(owner.email.clone())
                } else {
                    users
                        .iter()
                        .find(|user| user.id == user_id)
                        .map(|user| user.email.clone())
                };
                if email.is_none() {
                    warn!(%user_id, "skipping unknown user for new team");
                }
                email.map(|email| NewTeamMember {
                    team_id: team.id,
                    user_id: Some(user_id),
                    email,
                    created_at: now,
                })
            })
            .collect();

        let member_count = rows.len();
        let client = self.client();
        let results = join_all(
            rows.into_iter()
                .map(|row| client.insert(Insert::<TeamMember>::one(row))),
        )
        .await;
        self.cache
            .invalidate(&[QueryKey::Teams, QueryKey::TeamMembers(team.id)]);
        for result in results {
            result?;
        }

        if self.state.current_team().await.is_none() {
            self.state.set_current_team(Some(team.id)).await?;
        }
        info!(team_id = %team.id, members = member_count, "team created");
        Ok(team)
    }

    pub async fn delete_team(&self, team: TeamId) -> Result<(), ClientError> {
        let client = self.client();
        self.with_optimistic(
            &[QueryKey::Teams, QueryKey::Projects],
            CachePatch::RemoveTeam(team),
            client.delete(Delete::<Team>::by_id(team)),
        )
        .await?;
        self.cache
            .invalidate(&[QueryKey::AllTasks, QueryKey::TeamMembers(team)]);
        if self.state.current_team().await == Some(team) {
            self.state.set_current_team(None).await?;
        }
        info!(team_id = %team, "team deleted");
        Ok(())
    }

    pub async fn rename_team(&self, team: TeamId, name: &str) -> Result<Team, ClientError> {
        let name = validation::team_name(name)?;
        let client = self.client();
        let rows = self
            .with_optimistic(
                &[QueryKey::Teams, QueryKey::Projects],
                CachePatch::RenameTeam {
                    team,
                    name: name.clone(),
                },
                client.update(Update::<Team>::by_id(team, TeamPatch { name: Some(name) })),
            )
            .await?;
        self.cache
            .invalidate_where(|key| matches!(key, QueryKey::Project(_)));
        info!(team_id = %team, "team renamed");
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("team", team))
    }

    pub async fn team_members(&self, team: TeamId) -> Result<Vec<TeamMember>, ClientError> {
        self.repo.team_members(team).await
    }

    pub async fn member_candidates(
        &self,
        team: TeamId,
        query: &str,
    ) -> Result<Vec<User>, ClientError> {
        let users = self.repo.users().await?;
        let members = self.repo.team_members(team).await?;
        let candidates: Vec<User> = views::member_candidates(&users, &members)
            .into_iter()
            .cloned()
            .collect();
        Ok(views::search_users(&candidates, query)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Adds `users` one after another, skipping ids that are not known.
    pub async fn add_members(
        &self,
        team: TeamId,
        users: &[UserId],
    ) -> Result<Vec<TeamMember>, ClientError> {
        validation::member_selection(users)?;
        let known = self.repo.users().await?;
        let mut added = Vec::with_capacity(users.len());
        for user_id in users {
            let Some(user) = known.iter().find(|user| user.id == *user_id) else {
                warn!(%user_id, "skipping unknown user");
                continue;
            };
            let rows = self
                .client()
                .insert(Insert::<TeamMember>::one(NewTeamMember {
                    team_id: team,
                    user_id: Some(user.id),
                    email: user.email.clone(),
                    created_at: Utc::now(),
                }))
                .await;
            match rows {
                Ok(rows) => added.extend(rows),
                Err(err) => {
                    self.invalidate_membership(team);
                    return Err(err.into());
                }
            }
        }
        self.invalidate_membership(team);
        info!(team_id = %team, added = added.len(), "members added");
        Ok(added)
    }

    pub async fn remove_member(&self, team: TeamId, user: UserId) -> Result<(), ClientError> {
        let owner = self.repo.team(team).await?.created_by;
        if owner == Some(user) {
            return Err(ValidationError::OwnerRequired.into());
        }
        self.client()
            .delete(Delete::<TeamMember>::matching(
                Filter::new().eq("team_id", team).eq("user_id", user),
            ))
            .await?;
        self.invalidate_membership(team);
        Ok(())
    }

    fn invalidate_membership(&self, team: TeamId) {
        self.cache.invalidate(&[
            QueryKey::TeamMembers(team),
            QueryKey::Teams,
            QueryKey::Projects,
        ]);
    }

    // Projects and sections

    pub async fn projects(&self) -> Result<Vec<Project>, ClientError> {
        self.repo.projects().await
    }

    pub async fn current_team_projects(&self) -> Result<Vec<Project>, ClientError> {
        let team = self.state.require_team().await?;
        self.repo.team_projects(team).await
    }

    /// Inserts the project and its default columns. `team` falls back to the
    /// current team.
    pub async fn create_project(
        &self,
        name: &str,
        team: Option<TeamId>,
        privacy: Privacy,
    ) -> Result<(Project, Vec<Section>), ClientError> {
        let name = validation::project_name(name)?;
        let team = match team {
            Some(team) => Some(team),
            None => self.state.current_team().await,
        };
        let team = validation::project_team(team)?;
        let user = self.state.current_user().await?;
        let now = Utc::now();

        let project = self
            .client()
            .insert(Insert::<Project>::one(NewProject {
                name,
                team_id: team,
                privacy,
                created_by: Some(user.id),
                created_at: now,
            }))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("project", "new"))?;

        let defaults = DEFAULT_SECTION_NAMES
            .iter()
            .enumerate()
            .map(|(position, name)| NewSection {
                name: (*name).to_string(),
                project_id: project.id,
                position: position as i64,
                created_at: now,
            })
            .collect();
        let inserted = self.client().insert(Insert::<Section>::many(defaults)).await;
        self.cache.invalidate(&[QueryKey::Projects]);
        self.cache
            .invalidate_where(|key| matches!(key, QueryKey::Sections(_)));
        let mut sections = inserted?;
        sections.sort_by_key(|section| section.position);

        info!(project_id = %project.id, team_id = %team, "project created");
        Ok((project, sections))
    }

    pub async fn delete_project(&self, project: ProjectId) -> Result<(), ClientError> {
        let client = self.client();
        self.with_optimistic(
            &[QueryKey::Projects],
            CachePatch::RemoveProject(project),
            client.delete(Delete::<Project>::by_id(project)),
        )
        .await?;
        self.cache.invalidate(&[
            QueryKey::Project(project),
            QueryKey::Sections(project),
            QueryKey::ProjectTasks(project),
            QueryKey::AllTasks,
        ]);
        info!(project_id = %project, "project deleted");
        Ok(())
    }

    pub async fn update_project(
        &self,
        project: ProjectId,
        patch: ProjectPatch,
    ) -> Result<Project, ClientError> {
        let patch = ProjectPatch {
            name: patch
                .name
                .as_deref()
                .map(validation::project_name)
                .transpose()?,
            privacy: patch.privacy,
        };
        let client = self.client();
        let rows = self
            .with_optimistic(
                &[
                    QueryKey::Projects,
                    QueryKey::Project(project),
                    QueryKey::AllTasks,
                ],
                CachePatch::PatchProject {
                    project,
                    patch: patch.clone(),
                },
                client.update(Update::<Project>::by_id(project, patch)),
            )
            .await?;
        info!(project_id = %project, "project updated");
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("project", project))
    }

    pub async fn create_section(
        &self,
        project: ProjectId,
        name: &str,
    ) -> Result<Section, ClientError> {
        let name = validation::section_name(name)?;
        let existing = self.repo.sections(project).await?;
        let position = existing
            .iter()
            .map(|section| section.position)
            .max()
            .map_or(0, |last| last + 1);

        let section = self
            .client()
            .insert(Insert::<Section>::one(NewSection {
                name,
                project_id: project,
                position,
                created_at: Utc::now(),
            }))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("section", "new"))?;
        self.cache.invalidate(&[QueryKey::Sections(project)]);
        Ok(section)
    }

    pub async fn rename_section(
        &self,
        project: ProjectId,
        section: SectionId,
        name: &str,
    ) -> Result<Section, ClientError> {
        let name = validation::section_name(name)?;
        self.ensure_section_in_project(project, section).await?;
        let client = self.client();
        let rows = self
            .with_optimistic(
                &[
                    QueryKey::Sections(project),
                    QueryKey::ProjectTasks(project),
                    QueryKey::AllTasks,
                ],
                CachePatch::RenameSection {
                    section,
                    name: name.clone(),
                },
                client.update(Update::<Section>::by_id(
                    section,
                    SectionPatch {
                        name: Some(name),
                        ..SectionPatch::default()
                    },
                )),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("section", section))
    }

    pub async fn delete_section(
        &self,
        project: ProjectId,
        section: SectionId,
    ) -> Result<(), ClientError> {
        self.ensure_section_in_project(project, section).await?;
        let client = self.client();
        self.with_optimistic(
            &[QueryKey::Sections(project), QueryKey::ProjectTasks(project)],
            CachePatch::RemoveSection(section),
            client.delete(Delete::<Section>::by_id(section)),
        )
        .await?;
        self.cache.invalidate(&[QueryKey::AllTasks]);
        Ok(())
    }

    pub async fn reorder(
        &self,
        project: ProjectId,
        drag: DragResult,
    ) -> Result<ReorderOutcome, ClientError> {
        self.reorder.apply(project, drag).await
    }

    async fn ensure_section_in_project(
        &self,
        project: ProjectId,
        section: SectionId,
    ) -> Result<(), ClientError> {
        let sections = self.repo.sections(project).await?;
        if sections.iter().any(|s| s.id == section) {
            Ok(())
        } else {
            Err(ValidationError::SectionNotInProject { section, project }.into())
        }
    }

    // Tasks

    pub async fn board(&self, project: ProjectId) -> Result<(Vec<Section>, Vec<Task>), ClientError> {
        let sections = self.repo.sections(project).await?;
        let tasks = self.repo.project_tasks(project).await?;
        Ok((sections, tasks))
    }

    pub async fn create_task(&self, input: NewTaskInput) -> Result<Task, ClientError> {
        let description = validation::task_description(&input.description)?;
        let user = self.state.current_user().await?;
        self.ensure_section_in_project(input.project, input.section)
            .await?;

        let task = self
            .insert_task(NewTask {
                description,
                section_id: input.section,
                project_id: input.project,
                assigned_to: input.assigned_to,
                priority: input.priority,
                due_date: input.due_date,
                completed: false,
                parent_task_id: None,
                is_subtask: false,
                created_by: Some(user.id),
                created_at: Utc::now(),
            })
            .await?;
        info!(task_id = %task.id, project_id = %task.project_id, "task created");
        Ok(task)
    }

    /// Subtasks live in the parent's section with the parent's priority.
    pub async fn create_subtask(
        &self,
        parent: TaskId,
        description: &str,
    ) -> Result<Task, ClientError> {
        let description = validation::subtask_description(description)?;
        let user = self.state.current_user().await?;
        let parent = self.repo.task(parent).await?;
        if parent.is_subtask {
            return Err(ValidationError::Request("subtasks cannot have subtasks".into()).into());
        }

        self.insert_task(NewTask {
            description,
            section_id: parent.section_id,
            project_id: parent.project_id,
            assigned_to: None,
            priority: parent.priority,
            due_date: None,
            completed: false,
            parent_task_id: Some(parent.id),
            is_subtask: true,
            created_by: Some(user.id),
            created_at: Utc::now(),
        })
        .await
    }

    async fn insert_task(&self, row: NewTask) -> Result<Task, ClientError> {
        let project = row.project_id;
        let task = self
            .client()
            .insert(Insert::<Task>::one(row))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("task", "new"))?;
        self.cache
            .invalidate(&[QueryKey::ProjectTasks(project), QueryKey::AllTasks]);
        Ok(task)
    }

    pub async fn update_task(&self, task: TaskId, patch: TaskPatch) -> Result<Task, ClientError> {
        if let Some(description) = &patch.description {
            validation::task_description(description)?;
        }
        let current = self.repo.task(task).await?;
        let client = self.client();
        let rows = self
            .with_optimistic(
                &[QueryKey::ProjectTasks(current.project_id), QueryKey::AllTasks],
                CachePatch::PatchTask {
                    task,
                    patch: patch.clone(),
                },
                client.update(Update::<Task>::by_id(task, patch)),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("task", task))
    }

    pub async fn set_task_completed(
        &self,
        task: TaskId,
        completed: bool,
    ) -> Result<Task, ClientError> {
        self.update_task(
            task,
            TaskPatch {
                completed: Some(completed),
                ..TaskPatch::default()
            },
        )
        .await
    }

    pub async fn assign_task(
        &self,
        task: TaskId,
        assignee: Option<UserId>,
    ) -> Result<Task, ClientError> {
        self.update_task(
            task,
            TaskPatch {
                assigned_to: Some(assignee),
                ..TaskPatch::default()
            },
        )
        .await
    }

    pub async fn delete_task(&self, task: TaskId) -> Result<(), ClientError> {
        let current = self.repo.task(task).await?;
        let client = self.client();
        self.with_optimistic(
            &[QueryKey::ProjectTasks(current.project_id), QueryKey::AllTasks],
            CachePatch::RemoveTask(task),
            client.delete(Delete::<Task>::by_id(task)),
        )
        .await?;
        info!(task_id = %task, "task deleted");
        Ok(())
    }

    /// Filtered, paginated listing across projects. `my_tasks` narrows the
    /// filter to the signed-in user.
    pub async fn list_tasks(
        &self,
        mut filter: TaskFilter,
        my_tasks: bool,
        pagination: Pagination,
        today: NaiveDate,
    ) -> Result<Page<Task>, ClientError> {
        if my_tasks {
            filter.assigned_to = Some(self.state.current_user().await?.id);
        }
        let tasks = self.repo.all_tasks().await?;
        let matching: Vec<Task> = filter
            .apply(&tasks, today)
            .into_iter()
            .filter(|task| views::is_top_level(task))
            .cloned()
            .collect();
        Ok(pagination.paginate(&matching))
    }

    pub async fn dashboard(&self, project: Option<ProjectId>) -> Result<DashboardStats, ClientError> {
        match project {
            None => Ok(DashboardStats::all_projects(&self.repo.all_tasks().await?)),
            Some(project) => {
                let project = self.repo.project(project).await?;
                let sections = self.repo.sections(project.id).await?;
                let tasks = self.repo.project_tasks(project.id).await?;
                Ok(DashboardStats::project(&project, &sections, &tasks))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/workspace_tests.rs"]
mod tests;
