use std::sync::Arc;

use shared::{
    contract::{DataClient, DataClientExt},
    domain::{Project, ProjectId, Section, Task, TaskId, Team, TeamId, TeamMember, User},
    protocol::{Collection, Embed, Filter, Projection},
    records::{Record, Select},
};

use crate::{
    cache::{CacheSlot, QueryCache, QueryKey},
    error::ClientError,
};

#[derive(Clone)]
pub struct Repository {
    client: Arc<dyn DataClient>,
    cache: Arc<QueryCache>,
}

impl Repository {
    pub fn new(client: Arc<dyn DataClient>, cache: Arc<QueryCache>) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &dyn DataClient {
        self.client.as_ref()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Serves `key` from the cache unless it is missing or stale.
    async fn read<T: Record + CacheSlot>(
        &self,
        key: QueryKey,
        select: Select<T>,
        order: impl FnOnce(&mut Vec<T>),
    ) -> Result<Vec<T>, ClientError> {
        if let Some(rows) = self.cache.fresh_rows::<T>(&key) {
            return Ok(rows);
        }
        let mut rows = self.client.select(select).await?;
        order(&mut rows);
        self.cache.store(key, T::into_data(rows.clone()));
        Ok(self.cache.rows::<T>(&key).unwrap_or(rows))
    }

    pub async fn teams(&self) -> Result<Vec<Team>, ClientError> {
        self.read(QueryKey::Teams, Select::<Team>::all(), |_| {})
            .await
    }

    pub async fn users(&self) -> Result<Vec<User>, ClientError> {
        self.read(QueryKey::Users, Select::<User>::all(), |_| {})
            .await
    }

    pub async fn projects(&self) -> Result<Vec<Project>, ClientError> {
        self.read(QueryKey::Projects, Select::<Project>::all(), |_| {})
            .await
    }

    pub async fn team_projects(&self, team: TeamId) -> Result<Vec<Project>, ClientError> {
        let mut projects = self.projects().await?;
        projects.retain(|project| project.team_id == team);
        Ok(projects)
    }

    /// Single project with its team and members; not inner-joined.
    pub async fn project(&self, id: ProjectId) -> Result<Project, ClientError> {
        let projection = Projection::all().embed(
            Embed::one("teams", Collection::Teams, "team_id", "id").with(Team::projection()),
        );
        let rows = self
            .read(
                QueryKey::Project(id),
                Select::<Project>::matching(Filter::by_id(id)).with_projection(projection),
                |_| {},
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("project", id))
    }

    pub async fn sections(&self, project: ProjectId) -> Result<Vec<Section>, ClientError> {
        self.read(
            QueryKey::Sections(project),
            Select::<Section>::matching(Filter::new().eq("project_id", project)),
            |rows| rows.sort_by_key(|section| section.position),
        )
        .await
    }

    pub async fn project_tasks(&self, project: ProjectId) -> Result<Vec<Task>, ClientError> {
        self.read(
            QueryKey::ProjectTasks(project),
            Select::<Task>::matching(Filter::new().eq("project_id", project)),
            |_| {},
        )
        .await
    }

    pub async fn all_tasks(&self) -> Result<Vec<Task>, ClientError> {
        self.read(
            QueryKey::AllTasks,
            Select::<Task>::all().with_projection(Task::listing_projection()),
            |_| {},
        )
        .await
    }

    pub async fn team_members(&self, team: TeamId) -> Result<Vec<TeamMember>, ClientError> {
        self.read(
            QueryKey::TeamMembers(team),
            Select::<TeamMember>::matching(Filter::new().eq("team_id", team)),
            |_| {},
        )
        .await
    }

    pub async fn task(&self, id: TaskId) -> Result<Task, ClientError> {
        self.client
            .select(Select::<Task>::matching(Filter::by_id(id)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("task", id))
    }

    pub async fn team(&self, id: TeamId) -> Result<Team, ClientError> {
        self.teams()
            .await?
            .into_iter()
            .find(|team| team.id == id)
            .ok_or_else(|| ClientError::not_found("team", id))
    }
}
