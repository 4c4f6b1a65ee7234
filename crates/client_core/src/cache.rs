//! Last-known server state per query, with optimistic patches layered on top.
//!
//! Every entry holds the confirmed rows from the most recent fetch plus an
//! ordered list of in-flight patches. Readers see the confirmed rows with
//! the patches applied in issue order. A patch is identified by the
//! [`PatchToken`] returned when it was applied; committing folds it into the
//! confirmed rows once every earlier patch has settled, rolling back drops
//! only that patch. Concurrent mutations against the same key therefore
//! never undo each other.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{Project, ProjectId, Section, SectionId, Task, TaskId, Team, TeamId, TeamMember, User},
    records::{ProjectPatch, TaskPatch},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Teams,
    Users,
    Projects,
    Project(ProjectId),
    Sections(ProjectId),
    ProjectTasks(ProjectId),
    AllTasks,
    TeamMembers(TeamId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedData {
    Teams(Vec<Team>),
    Users(Vec<User>),
    Projects(Vec<Project>),
    Sections(Vec<Section>),
    Tasks(Vec<Task>),
    TeamMembers(Vec<TeamMember>),
}

pub trait CacheSlot: Sized {
    fn into_data(rows: Vec<Self>) -> CachedData;
    fn from_data(data: CachedData) -> Option<Vec<Self>>;
}

macro_rules! cache_slot {
    ($record:ty, $variant:ident) => {
        impl CacheSlot for $record {
            fn into_data(rows: Vec<Self>) -> CachedData {
                CachedData::$variant(rows)
            }

            fn from_data(data: CachedData) -> Option<Vec<Self>> {
                match data {
                    CachedData::$variant(rows) => Some(rows),
                    _ => None,
                }
            }
        }
    };
}

cache_slot!(Team, Teams);
cache_slot!(User, Users);
cache_slot!(Project, Projects);
cache_slot!(Section, Sections);
cache_slot!(Task, Tasks);
cache_slot!(TeamMember, TeamMembers);

#[derive(Debug, Clone, PartialEq)]
pub enum CachePatch {
    /// Sets one section's position and re-sorts the list by position.
    SetSectionPosition { section: SectionId, position: i64 },
    RenameSection { section: SectionId, name: String },
    MoveTask { task: TaskId, section: SectionId },
    PatchTask { task: TaskId, patch: TaskPatch },
    RemoveTask(TaskId),
    RemoveSection(SectionId),
    PatchProject { project: ProjectId, patch: ProjectPatch },
    RemoveProject(ProjectId),
    RenameTeam { team: TeamId, name: String },
    RemoveTeam(TeamId),
}

impl CachePatch {
    pub fn apply(&self, data: &mut CachedData) {
        match (self, data) {
            (CachePatch::SetSectionPosition { section, position }, CachedData::Sections(rows)) => {
                if let Some(row) = rows.iter_mut().find(|row| row.id == *section) {
                    row.position = *position;
                }
                rows.sort_by_key(|row| row.position);
            }
            (CachePatch::RenameSection { section, name }, CachedData::Sections(rows)) => {
                if let Some(row) = rows.iter_mut().find(|row| row.id == *section) {
                    row.name = name.clone();
                }
            }
            (CachePatch::RenameSection { section, name }, CachedData::Tasks(rows)) => {
                for embedded in rows.iter_mut().filter_map(|row| row.section.as_mut()) {
                    if embedded.id == *section {
                        embedded.name = name.clone();
                    }
                }
            }
            (CachePatch::MoveTask { task, section }, CachedData::Tasks(rows)) => {
                if let Some(row) = rows.iter_mut().find(|row| row.id == *task) {
                    row.section_id = *section;
                    if row.section.as_ref().is_some_and(|s| s.id != *section) {
                        row.section = None;
                    }
                }
            }
            (CachePatch::PatchTask { task, patch }, CachedData::Tasks(rows)) => {
                for row in rows.iter_mut() {
                    if row.id == *task {
                        patch.apply_to(row);
                    }
                    for subtask in row.subtasks.iter_mut().filter(|st| st.id == *task) {
                        if let Some(description) = &patch.description {
                            subtask.description = description.clone();
                        }
                        if let Some(completed) = patch.completed {
                            subtask.completed = completed;
                        }
                        if let Some(priority) = patch.priority {
                            subtask.priority = priority;
                        }
                    }
                }
            }
            (CachePatch::RemoveTask(task), CachedData::Tasks(rows)) => {
                rows.retain(|row| row.id != *task && row.parent_task_id != Some(*task));
                for row in rows.iter_mut() {
                    row.subtasks.retain(|st| st.id != *task);
                }
            }
            (CachePatch::RemoveSection(section), CachedData::Sections(rows)) => {
                rows.retain(|row| row.id != *section);
            }
            (CachePatch::RemoveSection(section), CachedData::Tasks(rows)) => {
                rows.retain(|row| row.section_id != *section);
            }
            (CachePatch::PatchProject { project, patch }, CachedData::Projects(rows)) => {
                for row in rows.iter_mut().filter(|row| row.id == *project) {
                    patch.apply_to(row);
                }
            }
            (CachePatch::PatchProject { project, patch }, CachedData::Tasks(rows)) => {
                if let Some(name) = &patch.name {
                    for embedded in rows.iter_mut().filter_map(|row| row.project.as_mut()) {
                        if embedded.id == *project {
                            embedded.name = name.clone();
                        }
                    }
                }
            }
            (CachePatch::RemoveProject(project), CachedData::Projects(rows)) => {
                rows.retain(|row| row.id != *project);
            }
            (CachePatch::RenameTeam { team, name }, CachedData::Teams(rows)) => {
                for row in rows.iter_mut().filter(|row| row.id == *team) {
                    row.name = name.clone();
                }
            }
            (CachePatch::RenameTeam { team, name }, CachedData::Projects(rows)) => {
                for embedded in rows.iter_mut().filter_map(|row| row.team.as_mut()) {
                    if embedded.id == *team {
                        embedded.name = name.clone();
                    }
                }
            }
            (CachePatch::RemoveTeam(team), CachedData::Teams(rows)) => {
                rows.retain(|row| row.id != *team);
            }
            (CachePatch::RemoveTeam(team), CachedData::Projects(rows)) => {
                rows.retain(|row| row.team_id != *team);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchToken(u64);

/// The optimistic patches of one in-flight write. Dropping it unsettled,
/// for instance when the write future is cancelled, rolls them back.
#[must_use = "an unsettled write is rolled back when dropped"]
#[derive(Debug)]
pub struct PendingWrite<'a> {
    cache: &'a QueryCache,
    tokens: Vec<PatchToken>,
}

impl PendingWrite<'_> {
    pub fn tokens(&self) -> &[PatchToken] {
        &self.tokens
    }

    pub fn commit(mut self) {
        for token in std::mem::take(&mut self.tokens) {
            self.cache.commit(token);
        }
    }

    pub fn rollback(mut self) {
        for token in std::mem::take(&mut self.tokens) {
            self.cache.rollback(token);
        }
    }
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.cache.rollback(token);
        }
    }
}

#[derive(Debug)]
struct PendingPatch {
    token: PatchToken,
    patch: CachePatch,
    committed: bool,
}

#[derive(Debug)]
struct Entry {
    confirmed: CachedData,
    pending: Vec<PendingPatch>,
    stale: bool,
}

impl Entry {
    fn visible(&self) -> CachedData {
        let mut data = self.confirmed.clone();
        for pending in &self.pending {
            pending.patch.apply(&mut data);
        }
        data
    }

    /// Folds the settled prefix into the confirmed rows.
    fn settle(&mut self) {
        let settled = self
            .pending
            .iter()
            .take_while(|pending| pending.committed)
            .count();
        for pending in self.pending.drain(..settled) {
            pending.patch.apply(&mut self.confirmed);
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<QueryKey, Entry>,
    token_keys: HashMap<PatchToken, QueryKey>,
    next_token: u64,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    state: Mutex<CacheState>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedData> {
        self.state().entries.get(key).map(Entry::visible)
    }

    pub fn fresh(&self, key: &QueryKey) -> Option<CachedData> {
        self.state()
            .entries
            .get(key)
            .filter(|entry| !entry.stale)
            .map(Entry::visible)
    }

    pub fn rows<T: CacheSlot>(&self, key: &QueryKey) -> Option<Vec<T>> {
        self.get(key).and_then(T::from_data)
    }

    pub fn fresh_rows<T: CacheSlot>(&self, key: &QueryKey) -> Option<Vec<T>> {
        self.fresh(key).and_then(T::from_data)
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.state()
            .entries
            .get(key)
            .map_or(true, |entry| entry.stale)
    }

    /// Replaces the confirmed rows; in-flight patches stay on top.
    pub fn store(&self, key: QueryKey, data: CachedData) {
        let mut state = self.state();
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.confirmed = data;
            entry.stale = false;
            return;
        }
        state.entries.insert(
            key,
            Entry {
                confirmed: data,
                pending: Vec::new(),
                stale: false,
            },
        );
    }

    /// Applies `patch` to the visible state of `key`. If nothing is cached
    /// under `key` the token is still issued and settling it does nothing.
    pub fn apply_optimistic(&self, key: QueryKey, patch: CachePatch) -> PatchToken {
        let mut guard = self.state();
        let state = &mut *guard;
        state.next_token += 1;
        let token = PatchToken(state.next_token);
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.pending.push(PendingPatch {
                token,
                patch,
                committed: false,
            });
            state.token_keys.insert(token, key);
            debug!(?key, ?token, "cache: optimistic patch applied");
        }
        token
    }

    /// Applies `patch` to every key in `keys` as one pending write.
    pub fn begin_write(&self, keys: &[QueryKey], patch: &CachePatch) -> PendingWrite<'_> {
        PendingWrite {
            cache: self,
            tokens: keys
                .iter()
                .map(|key| self.apply_optimistic(*key, patch.clone()))
                .collect(),
        }
    }

    /// Patches on `key` that are neither folded in nor rolled back.
    pub fn pending_len(&self, key: &QueryKey) -> usize {
        self.state()
            .entries
            .get(key)
            .map_or(0, |entry| entry.pending.len())
    }

    pub fn commit(&self, token: PatchToken) -> bool {
        let mut state = self.state();
        let Some(key) = state.token_keys.remove(&token) else {
            return false;
        };
        let Some(entry) = state.entries.get_mut(&key) else {
            return false;
        };
        let Some(pending) = entry.pending.iter_mut().find(|p| p.token == token) else {
            return false;
        };
        pending.committed = true;
        entry.settle();
        debug!(?key, ?token, "cache: patch committed");
        true
    }

    pub fn rollback(&self, token: PatchToken) -> bool {
        let mut state = self.state();
        let Some(key) = state.token_keys.remove(&token) else {
            return false;
        };
        let Some(entry) = state.entries.get_mut(&key) else {
            return false;
        };
        let before = entry.pending.len();
        entry.pending.retain(|p| p.token != token);
        let removed = entry.pending.len() != before;
        // Dropping an uncommitted head can unblock committed followers.
        entry.settle();
        debug!(?key, ?token, removed, "cache: patch rolled back");
        removed
    }

    pub fn invalidate(&self, keys: &[QueryKey]) {
        let mut state = self.state();
        for key in keys {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.stale = true;
            }
        }
    }

    pub fn invalidate_where(&self, predicate: impl Fn(&QueryKey) -> bool) {
        let mut state = self.state();
        for (key, entry) in state.entries.iter_mut() {
            if predicate(key) {
                entry.stale = true;
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.token_keys.clear();
        debug!("cache: cleared");
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
