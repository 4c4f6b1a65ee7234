use std::{collections::HashSet, fmt};

use chrono::NaiveDate;
use shared::domain::{
    Priority, Project, Section, SectionId, Task, TeamMember, User, UserId, DONE_SECTION_NAME,
};

use crate::error::ValidationError;

pub const ROWS_PER_PAGE_OPTIONS: [usize; 4] = [5, 10, 20, 50];
pub const DEFAULT_ROWS_PER_PAGE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Upcoming,
    Overdue,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::Upcoming,
        TaskStatus::Overdue,
        TaskStatus::Completed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Upcoming => "upcoming",
            TaskStatus::Overdue => "overdue",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Completed wins; otherwise a due date strictly before `today` is overdue.
pub fn task_status(task: &Task, today: NaiveDate) -> TaskStatus {
    if task.completed {
        return TaskStatus::Completed;
    }
    match task.due_date {
        Some(due) if due.date_naive() < today => TaskStatus::Overdue,
        _ => TaskStatus::Upcoming,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub text: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<UserId>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            if !task
                .description
                .to_lowercase()
                .contains(&text.to_lowercase())
            {
                return false;
            }
        }
        if self.status.is_some_and(|status| task_status(task, today) != status) {
            return false;
        }
        if self.priority.is_some_and(|priority| task.priority != priority) {
            return false;
        }
        if self
            .assigned_to
            .is_some_and(|user| task.assigned_to != Some(user))
        {
            return false;
        }
        true
    }

    pub fn apply<'a>(&self, tasks: &'a [Task], today: NaiveDate) -> Vec<&'a Task> {
        tasks.iter().filter(|task| self.matches(task, today)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: usize,
    rows_per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl Pagination {
    pub fn new(page: usize, rows_per_page: usize) -> Result<Self, ValidationError> {
        if page == 0 {
            return Err(ValidationError::PageZero);
        }
        if !ROWS_PER_PAGE_OPTIONS.contains(&rows_per_page) {
            return Err(ValidationError::RowsPerPage(rows_per_page));
        }
        Ok(Self {
            page,
            rows_per_page,
        })
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn rows_per_page(&self) -> usize {
        self.rows_per_page
    }

    /// Never less than one, so an empty list still reads "page 1 of 1".
    pub fn total_pages(&self, len: usize) -> usize {
        len.div_ceil(self.rows_per_page).max(1)
    }

    pub fn paginate<T: Clone>(&self, items: &[T]) -> Page<T> {
        let start = (self.page - 1).saturating_mul(self.rows_per_page);
        let slice = items
            .iter()
            .skip(start)
            .take(self.rows_per_page)
            .cloned()
            .collect();
        Page {
            items: slice,
            page: self.page,
            total_pages: self.total_pages(items.len()),
            total_items: items.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusBuckets<'a> {
    pub upcoming: Vec<&'a Task>,
    pub overdue: Vec<&'a Task>,
    pub completed: Vec<&'a Task>,
}

pub fn bucket_by_status(tasks: &[Task], today: NaiveDate) -> StatusBuckets<'_> {
    let mut buckets = StatusBuckets::default();
    for task in tasks {
        match task_status(task, today) {
            TaskStatus::Upcoming => buckets.upcoming.push(task),
            TaskStatus::Overdue => buckets.overdue.push(task),
            TaskStatus::Completed => buckets.completed.push(task),
        }
    }
    buckets
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardColumn<'a> {
    pub section: &'a Section,
    pub tasks: Vec<&'a Task>,
}

/// Columns in position order with their top-level tasks, highest priority
/// tier first. Equal tiers keep the fetched order.
pub fn board_columns<'a>(sections: &'a [Section], tasks: &'a [Task]) -> Vec<BoardColumn<'a>> {
    let mut ordered: Vec<&Section> = sections.iter().collect();
    ordered.sort_by_key(|section| section.position);
    ordered
        .into_iter()
        .map(|section| {
            let mut cards: Vec<&Task> = tasks
                .iter()
                .filter(|task| is_top_level(task) && task.section_id == section.id)
                .collect();
            cards.sort_by_key(|task| task.priority.tier());
            BoardColumn {
                section,
                tasks: cards,
            }
        })
        .collect()
}

pub fn is_top_level(task: &Task) -> bool {
    !task.is_subtask && task.parent_task_id.is_none()
}

pub fn subtask_progress_label(task: &Task) -> Option<String> {
    let (done, total) = task.subtask_progress();
    (total > 0).then(|| format!("{done}/{total}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardStats {
    pub scope: String,
    pub tasks_completed: usize,
    pub collaborators: usize,
}

impl DashboardStats {
    /// Finished work is a completed task or one sitting in a "Done" section.
    /// Collaborators are the distinct assignees.
    pub fn all_projects(tasks: &[Task]) -> Self {
        let collaborators: HashSet<UserId> =
            tasks.iter().filter_map(|task| task.assigned_to).collect();
        let no_sections = HashSet::new();
        Self {
            scope: "All Projects".to_string(),
            tasks_completed: tasks
                .iter()
                .filter(|task| is_finished(task, &no_sections))
                .count(),
            collaborators: collaborators.len(),
        }
    }

    pub fn project(project: &Project, sections: &[Section], tasks: &[Task]) -> Self {
        let done = done_section_ids(sections);
        Self {
            scope: project.name.clone(),
            tasks_completed: tasks
                .iter()
                .filter(|task| task.project_id == project.id && is_finished(task, &done))
                .count(),
            collaborators: project.member_count(),
        }
    }
}

fn is_finished(task: &Task, done: &HashSet<SectionId>) -> bool {
    if task.completed {
        return true;
    }
    match &task.section {
        Some(section) => section.name == DONE_SECTION_NAME,
        None => done.contains(&task.section_id),
    }
}

fn done_section_ids(sections: &[Section]) -> HashSet<SectionId> {
    sections
        .iter()
        .filter(|section| section.name == DONE_SECTION_NAME)
        .map(|section| section.id)
        .collect()
}

pub fn member_candidates<'a>(users: &'a [User], members: &[TeamMember]) -> Vec<&'a User> {
    users
        .iter()
        .filter(|user| {
            !members.iter().any(|member| {
                member.user_id == Some(user.id) || member.email.eq_ignore_ascii_case(&user.email)
            })
        })
        .collect()
}

pub fn search_users<'a>(users: &'a [User], query: &str) -> Vec<&'a User> {
    let query = query.trim().to_lowercase();
    users
        .iter()
        .filter(|user| {
            query.is_empty()
                || user.email.to_lowercase().contains(&query)
                || user
                    .full_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(&query))
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
