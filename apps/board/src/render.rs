use chrono::NaiveDate;
use client_core::views::{self, DashboardStats, Page, StatusBuckets};
use shared::domain::{Project, Section, Task, Team, TeamId, TeamMember, User};

pub fn teams(teams: &[Team], current: Option<TeamId>) {
    if teams.is_empty() {
        println!("no teams yet; create one with `board team create <name>`");
        return;
    }
    for team in teams {
        let marker = if Some(team.id) == current { "*" } else { " " };
        println!(
            "{marker} {}  {}  members={}",
            team.id,
            team.name,
            team.members.len()
        );
    }
}

pub fn members(members: &[TeamMember]) {
    for member in members {
        let user = member
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{user}  {}  <{}>", member.display_name(), member.email);
    }
}

pub fn users(users: &[User]) {
    if users.is_empty() {
        println!("no matching users");
    }
    for user in users {
        println!("{}  {}  <{}>", user.id, user.display_name(), user.email);
    }
}

pub fn projects(projects: &[Project]) {
    if projects.is_empty() {
        println!("no projects");
    }
    for project in projects {
        let team = project
            .team
            .as_ref()
            .map(|team| team.name.as_str())
            .unwrap_or("?");
        println!(
            "{}  {}  team={team}  {}",
            project.id,
            project.name,
            project.privacy.label()
        );
    }
}

pub fn sections(sections: &[Section]) {
    for section in sections {
        println!("{}  {}  position={}", section.id, section.name, section.position);
    }
}

pub fn board(sections: &[Section], tasks: &[Task]) {
    for column in views::board_columns(sections, tasks) {
        println!(
            "== {} ({}) [{}] ==",
            column.section.name,
            column.tasks.len(),
            column.section.id
        );
        for (index, task) in column.tasks.iter().enumerate() {
            println!("  {index}. {}", task_line(task));
            for subtask in &task.subtasks {
                let check = if subtask.completed { "x" } else { " " };
                println!("       [{check}] {}  {}", subtask.id, subtask.description);
            }
        }
    }
}

pub fn task_page(page: &Page<Task>, today: NaiveDate) {
    for task in &page.items {
        let status = views::task_status(task, today);
        let place = match (&task.project, &task.section) {
            (Some(project), Some(section)) => format!("{} / {}", project.name, section.name),
            (Some(project), None) => project.name.clone(),
            _ => String::new(),
        };
        println!("{}  [{status}]  {place}", task_line(task));
    }
    println!(
        "page {} of {} ({} tasks)",
        page.page, page.total_pages, page.total_items
    );
}

pub fn dashboard(stats: &DashboardStats, buckets: &StatusBuckets<'_>) {
    println!("{}", stats.scope);
    println!("  tasks completed: {}", stats.tasks_completed);
    println!("  collaborators:   {}", stats.collaborators);
    for (label, tasks) in [
        ("upcoming", &buckets.upcoming),
        ("overdue", &buckets.overdue),
        ("completed", &buckets.completed),
    ] {
        println!("{label} ({})", tasks.len());
        for task in tasks.iter().take(5) {
            println!("  {}", task_line(task));
        }
    }
}

pub fn task_line(task: &Task) -> String {
    let check = if task.completed { "x" } else { " " };
    let mut line = format!(
        "[{check}] {}  {}  ({})",
        task.id,
        task.description,
        task.priority.label()
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!("  due {}", due.format("%Y-%m-%d")));
    }
    if let Some(assignee) = &task.assignee {
        line.push_str(&format!("  @{}", assignee.display_name()));
    }
    if let Some(progress) = views::subtask_progress_label(task) {
        line.push_str(&format!("  {progress}"));
    }
    line
}
