mod render;

use std::{process::ExitCode, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use client_core::{
    config::{load_settings, normalize_database_url},
    rest::build_http_client,
    views::{self, TaskStatus},
    AccessToken, AppState, AuthBackend, ClientError, DragResult, GoTrueAuth, LocalAuth,
    NewTaskInput, Pagination, RestDataClient, Settings, TaskFilter, TaskSlot, Workspace,
};
use shared::{
    contract::DataClient,
    domain::{Priority, Privacy, ProjectId, SectionId, TaskId, TeamId, UserId},
    records::{ProjectPatch, TaskPatch},
};
use storage::Storage;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "board", about = "Team task board")]
struct Cli {
    /// Use a local SQLite store (`--local=<url>`) instead of the managed
    /// backend. Without a value the configured `database_url` is used.
    #[arg(
        long,
        global = true,
        value_name = "DATABASE_URL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = ""
    )]
    local: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(subcommand)]
    Auth(AuthCommand),
    #[command(subcommand)]
    Team(TeamCommand),
    #[command(subcommand)]
    Member(MemberCommand),
    #[command(subcommand)]
    Project(ProjectCommand),
    #[command(subcommand)]
    Board(BoardCommand),
    #[command(subcommand)]
    Section(SectionCommand),
    #[command(subcommand)]
    Task(TaskCommand),
    /// Completed work, collaborators and status buckets.
    Dashboard {
        #[arg(long)]
        project: Option<ProjectId>,
    },
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long)]
    email: String,
    #[arg(long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    SignIn(Credentials),
    SignUp {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        name: String,
    },
    SignOut,
    Whoami,
}

#[derive(Subcommand, Debug)]
enum TeamCommand {
    List,
    Create {
        name: String,
        /// Additional members; the creator is always included.
        #[arg(long = "member")]
        members: Vec<UserId>,
    },
    Rename {
        team: TeamId,
        name: String,
    },
    Delete {
        team: TeamId,
    },
    /// Make a team the current one.
    Use {
        team: TeamId,
    },
}

#[derive(Subcommand, Debug)]
enum MemberCommand {
    List {
        #[arg(long)]
        team: Option<TeamId>,
    },
    /// Users that are not yet members, optionally narrowed by name or email.
    Candidates {
        #[arg(long)]
        team: Option<TeamId>,
        #[arg(long, default_value = "")]
        query: String,
    },
    Add {
        #[arg(long)]
        team: Option<TeamId>,
        users: Vec<UserId>,
    },
    Remove {
        #[arg(long)]
        team: Option<TeamId>,
        user: UserId,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    List {
        /// Every visible project instead of the current team's.
        #[arg(long)]
        all: bool,
    },
    Create {
        name: String,
        #[arg(long)]
        team: Option<TeamId>,
        #[arg(long, default_value = "private")]
        privacy: Privacy,
    },
    /// Rename a project or change its privacy.
    Update {
        project: ProjectId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        privacy: Option<Privacy>,
    },
    Delete {
        project: ProjectId,
    },
}

#[derive(Subcommand, Debug)]
enum BoardCommand {
    Show { project: ProjectId },
}

#[derive(Subcommand, Debug)]
enum SectionCommand {
    Add {
        project: ProjectId,
        name: String,
    },
    Rename {
        project: ProjectId,
        section: SectionId,
        name: String,
    },
    Delete {
        project: ProjectId,
        section: SectionId,
    },
    /// Move a column to a new index on the board.
    Move {
        project: ProjectId,
        section: SectionId,
        #[arg(long)]
        to: usize,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Add {
        project: ProjectId,
        section: SectionId,
        description: String,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        /// Due day, `YYYY-MM-DD`.
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(long)]
        assign: Option<UserId>,
    },
    Subtask {
        parent: TaskId,
        description: String,
    },
    Edit {
        task: TaskId,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<NaiveDate>,
        #[arg(long)]
        clear_due: bool,
    },
    /// Drop a task into another column.
    Move {
        task: TaskId,
        #[arg(long)]
        to: SectionId,
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    Complete {
        task: TaskId,
        /// Mark the task as not completed.
        #[arg(long)]
        undo: bool,
    },
    Assign {
        task: TaskId,
        /// Omit to unassign.
        user: Option<UserId>,
    },
    Delete {
        task: TaskId,
    },
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        /// Only tasks assigned to the signed-in user.
        #[arg(long)]
        mine: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = views::DEFAULT_ROWS_PER_PAGE)]
        rows: usize,
    },
}

fn parse_priority(raw: &str) -> Result<Priority, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "normal" => Ok(Priority::Unspecified),
        "high" | "medium" | "low" => Ok(Priority::parse(raw)),
        other => Err(format!("unknown priority '{other}' (high, medium, low, none)")),
    }
}

fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(raw)
        .ok_or_else(|| format!("unknown status '{raw}' (upcoming, overdue, completed)"))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            let message = err
                .downcast_ref::<ClientError>()
                .map(ClientError::user_message)
                .unwrap_or_else(|| format!("{err:#}"));
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn connect(local: Option<&str>, settings: &Settings) -> Result<Workspace> {
    let token = AccessToken::default();
    let client: Arc<dyn DataClient>;
    let auth: Arc<dyn AuthBackend>;
    let session_path = match local {
        Some(database_url) => {
            let database_url = if database_url.trim().is_empty() {
                normalize_database_url(&settings.database_url)
            } else {
                normalize_database_url(database_url)
            };
            debug!(%database_url, "using local store");
            let storage = Arc::new(
                Storage::new(&database_url)
                    .await
                    .with_context(|| format!("failed to open {database_url}"))?,
            );
            storage.health_check().await?;
            client = storage.clone();
            auth = Arc::new(LocalAuth::new(storage));
            settings.session_path.with_file_name("session-local.json")
        }
        None => {
            let http = build_http_client(settings)?;
            let base_url = settings.backend_url()?;
            debug!(%base_url, "using managed backend");
            let rest = RestDataClient::new(
                http.clone(),
                base_url.clone(),
                settings.api_key.clone(),
                token.clone(),
            );
            client = Arc::new(rest);
            auth = Arc::new(GoTrueAuth::new(http, base_url, settings.api_key.clone()));
            settings.session_path.clone()
        }
    };
    let state = AppState::init(session_path, token)?;
    Ok(Workspace::new(client, auth, Arc::new(state)))
}

async fn team_or_current(workspace: &Workspace, team: Option<TeamId>) -> Result<TeamId> {
    match team {
        Some(team) => Ok(team),
        None => {
            // Settles the saved selection against the teams that still exist.
            workspace.teams().await?;
            Ok(workspace.state().require_team().await?)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings();
    let workspace = connect(cli.local.as_deref(), &settings).await?;

    match cli.command {
        Command::Auth(command) => auth(&workspace, command).await,
        Command::Team(command) => team(&workspace, command).await,
        Command::Member(command) => member(&workspace, command).await,
        Command::Project(command) => project(&workspace, command).await,
        Command::Board(BoardCommand::Show { project }) => {
            let project = workspace.repository().project(project).await?;
            println!("{} ({})", project.name, project.privacy.label());
            let (sections, tasks) = workspace.board(project.id).await?;
            render::board(&sections, &tasks);
            Ok(())
        }
        Command::Section(command) => section(&workspace, command).await,
        Command::Task(command) => task(&workspace, command).await,
        Command::Dashboard { project } => {
            let stats = workspace.dashboard(project).await?;
            let tasks = match project {
                Some(project) => workspace.board(project).await?.1,
                None => workspace.repository().all_tasks().await?,
            };
            let top_level: Vec<_> = tasks.into_iter().filter(views::is_top_level).collect();
            let buckets = views::bucket_by_status(&top_level, Utc::now().date_naive());
            render::dashboard(&stats, &buckets);
            Ok(())
        }
    }
}

async fn auth(workspace: &Workspace, command: AuthCommand) -> Result<()> {
    match command {
        AuthCommand::SignIn(credentials) => {
            let user = workspace
                .sign_in(&credentials.email, &credentials.password)
                .await?;
            println!("signed in as {} ({})", user.email, user.id);
        }
        AuthCommand::SignUp { credentials, name } => {
            let signed_up = workspace
                .sign_up(&credentials.email, &credentials.password, &name)
                .await?;
            if signed_up.session.is_some() {
                println!("signed up and signed in as {}", signed_up.user.email);
            } else {
                println!(
                    "signed up {}; confirm the address, then run `board auth sign-in`",
                    signed_up.user.email
                );
            }
        }
        AuthCommand::SignOut => {
            workspace.sign_out().await?;
            println!("signed out");
        }
        AuthCommand::Whoami => {
            let user = workspace.state().current_user().await?;
            let team = workspace.state().current_team().await;
            println!(
                "{} <{}> id={} team={}",
                user.full_name.as_deref().unwrap_or("-"),
                user.email,
                user.id,
                team.map_or_else(|| "-".to_string(), |t| t.to_string())
            );
        }
    }
    Ok(())
}

async fn team(workspace: &Workspace, command: TeamCommand) -> Result<()> {
    match command {
        TeamCommand::List => {
            let teams = workspace.teams().await?;
            render::teams(&teams, workspace.state().current_team().await);
        }
        TeamCommand::Create { name, members } => {
            let team = workspace.create_team(&name, &members).await?;
            println!("created team_id={} name={}", team.id, team.name);
        }
        TeamCommand::Rename { team, name } => {
            let team = workspace.rename_team(team, &name).await?;
            println!("renamed team_id={} to {}", team.id, team.name);
        }
        TeamCommand::Delete { team } => {
            workspace.delete_team(team).await?;
            println!("deleted team_id={team}");
        }
        TeamCommand::Use { team } => {
            let team = workspace.select_team(team).await?;
            println!("current team is now {} ({})", team.name, team.id);
        }
    }
    Ok(())
}

async fn member(workspace: &Workspace, command: MemberCommand) -> Result<()> {
    match command {
        MemberCommand::List { team } => {
            let team = team_or_current(workspace, team).await?;
            render::members(&workspace.team_members(team).await?);
        }
        MemberCommand::Candidates { team, query } => {
            let team = team_or_current(workspace, team).await?;
            render::users(&workspace.member_candidates(team, &query).await?);
        }
        MemberCommand::Add { team, users } => {
            let team = team_or_current(workspace, team).await?;
            let added = workspace.add_members(team, &users).await?;
            println!("added {} member(s) to team_id={team}", added.len());
        }
        MemberCommand::Remove { team, user } => {
            let team = team_or_current(workspace, team).await?;
            workspace.remove_member(team, user).await?;
            println!("removed user_id={user} from team_id={team}");
        }
    }
    Ok(())
}

async fn project(workspace: &Workspace, command: ProjectCommand) -> Result<()> {
    match command {
        ProjectCommand::List { all } => {
            let projects = if all {
                workspace.projects().await?
            } else {
                workspace.teams().await?;
                workspace.current_team_projects().await?
            };
            render::projects(&projects);
        }
        ProjectCommand::Create {
            name,
            team,
            privacy,
        } => {
            if team.is_none() {
                workspace.teams().await?;
            }
            let (project, sections) = workspace.create_project(&name, team, privacy).await?;
            println!("created project_id={} name={}", project.id, project.name);
            render::sections(&sections);
        }
        ProjectCommand::Update {
            project,
            name,
            privacy,
        } => {
            let project = workspace
                .update_project(project, ProjectPatch { name, privacy })
                .await?;
            println!(
                "updated project_id={} name={} {}",
                project.id,
                project.name,
                project.privacy.label()
            );
        }
        ProjectCommand::Delete { project } => {
            workspace.delete_project(project).await?;
            println!("deleted project_id={project}");
        }
    }
    Ok(())
}

async fn section(workspace: &Workspace, command: SectionCommand) -> Result<()> {
    match command {
        SectionCommand::Add { project, name } => {
            let section = workspace.create_section(project, &name).await?;
            println!(
                "created section_id={} position={}",
                section.id, section.position
            );
        }
        SectionCommand::Rename {
            project,
            section,
            name,
        } => {
            let section = workspace.rename_section(project, section, &name).await?;
            println!("renamed section_id={} to {}", section.id, section.name);
        }
        SectionCommand::Delete { project, section } => {
            workspace.delete_section(project, section).await?;
            println!("deleted section_id={section}");
        }
        SectionCommand::Move {
            project,
            section,
            to,
        } => {
            let sections = workspace.repository().sections(project).await?;
            let Some(source_index) = sections.iter().position(|s| s.id == section) else {
                bail!("section {section} is not part of project {project}");
            };
            workspace
                .reorder(
                    project,
                    DragResult::Section {
                        section,
                        source_index,
                        destination_index: Some(to),
                    },
                )
                .await?;
            render::sections(&workspace.repository().sections(project).await?);
        }
    }
    Ok(())
}

async fn task(workspace: &Workspace, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Add {
            project,
            section,
            description,
            priority,
            due,
            assign,
        } => {
            let task = workspace
                .create_task(NewTaskInput {
                    project,
                    section,
                    description,
                    priority: priority.unwrap_or_default(),
                    due_date: due.map(start_of_day),
                    assigned_to: assign,
                })
                .await?;
            println!("created task_id={}", task.id);
        }
        TaskCommand::Subtask {
            parent,
            description,
        } => {
            let subtask = workspace.create_subtask(parent, &description).await?;
            println!("created subtask_id={} parent={parent}", subtask.id);
        }
        TaskCommand::Edit {
            task,
            description,
            priority,
            due,
            clear_due,
        } => {
            let due_date = if clear_due {
                Some(None)
            } else {
                due.map(|day| Some(start_of_day(day)))
            };
            let updated = workspace
                .update_task(
                    task,
                    TaskPatch {
                        description,
                        priority,
                        due_date,
                        ..TaskPatch::default()
                    },
                )
                .await?;
            println!("{}", render::task_line(&updated));
        }
        TaskCommand::Move { task, to, index } => {
            let current = workspace.repository().task(task).await?;
            let (sections, tasks) = workspace.board(current.project_id).await?;
            let source_index = views::board_columns(&sections, &tasks)
                .iter()
                .find(|column| column.section.id == current.section_id)
                .and_then(|column| column.tasks.iter().position(|t| t.id == task))
                .context("subtasks move with their parent")?;
            let outcome = workspace
                .reorder(
                    current.project_id,
                    DragResult::Task {
                        task,
                        source: TaskSlot {
                            section: current.section_id,
                            index: source_index,
                        },
                        destination: Some(TaskSlot { section: to, index }),
                    },
                )
                .await?;
            debug!(?outcome, "task move finished");
            println!("moved task_id={task} to section_id={to}");
        }
        TaskCommand::Complete { task, undo } => {
            let updated = workspace.set_task_completed(task, !undo).await?;
            println!("{}", render::task_line(&updated));
        }
        TaskCommand::Assign { task, user } => {
            let updated = workspace.assign_task(task, user).await?;
            match updated.assigned_to {
                Some(user) => println!("task_id={task} assigned to user_id={user}"),
                None => println!("task_id={task} unassigned"),
            }
        }
        TaskCommand::Delete { task } => {
            workspace.delete_task(task).await?;
            println!("deleted task_id={task}");
        }
        TaskCommand::List {
            search,
            status,
            priority,
            mine,
            page,
            rows,
        } => {
            let filter = TaskFilter {
                text: search,
                status,
                priority,
                assigned_to: None,
            };
            let pagination = Pagination::new(page, rows).map_err(ClientError::from)?;
            let today = Utc::now().date_naive();
            let page = workspace.list_tasks(filter, mine, pagination, today).await?;
            render::task_page(&page, today);
        }
    }
    Ok(())
}
