pub mod app_state;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod reorder;
pub mod repository;
pub mod rest;
pub mod validation;
pub mod views;
pub mod workspace;

pub use app_state::AppState;
pub use auth::{AccessToken, AuthBackend, GoTrueAuth, LocalAuth, Session, SessionUser, SignUp};
pub use cache::{CachePatch, PatchToken, PendingWrite, QueryCache, QueryKey};
pub use config::{load_settings, Settings};
pub use error::{ClientError, ValidationError};
pub use reorder::{DragResult, ReorderEngine, ReorderOutcome, TaskSlot};
pub use repository::Repository;
pub use rest::RestDataClient;
pub use views::{DashboardStats, Page, Pagination, TaskFilter, TaskStatus};
pub use workspace::{NewTaskInput, Workspace};
