use std::path::PathBuf;

use shared::{
    domain::{ProjectId, SectionId},
    error::{BackendError, ErrorCode},
};
use thiserror::Error;

/// Input rejected locally; nothing was sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be between {min} and {max} characters")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
    },
    #[error("{what} index {index} is out of range ({len} available)")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("section {section} does not belong to project {project}")]
    SectionNotInProject {
        section: SectionId,
        project: ProjectId,
    },
    #[error("please select at least one member")]
    NoMembersSelected,
    #[error("the team owner cannot be removed from the team")]
    OwnerRequired,
    #[error("rows per page must be one of 5, 10, 20 or 50, got {0}")]
    RowsPerPage(usize),
    #[error("page numbers start at 1")]
    PageZero,
    #[error("{0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("backend request failed: {0}")]
    Backend(BackendError),
    #[error("not signed in")]
    NotSignedIn,
    #[error("no team selected")]
    NoTeamSelected,
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },
    #[error("section reorder stopped after {applied} of {total} position writes: {source}")]
    Reorder {
        applied: usize,
        total: usize,
        #[source]
        source: BackendError,
    },
    #[error("session file {path}: {message}")]
    Session { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<BackendError> for ClientError {
    fn from(value: BackendError) -> Self {
        // Typed request lowering reports schema violations before any I/O.
        if value.is_local() {
            Self::Validation(ValidationError::Request(value.message))
        } else {
            Self::Backend(value)
        }
    }
}

impl ClientError {
    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ClientError::Validation(_) | ClientError::NoTeamSelected
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(err) => capitalize(&err.to_string()),
            ClientError::Backend(err) => backend_message(err),
            ClientError::NotSignedIn => "Please sign in first.".to_string(),
            ClientError::NoTeamSelected => "Select a team first.".to_string(),
            ClientError::NotFound { what, .. } => format!("That {what} no longer exists."),
            ClientError::Reorder {
                applied,
                total,
                source,
            } => format!(
                "Saved {applied} of {total} section positions before failing: {}",
                backend_message(source)
            ),
            ClientError::Session { .. } => {
                "Could not read or write the saved session; sign in again.".to_string()
            }
            ClientError::Config(message) => format!("Configuration error: {message}"),
        }
    }
}

fn backend_message(err: &BackendError) -> String {
    match err.code {
        ErrorCode::Unauthorized => "Session expired or credentials invalid; sign in again.".into(),
        ErrorCode::Forbidden => "You do not have access to that.".into(),
        ErrorCode::NotFound => "The requested record was not found.".into(),
        ErrorCode::Conflict => format!("Conflicting change: {}", err.message),
        ErrorCode::Transport => "Backend unreachable; check URL/network and retry.".into(),
        _ => format!("Request failed: {}", err.message),
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
