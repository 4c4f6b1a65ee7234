use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use shared::domain::{Team, TeamId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    auth::{AccessToken, Session, SessionUser},
    error::ClientError,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session: Option<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_team: Option<TeamId>,
}

pub struct AppState {
    path: PathBuf,
    token: AccessToken,
    inner: RwLock<PersistedState>,
}

impl AppState {
    /// Loads whatever was saved at `path`; a missing file means signed out.
    pub fn init(path: impl Into<PathBuf>, token: AccessToken) -> Result<Self, ClientError> {
        let path = path.into();
        let persisted = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| ClientError::Session {
                path: path.clone(),
                message: format!("malformed session file: {err}"),
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => PersistedState::default(),
            Err(err) => {
                return Err(ClientError::Session {
                    path: path.clone(),
                    message: err.to_string(),
                })
            }
        };
        token.set(
            persisted
                .session
                .as_ref()
                .map(|session| session.access_token.clone()),
        );
        debug!(
            path = %path.display(),
            signed_in = persisted.session.is_some(),
            "app state loaded"
        );
        Ok(Self {
            path,
            token,
            inner: RwLock::new(persisted),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.read().await.session.clone()
    }

    pub async fn current_user(&self) -> Result<SessionUser, ClientError> {
        self.inner
            .read()
            .await
            .session
            .as_ref()
            .map(|session| session.user.clone())
            .ok_or(ClientError::NotSignedIn)
    }

    pub async fn set_session(&self, session: Session) -> Result<(), ClientError> {
        let mut guard = self.inner.write().await;
        self.token.set(Some(session.access_token.clone()));
        info!(user_id = %session.user.id, "session started");
        guard.session = Some(session);
        persist(&self.path, &guard)
    }

    pub async fn current_team(&self) -> Option<TeamId> {
        self.inner.read().await.current_team
    }

    pub async fn require_team(&self) -> Result<TeamId, ClientError> {
        self.current_team().await.ok_or(ClientError::NoTeamSelected)
    }

    pub async fn set_current_team(&self, team: Option<TeamId>) -> Result<(), ClientError> {
        let mut guard = self.inner.write().await;
        if guard.current_team == team {
            return Ok(());
        }
        guard.current_team = team;
        debug!(team = ?team, "current team changed");
        persist(&self.path, &guard)
    }

    /// Keeps a saved team that still exists; otherwise falls back to the
    /// first team in `teams`.
    pub async fn reconcile_team(&self, teams: &[Team]) -> Result<Option<TeamId>, ClientError> {
        let current = self.current_team().await;
        let selected = match current {
            Some(id) if teams.iter().any(|team| team.id == id) => Some(id),
            _ => teams.first().map(|team| team.id),
        };
        self.set_current_team(selected).await?;
        Ok(selected)
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        let mut guard = self.inner.write().await;
        *guard = PersistedState::default();
        self.token.set(None);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ClientError::Session {
                path: self.path.clone(),
                message: err.to_string(),
            }),
        }
    }
}

fn persist(path: &Path, state: &PersistedState) -> Result<(), ClientError> {
    let session_err = |message: String| ClientError::Session {
        path: path.to_path_buf(),
        message,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| session_err(err.to_string()))?;
    }
    let raw = serde_json::to_string_pretty(state).map_err(|err| session_err(err.to_string()))?;
    fs::write(path, raw).map_err(|err| session_err(err.to_string()))
}

#[cfg(test)]
#[path = "tests/app_state_tests.rs"]
mod tests;
