use std::{fs, path::PathBuf, time::Duration};

use url::Url;

use crate::error::ClientError;

pub const SETTINGS_FILE: &str = "taskboard.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub api_key: String,
    pub session_path: PathBuf,
    pub request_timeout_secs: u64,
    pub database_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:54321".into(),
            api_key: String::new(),
            session_path: default_session_path(),
            request_timeout_secs: 30,
            database_url: "sqlite://./data/taskboard.db".into(),
        }
    }
}

impl Settings {
    pub fn backend_url(&self) -> Result<Url, ClientError> {
        let url = Url::parse(self.backend_url.trim()).map_err(|err| {
            ClientError::Config(format!("backend url '{}': {err}", self.backend_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "backend url '{}' must use http or https",
                self.backend_url
            )));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

pub fn load_settings() -> Settings {
    let raw = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file, then the environment.
pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file_contents {
        if let Ok(file_cfg) = toml::from_str::<toml::Table>(raw) {
            if let Some(v) = file_cfg.get("backend_url").and_then(|v| v.as_str()) {
                settings.backend_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("api_key").and_then(|v| v.as_str()) {
                settings.api_key = v.to_string();
            }
            if let Some(v) = file_cfg.get("session_path").and_then(|v| v.as_str()) {
                settings.session_path = PathBuf::from(v);
            }
            if let Some(v) = file_cfg.get("database_url").and_then(|v| v.as_str()) {
                settings.database_url = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("request_timeout_secs")
                .and_then(|v| v.as_integer())
                .and_then(|v| u64::try_from(v).ok())
            {
                settings.request_timeout_secs = v;
            }
        }
    }

    if let Some(v) = env("TASKBOARD_BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = env("APP__BACKEND_URL") {
        settings.backend_url = v;
    }

    if let Some(v) = env("TASKBOARD_API_KEY") {
        settings.api_key = v;
    }
    if let Some(v) = env("APP__API_KEY") {
        settings.api_key = v;
    }

    if let Some(v) = env("TASKBOARD_SESSION_PATH") {
        settings.session_path = PathBuf::from(v);
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }

    settings
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|base| base.join("taskboard"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("session.json")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
