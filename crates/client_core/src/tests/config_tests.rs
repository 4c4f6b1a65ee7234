use std::collections::HashMap;

use super::*;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_apply_without_file_or_env() {
    let settings = load_settings_from(None, env_from(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    assert!(settings.session_path.ends_with("session.json"));
}

#[test]
fn file_values_override_defaults() {
    let file = r#"
backend_url = "https://demo.example.co"
api_key = "anon-key"
session_path = "/tmp/board/session.json"
request_timeout_secs = 5
database_url = "sqlite://./other.db"
"#;
    let settings = load_settings_from(Some(file), env_from(&[]));
    assert_eq!(settings.backend_url, "https://demo.example.co");
    assert_eq!(settings.api_key, "anon-key");
    assert_eq!(settings.session_path, PathBuf::from("/tmp/board/session.json"));
    assert_eq!(settings.request_timeout_secs, 5);
    assert_eq!(settings.database_url, "sqlite://./other.db");
}

#[test]
fn env_overrides_file_and_app_prefix_wins() {
    let file = r#"backend_url = "https://file.example.co""#;
    let settings = load_settings_from(
        Some(file),
        env_from(&[
            ("TASKBOARD_BACKEND_URL", "https://env.example.co"),
            ("APP__BACKEND_URL", "https://app.example.co"),
            ("TASKBOARD_API_KEY", "env-key"),
            ("APP__REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]),
    );
    assert_eq!(settings.backend_url, "https://app.example.co");
    assert_eq!(settings.api_key, "env-key");
    assert_eq!(settings.request_timeout_secs, 30);
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let settings = load_settings_from(Some("backend_url = ["), env_from(&[]));
    assert_eq!(settings.backend_url, Settings::default().backend_url);
}

#[test]
fn backend_url_must_be_http() {
    let mut settings = Settings::default();
    assert!(settings.backend_url().is_ok());

    settings.backend_url = "ftp://files.example.co".into();
    assert!(matches!(settings.backend_url(), Err(ClientError::Config(_))));

    settings.backend_url = "not a url".into();
    assert!(settings.backend_url().is_err());
}

#[test]
fn zero_timeout_is_clamped() {
    let settings = Settings {
        request_timeout_secs: 0,
        ..Settings::default()
    };
    assert_eq!(settings.request_timeout(), Duration::from_secs(1));
}

#[test]
fn database_urls_are_normalized() {
    assert_eq!(normalize_database_url(""), Settings::default().database_url);
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("sqlite:data\\board.db"), "sqlite://data/board.db");
    assert_eq!(normalize_database_url("./board.db"), "sqlite://./board.db");
    assert_eq!(normalize_database_url("sqlite://x.db"), "sqlite://x.db");
}
