use std::sync::Arc;

use super::*;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    Router,
};
use serde_json::json;
use shared::{
    contract::DataClientExt,
    domain::{Section, SectionId, Task, TaskId},
    protocol::Collection,
    records::{Delete, Insert, NewSection, Select, SectionPatch, Update},
};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct Captured {
    method: String,
    path: String,
    query: String,
    headers: HeaderMap,
    body: String,
}

#[derive(Clone)]
struct ServerState {
    seen: Arc<Mutex<Vec<Captured>>>,
    status: StatusCode,
    reply: String,
}

async fn record(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, [(&'static str, &'static str); 1], String) {
    state.seen.lock().await.push(Captured {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers,
        body,
    });
    (
        state.status,
        [("content-type", "application/json")],
        state.reply.clone(),
    )
}

async fn spawn_backend(
    status: StatusCode,
    reply: Value,
) -> std::io::Result<(String, Arc<Mutex<Vec<Captured>>>)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = ServerState {
        seen: seen.clone(),
        status,
        reply: reply.to_string(),
    };
    let app = Router::new().fallback(record).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), seen))
}

fn client_for(base: &str, token: AccessToken) -> RestDataClient {
    RestDataClient::new(
        Client::new(),
        Url::parse(base).expect("url"),
        "anon-key",
        token,
    )
}

fn section_row(id: SectionId, position: i64) -> Value {
    json!({
        "id": id,
        "name": "Backlog",
        "project_id": uuid::Uuid::new_v4(),
        "position": position,
    })
}

#[test]
fn projections_render_postgrest_select_syntax() {
    let rendered = render_projection(&Task::listing_projection());
    assert!(rendered.starts_with('*'));
    assert!(rendered.contains("sections:sections!section_id(id,name)"));
    assert!(rendered.contains("projects:projects!project_id("));

    let inner = Projection::columns(&["id"]).embed(
        Embed::one("teams", Collection::Teams, "team_id", "id")
            .inner()
            .with(Projection::columns(&["name"])),
    );
    assert_eq!(render_projection(&inner), "id,teams:teams!team_id!inner(name)");
}

#[test]
fn filters_render_as_eq_and_is_null() {
    let section = SectionId::random();
    let pairs = render_filter(
        &Filter::new()
            .eq("section_id", section)
            .eq("completed", false)
            .eq("assigned_to", Value::Null),
    );
    assert!(pairs.contains(&("section_id".to_string(), format!("eq.{section}"))));
    assert!(pairs.contains(&("completed".to_string(), "eq.false".to_string())));
    assert!(pairs.contains(&("assigned_to".to_string(), "is.null".to_string())));
}

#[tokio::test]
async fn select_sends_projection_filter_and_credentials() {
    let id = SectionId::random();
    let (url, seen) = spawn_backend(StatusCode::OK, json!([section_row(id, 0)]))
        .await
        .expect("spawn backend");
    let token = AccessToken::default();
    token.set(Some("user-jwt".into()));
    let client = client_for(&url, token);

    let rows = client
        .select(Select::<Section>::matching(Filter::by_id(id)))
        .await
        .expect("select");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);

    let seen = seen.lock().await;
    let request = &seen[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/rest/v1/sections");
    assert!(request.query.contains("select="));
    assert!(request.query.contains(&format!("id=eq.{id}")));
    assert_eq!(request.headers["apikey"], "anon-key");
    assert_eq!(request.headers["authorization"], "Bearer user-jwt");
}

#[tokio::test]
async fn anonymous_requests_fall_back_to_the_api_key() {
    let (url, seen) = spawn_backend(StatusCode::OK, json!([]))
        .await
        .expect("spawn backend");
    let client = client_for(&url, AccessToken::default());
    client
        .select(Select::<Section>::all())
        .await
        .expect("select");
    assert_eq!(seen.lock().await[0].headers["authorization"], "Bearer anon-key");
}

#[tokio::test]
async fn mutations_ask_for_representation() {
    let id = SectionId::random();
    let (url, seen) = spawn_backend(StatusCode::CREATED, json!([section_row(id, 4)]))
        .await
        .expect("spawn backend");
    let client = client_for(&url, AccessToken::default());

    let inserted = client
        .insert(Insert::<Section>::one(NewSection {
            name: "Backlog".into(),
            project_id: shared::domain::ProjectId::random(),
            position: 4,
            created_at: chrono::Utc::now(),
        }))
        .await
        .expect("insert");
    assert_eq!(inserted[0].position, 4);

    client
        .update(Update::<Section>::by_id(
            id,
            SectionPatch {
                position: Some(1),
                ..SectionPatch::default()
            },
        ))
        .await
        .expect("update");

    client
        .delete(Delete::<Task>::by_id(TaskId::random()))
        .await
        .expect("delete");

    let seen = seen.lock().await;
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].headers["prefer"], "return=representation");
    let posted: Value = serde_json::from_str(&seen[0].body).expect("json body");
    assert!(posted.is_array());

    assert_eq!(seen[1].method, "PATCH");
    assert_eq!(seen[1].headers["prefer"], "return=representation");
    assert!(seen[1].query.contains(&format!("id=eq.{id}")));
    let patch: Value = serde_json::from_str(&seen[1].body).expect("json body");
    assert_eq!(patch, json!({ "position": 1 }));

    assert_eq!(seen[2].method, "DELETE");
    assert_eq!(seen[2].path, "/rest/v1/tasks");
}

#[tokio::test]
async fn error_bodies_map_to_codes_and_messages() {
    let (url, _) = spawn_backend(
        StatusCode::CONFLICT,
        json!({
            "code": "23505",
            "message": "duplicate key value",
            "details": "Key (id) already exists.",
            "hint": null,
        }),
    )
    .await
    .expect("spawn backend");
    let client = client_for(&url, AccessToken::default());

    let err = client
        .select(Select::<Section>::all())
        .await
        .expect_err("conflict");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(err.message.starts_with("[23505] duplicate key value"));
    assert!(err.message.contains("Key (id) already exists."));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");

    let client = client_for(&format!("http://{addr}"), AccessToken::default());
    let err = client
        .select(Select::<Section>::all())
        .await
        .expect_err("nobody listening");
    assert_eq!(err.code, ErrorCode::Transport);
}

#[test]
fn base_urls_gain_a_trailing_slash() {
    let url = with_trailing_slash(Url::parse("https://x.example.co/base").expect("url"));
    assert_eq!(url.as_str(), "https://x.example.co/base/");
    let root = with_trailing_slash(Url::parse("https://x.example.co").expect("url"));
    assert_eq!(root.as_str(), "https://x.example.co/");
}
