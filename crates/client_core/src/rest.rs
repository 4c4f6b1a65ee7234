use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use shared::{
    contract::DataClient,
    error::{BackendError, ErrorCode},
    protocol::{Columns, DataRequest, Embed, Filter, Projection},
};
use tracing::{debug, warn};
use url::Url;

use crate::{auth::AccessToken, config::Settings, error::ClientError};

pub struct RestDataClient {
    http: Client,
    base_url: Url,
    api_key: String,
    token: AccessToken,
}

#[derive(Debug, Default, Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl RestDataClient {
    pub fn new(http: Client, base_url: Url, api_key: impl Into<String>, token: AccessToken) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
            api_key: api_key.into(),
            token,
        }
    }

    pub fn from_settings(settings: &Settings, token: AccessToken) -> Result<Self, ClientError> {
        let http = build_http_client(settings)?;
        Ok(Self::new(
            http,
            settings.backend_url()?,
            settings.api_key.clone(),
            token,
        ))
    }

    fn collection_url(&self, collection: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(&format!("rest/v1/{collection}"))
            .map_err(|err| BackendError::internal(format!("invalid collection url: {err}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self.token.get().unwrap_or_else(|| self.api_key.clone());
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }
}

pub fn build_http_client(settings: &Settings) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(settings.request_timeout())
        .build()
        .map_err(|err| ClientError::Config(format!("http client: {err}")))
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
pub fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl DataClient for RestDataClient {
    async fn execute(&self, request: DataRequest) -> Result<Vec<Value>, BackendError> {
        let method_name = request.method();
        let collection = request.collection();
        let url = self.collection_url(collection.as_str())?;
        debug!(method = method_name, %collection, "rest request");

        let (builder, expects_rows) = match request {
            DataRequest::Select {
                filter, projection, ..
            } => {
                let mut query = vec![("select".to_string(), render_projection(&projection))];
                query.extend(render_filter(&filter));
                (self.request(Method::GET, url).query(&query), true)
            }
            DataRequest::Insert { rows, .. } => (
                self.request(Method::POST, url)
                    .header("Prefer", "return=representation")
                    .json(&rows),
                true,
            ),
            DataRequest::Update { filter, patch, .. } => (
                self.request(Method::PATCH, url)
                    .query(&render_filter(&filter))
                    .header("Prefer", "return=representation")
                    .json(&patch),
                true,
            ),
            DataRequest::Delete { filter, .. } => (
                self.request(Method::DELETE, url)
                    .query(&render_filter(&filter)),
                false,
            ),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| BackendError::transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| BackendError::transport(err.to_string()))?;

        if !status.is_success() {
            let err = rest_error(status, &body);
            warn!(method = method_name, %collection, %status, error = %err, "rest request failed");
            return Err(err);
        }
        if !expects_rows || body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Value> = serde_json::from_str(&body).map_err(|err| {
            BackendError::decode(format!("malformed {collection} response: {err}"))
        })?;
        debug!(method = method_name, %collection, rows = rows.len(), "rest response");
        Ok(rows)
    }
}

fn rest_error(status: StatusCode, body: &str) -> BackendError {
    let parsed: RestErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        _ => ErrorCode::Remote,
    };
    let mut message = parsed.message.unwrap_or_else(|| status.to_string());
    if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
        message.push_str(&format!(" ({details})"));
    }
    if let Some(hint) = parsed.hint.filter(|h| !h.is_empty()) {
        message.push_str(&format!("; hint: {hint}"));
    }
    if let Some(pg_code) = parsed.code {
        message = format!("[{pg_code}] {message}");
    }
    BackendError::new(code, message)
}

/// Projection in PostgREST `select=` syntax, e.g.
/// `*,users:users!assigned_to(id,full_name)`.
pub fn render_projection(projection: &Projection) -> String {
    let mut parts = match &projection.columns {
        Columns::All => vec!["*".to_string()],
        Columns::Only(columns) => columns.clone(),
    };
    parts.extend(projection.embeds.iter().map(render_embed));
    parts.join(",")
}

fn render_embed(embed: &Embed) -> String {
    let mut target = format!("{}:{}!{}", embed.alias, embed.collection, embed.hint());
    if embed.inner {
        target.push_str("!inner");
    }
    format!("{target}({})", render_projection(&embed.projection))
}

pub fn render_filter(filter: &Filter) -> Vec<(String, String)> {
    filter
        .iter()
        .map(|(column, value)| {
            let operand = match value {
                Value::Null => "is.null".to_string(),
                Value::String(s) => format!("eq.{s}"),
                other => format!("eq.{other}"),
            };
            (column.to_string(), operand)
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
