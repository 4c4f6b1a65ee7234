use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{
    contract::{DataClient, DataClientExt},
    domain::{User, UserId},
    error::{BackendError, ErrorCode},
    protocol::Filter,
    records::Select,
};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user: SessionUser,
}

/// Result of a sign-up. `session` is absent when the backend requires the
/// address to be confirmed before the first sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub user: SessionUser,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessToken(Arc<RwLock<Option<String>>>);

impl AccessToken {
    pub fn set(&self, token: Option<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn get(&self) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUp, BackendError>;
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError>;
}

pub struct GoTrueAuth {
    http: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl AuthUser {
    fn into_session_user(self, fallback_email: &str) -> SessionUser {
        SessionUser {
            id: self.id,
            email: self.email.unwrap_or_else(|| fallback_email.to_string()),
            full_name: self.user_metadata.full_name,
        }
    }
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user: self.user.into_session_user(fallback_email),
        }
    }
}

impl GoTrueAuth {
    pub fn new(http: Client, base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: crate::rest::with_trailing_slash(base_url),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(&format!("auth/v1/{path}"))
            .map_err(|err| BackendError::internal(format!("invalid auth url: {err}")))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer.unwrap_or(&self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: AuthErrorBody = response.json().await.unwrap_or_default();
        let reason = body.error_code.as_deref().or(body.error.as_deref());
        let code = match (status, reason) {
            (StatusCode::UNAUTHORIZED, _) => ErrorCode::Unauthorized,
            // A rejected password grant; other 400s carry the backend's reason.
            (StatusCode::BAD_REQUEST, Some("invalid_grant" | "invalid_credentials")) => {
                ErrorCode::Unauthorized
            }
            (StatusCode::FORBIDDEN, _) => ErrorCode::Forbidden,
            (StatusCode::CONFLICT, _) | (_, Some("user_already_exists")) => ErrorCode::Conflict,
            _ => ErrorCode::Remote,
        };
        let message = body
            .error_description
            .or(body.msg)
            .or(body.message)
            .or(body.error)
            .unwrap_or_else(|| status.to_string());
        Err(BackendError::new(code, message))
    }
}

#[async_trait]
impl AuthBackend for GoTrueAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .post(
                url,
                &serde_json::json!({ "email": email, "password": password }),
                None,
            )
            .await?;
        let token: TokenResponse = response.json().await.map_err(|err| {
            BackendError::decode(format!("malformed sign-in response: {err}"))
        })?;
        let session = token.into_session(email);
        info!(user_id = %session.user.id, "auth: signed in");
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUp, BackendError> {
        let url = self.endpoint("signup")?;
        let response = self
            .post(
                url,
                &serde_json::json!({
                    "email": email,
                    "password": password,
                    "data": { "full_name": full_name },
                }),
                None,
            )
            .await?;
        let body: SignUpResponse = response.json().await.map_err(|err| {
            BackendError::decode(format!("malformed sign-up response: {err}"))
        })?;

        let signed_up = match body {
            SignUpResponse::Session(token) => {
                let mut session = token.into_session(email);
                session.user.full_name.get_or_insert_with(|| full_name.to_string());
                SignUp {
                    user: session.user.clone(),
                    session: Some(session),
                }
            }
            SignUpResponse::User(user) => {
                let mut user = user.into_session_user(email);
                user.full_name.get_or_insert_with(|| full_name.to_string());
                SignUp {
                    user,
                    session: None,
                }
            }
        };
        info!(
            user_id = %signed_up.user.id,
            confirmed = signed_up.session.is_some(),
            "auth: signed up"
        );
        Ok(signed_up)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let url = self.endpoint("logout")?;
        self.post(url, &serde_json::json!({}), Some(&session.access_token))
            .await?;
        Ok(())
    }
}

pub struct LocalAuth<C: ?Sized> {
    client: Arc<C>,
}

impl<C: DataClient + ?Sized> LocalAuth<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

fn local_session(user: SessionUser) -> Session {
    Session {
        access_token: format!("local-{}", user.id),
        refresh_token: None,
        user,
    }
}

#[async_trait]
impl<C: DataClient + ?Sized + 'static> AuthBackend for LocalAuth<C> {
    async fn sign_in(&self, email: &str, _password: &str) -> Result<Session, BackendError> {
        let email = email.trim();
        let users = self
            .client
            .select(Select::<User>::matching(Filter::new().eq("email", email)))
            .await?;
        let Some(user) = users.into_iter().next() else {
            warn!(email, "auth: no local user with this email");
            return Err(BackendError::new(
                ErrorCode::Unauthorized,
                "invalid login credentials",
            ));
        };
        Ok(local_session(SessionUser {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
        }))
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        full_name: &str,
    ) -> Result<SignUp, BackendError> {
        let email = email.trim();
        let existing = self
            .client
            .select(Select::<User>::matching(Filter::new().eq("email", email)))
            .await?;
        if !existing.is_empty() {
            return Err(BackendError::new(
                ErrorCode::Conflict,
                format!("a user with email {email} already exists"),
            ));
        }
        let user = SessionUser {
            id: UserId::random(),
            email: email.to_string(),
            full_name: Some(full_name.to_string()),
        };
        Ok(SignUp {
            user: user.clone(),
            session: Some(local_session(user)),
        })
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
