//! HTTP client for the hosted backend's auth and record servers.
//!
//! This module provides the `HttpBackend` struct, which implements
//! `AuthBackend` against `/auth/v1` and `ProfileStore` against `/rest/v1`.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{AuthEvent, AuthEvents, AuthSubscription, SessionStore};
use crate::backend::{AuthBackend, AuthResponse, OAuthRedirect, ProfileStore};
use crate::config::Config;
use crate::models::{Profile, Session, User};

use super::BackendError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 500;

/// Table holding one profile row per auth user.
const PROFILES_TABLE: &str = "profiles";

/// Ask the record server for a single object instead of an array; zero
/// matching rows then comes back as 406.
const SINGLE_OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";

/// Token endpoint payload: a session plus a relative expiry.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    session: Session,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let mut session = self.session;
        if session.expires_at.is_none() {
            session.expires_at = self
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs);
        }
        session
    }
}

fn lock(current: &Mutex<Option<Session>>) -> MutexGuard<'_, Option<Session>> {
    current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// REST client for the hosted backend.
pub struct HttpBackend {
    client: Client,
    base_url: Option<String>,
    api_key: Option<String>,
    current: Mutex<Option<Session>>,
    store: Option<SessionStore>,
    events: AuthEvents,
}

impl HttpBackend {
    /// Create a client from the given configuration.
    ///
    /// Missing credentials are not an error here; each call fails with
    /// `BackendError::NotConfigured` instead.
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.backend_url.clone(),
            api_key: config.api_key.clone(),
            current: Mutex::new(None),
            store: None,
            events: AuthEvents::new(),
        })
    }

    /// Persist sessions in the given store and bootstrap from it.
    pub fn with_session_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// The in-memory session, without touching disk or network.
    pub fn session(&self) -> Option<Session> {
        lock(&self.current).clone()
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key.as_deref().ok_or(BackendError::NotConfigured)
    }

    fn endpoint(&self, path: &str) -> Result<String, BackendError> {
        let base = self.base_url.as_deref().ok_or(BackendError::NotConfigured)?;
        self.api_key()?;
        Ok(format!("{}{}", base, path))
    }

    /// Attach the API key and a bearer token: the session's access token
    /// when signed in, the API key otherwise.
    fn authorize(&self, request: RequestBuilder, token: Option<&str>) -> Result<RequestBuilder, BackendError> {
        let key = self.api_key()?;
        Ok(request
            .header("apikey", key)
            .bearer_auth(token.unwrap_or(key)))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::from_status(status, &body))
        }
    }

    async fn post_token(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, BackendError> {
        let url = self.endpoint("/auth/v1/token")?;
        let request = self
            .client
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let response = self.authorize(request, None)?.send().await?;
        let response = Self::check_response(response).await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("token response: {}", e)))?;
        Ok(token.into_session())
    }

    /// Make `session` current, persist it, and notify listeners.
    fn install_session(&self, session: Session, event: AuthEvent) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save(&session) {
                warn!(error = %e, "Failed to save session");
            }
        }
        *lock(&self.current) = Some(session.clone());
        self.events.emit(event, Some(session));
    }

    fn drop_session(&self) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Failed to clear session");
            }
        }
        *lock(&self.current) = None;
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, BackendError> {
        let refresh_token = self
            .session()
            .and_then(|s| s.refresh_token)
            .ok_or_else(|| BackendError::Unauthorized("no refresh token".to_string()))?;

        match self
            .post_token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => {
                debug!("Session refreshed");
                self.install_session(session.clone(), AuthEvent::TokenRefreshed);
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed, dropping session");
                self.drop_session();
                Err(e)
            }
        }
    }

    async fn revoke(&self, url: &str, token: &str) -> Result<(), BackendError> {
        let request = self.client.post(url);
        let response = self.authorize(request, Some(token))?.send().await?;
        match response.status() {
            // Session already gone server-side
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(()),
            _ => Self::check_response(response).await.map(|_| ()),
        }
    }

    /// Sign-up returns a full session when no confirmation is required,
    /// otherwise just the user (either bare or under `user`).
    fn parse_sign_up(value: serde_json::Value) -> Result<AuthResponse, BackendError> {
        if value.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(value)
                .map_err(|e| BackendError::InvalidResponse(format!("sign-up session: {}", e)))?;
            let session = token.into_session();
            return Ok(AuthResponse {
                user: session.user.clone(),
                session: Some(session),
            });
        }
        let user_value = value.get("user").cloned().unwrap_or(value);
        let user: User = serde_json::from_value(user_value)
            .map_err(|e| BackendError::InvalidResponse(format!("sign-up user: {}", e)))?;
        Ok(AuthResponse {
            user: Some(user),
            session: None,
        })
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn get_current_session(&self) -> Result<Option<Session>, BackendError> {
        let session = match self.session() {
            Some(s) => Some(s),
            None => match self.store {
                Some(ref store) => {
                    let loaded = store
                        .load()
                        .map_err(|e| BackendError::Storage(e.to_string()))?;
                    *lock(&self.current) = loaded.clone();
                    loaded
                }
                None => None,
            },
        };

        let Some(session) = session else {
            return Ok(None);
        };

        if session.needs_refresh() {
            if session.refresh_token.is_some() {
                return self.refresh_session().await.map(Some);
            }
            if session.is_expired() {
                debug!("Stored session expired without refresh token");
                self.drop_session();
                return Ok(None);
            }
        }
        Ok(Some(session))
    }

    fn on_auth_change(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: serde_json::Value,
    ) -> Result<AuthResponse, BackendError> {
        let url = self.endpoint("/auth/v1/signup")?;
        let body = json!({ "email": email, "password": password, "data": attributes });
        let request = self.client.post(&url).json(&body);
        let response = self.authorize(request, None)?.send().await?;
        let response = Self::check_response(response).await?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("sign-up response: {}", e)))?;
        let result = Self::parse_sign_up(value)?;

        match result.session {
            Some(ref session) => {
                info!("Sign-up complete, session issued");
                self.install_session(session.clone(), AuthEvent::SignedIn);
            }
            None => info!("Sign-up complete, awaiting email confirmation"),
        }
        Ok(result)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        let session = self
            .post_token("password", json!({ "email": email, "password": password }))
            .await?;
        info!("Sign-in successful");
        self.install_session(session.clone(), AuthEvent::SignedIn);
        Ok(AuthResponse {
            user: session.user.clone(),
            session: Some(session),
        })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let token = self.session().map(|s| s.access_token);

        let result = match token {
            Some(ref token) => match self.endpoint("/auth/v1/logout") {
                Ok(url) => self.revoke(&url, token).await,
                Err(e) => Err(e),
            },
            None => Ok(()),
        };
        if let Err(ref e) = result {
            warn!(error = %e, "Server-side sign-out failed");
        }

        // Local state is dropped even if the server call failed
        self.drop_session();
        self.events.emit(AuthEvent::SignedOut, None);
        result
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> Result<OAuthRedirect, BackendError> {
        if provider.trim().is_empty() {
            return Err(BackendError::BadRequest("OAuth provider required".to_string()));
        }
        let url = self.endpoint("/auth/v1/authorize")?;
        let url = Url::parse_with_params(&url, &[("provider", provider), ("redirect_to", redirect_to)])
            .map_err(|e| BackendError::InvalidResponse(format!("authorize URL: {}", e)))?;

        Ok(OAuthRedirect {
            provider: provider.to_string(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ProfileStore for HttpBackend {
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let url = self.endpoint(&format!("/rest/v1/{}", PROFILES_TABLE))?;
        let token = self.session().map(|s| s.access_token);
        let id_filter = format!("eq.{}", user_id);

        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let request = self
                .client
                .get(&url)
                .query(&[("id", id_filter.as_str()), ("select", "*")])
                .header(header::ACCEPT, SINGLE_OBJECT_MEDIA_TYPE);
            let response = self.authorize(request, token.as_deref())?.send().await?;

            match response.status() {
                StatusCode::NOT_ACCEPTABLE => {
                    debug!(user_id, "No profile row");
                    return Ok(None);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(BackendError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                _ => {
                    let response = Self::check_response(response).await?;
                    let profile: Profile = response
                        .json()
                        .await
                        .map_err(|e| BackendError::InvalidResponse(format!("profile row: {}", e)))?;
                    return Ok(Some(profile));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENV_BACKEND_KEY, ENV_BACKEND_URL};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "anon-key";

    fn backend_for(server: &MockServer) -> HttpBackend {
        let uri = server.uri();
        let config = Config::from_lookup(move |key| match key {
            ENV_BACKEND_URL => Some(uri.clone()),
            ENV_BACKEND_KEY => Some(KEY.to_string()),
            _ => None,
        });
        HttpBackend::new(&config).expect("client")
    }

    fn session_json(user_id: &str, token: &str) -> serde_json::Value {
        json!({
            "access_token": token,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": { "id": user_id, "email": "ada@example.com" }
        })
    }

    #[tokio::test]
    async fn test_sign_in_installs_session_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", KEY))
            .and(body_partial_json(json!({ "email": "ada@example.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("u1", "tok-1")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let backend = backend_for(&server).with_session_store(store.clone());
        let mut sub = backend.on_auth_change();

        let response = backend
            .sign_in("ada@example.com", "hunter2")
            .await
            .expect("sign in");
        let session = response.session.expect("session");
        assert_eq!(session.user_id(), Some("u1"));
        assert!(session.expires_at.is_some());

        let change = sub.recv().await.expect("notification");
        assert_eq!(change.event, AuthEvent::SignedIn);
        assert_eq!(change.session.as_ref().and_then(|s| s.user_id()), Some("u1"));

        let persisted = store.load().expect("load").expect("persisted session");
        assert_eq!(persisted.access_token, "tok-1");
    }

    #[tokio::test]
    async fn test_sign_in_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let err = backend.sign_in("bad@x.com", "wrong").await.unwrap_err();
        assert!(matches!(err, BackendError::BadRequest(_)));
        assert!(matches!(
            crate::auth::AuthError::from(err),
            crate::auth::AuthError::InvalidCredentials
        ));
        assert!(backend.session().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_awaiting_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(body_partial_json(json!({ "data": { "name": "Ada" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u2",
                "email": "new@example.com",
                "user_metadata": { "name": "Ada" }
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let response = backend
            .sign_up("new@example.com", "pw", json!({ "name": "Ada" }))
            .await
            .expect("sign up");
        assert!(response.session.is_none());
        assert_eq!(response.user.map(|u| u.id), Some("u2".to_string()));
        assert!(backend.session().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("u1", "tok-1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        backend.sign_in("ada@example.com", "pw").await.expect("sign in");
        let mut sub = backend.on_auth_change();

        backend.sign_out().await.expect("sign out");
        assert!(backend.session().is_none());
        let change = sub.recv().await.expect("notification");
        assert_eq!(change, crate::auth::AuthChange::new(AuthEvent::SignedOut, None));
    }

    #[tokio::test]
    async fn test_sign_out_without_credentials_still_drops_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        store.save(&Session::for_user("u1")).expect("save");

        let backend = HttpBackend::new(&Config::default())
            .expect("client")
            .with_session_store(store.clone());
        let restored = backend.get_current_session().await.expect("bootstrap");
        assert_eq!(restored.as_ref().and_then(|s| s.user_id()), Some("u1"));
        let mut sub = backend.on_auth_change();

        let result = backend.sign_out().await;
        assert!(matches!(result, Err(BackendError::NotConfigured)));
        assert!(backend.session().is_none());
        assert!(!store.path().exists());
        let change = sub.recv().await.expect("notification");
        assert_eq!(change, crate::auth::AuthChange::new(AuthEvent::SignedOut, None));
    }

    #[tokio::test]
    async fn test_profile_found_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.u1"))
            .and(header("accept", SINGLE_OBJECT_MEDIA_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u1", "name": "Ada", "lessons_completed": 4
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.nobody"))
            .respond_with(ResponseTemplate::new(406).set_body_json(json!({
                "code": "PGRST116",
                "message": "JSON object requested, multiple (or no) rows returned"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let profile = backend
            .get_by_user_id("u1")
            .await
            .expect("query")
            .expect("profile");
        assert_eq!(profile.name.as_deref(), Some("Ada"));
        assert_eq!(profile.extra.get("lessons_completed"), Some(&json!(4)));

        assert!(backend.get_by_user_id("nobody").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn test_profile_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let err = backend.get_by_user_id("u1").await.unwrap_err();
        assert!(matches!(err, BackendError::ServerError(_)));
    }

    #[tokio::test]
    async fn test_oauth_redirect_url() {
        let server = MockServer::start().await;
        let backend = backend_for(&server);

        let redirect = backend
            .sign_in_with_oauth("github", "http://localhost:5173/dashboard")
            .await
            .expect("redirect");
        assert_eq!(redirect.provider, "github");
        assert_eq!(
            redirect.url,
            format!(
                "{}/auth/v1/authorize?provider=github&redirect_to=http%3A%2F%2Flocalhost%3A5173%2Fdashboard",
                server.uri()
            )
        );

        assert!(backend.sign_in_with_oauth(" ", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_refreshes_expiring_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_partial_json(json!({ "refresh_token": "old-refresh" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("u1", "tok-2")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let mut stale = Session::for_user("u1");
        stale.access_token = "tok-1".to_string();
        stale.refresh_token = Some("old-refresh".to_string());
        stale.expires_at = Some(chrono::Utc::now().timestamp() - 10);
        store.save(&stale).expect("save");

        let backend = backend_for(&server).with_session_store(store);
        let session = backend
            .get_current_session()
            .await
            .expect("bootstrap")
            .expect("session");
        assert_eq!(session.access_token, "tok-2");
    }

    #[tokio::test]
    async fn test_bootstrap_refresh_failure_drops_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let mut stale = Session::for_user("u1");
        stale.refresh_token = Some("revoked".to_string());
        stale.expires_at = Some(chrono::Utc::now().timestamp() - 10);
        store.save(&stale).expect("save");

        let backend = backend_for(&server).with_session_store(store.clone());
        assert!(backend.get_current_session().await.is_err());
        assert!(backend.session().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_unconfigured_backend_fails_per_call() {
        let backend = HttpBackend::new(&Config::default()).expect("client");

        assert!(matches!(
            backend.sign_in("a@b.c", "pw").await,
            Err(BackendError::NotConfigured)
        ));
        assert!(matches!(
            backend.get_by_user_id("u1").await,
            Err(BackendError::NotConfigured)
        ));
        assert!(matches!(
            backend.sign_in_with_oauth("github", "/").await,
            Err(BackendError::NotConfigured)
        ));
        // No session anywhere: nothing to fail on
        assert!(backend.get_current_session().await.expect("bootstrap").is_none());
    }
}
