//! Collaborator traits for the hosted backend.
//!
//! `SessionSync` only ever talks to the backend through these traits, so
//! tests and alternative deployments can substitute their own
//! implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::BackendError;
use crate::auth::AuthSubscription;
use crate::models::{Profile, Session, User};

/// Response to a sign-up or sign-in request.
///
/// A sign-up that needs email confirmation returns a user but no session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

/// Where to send the browser to start an OAuth sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthRedirect {
    pub provider: String,
    pub url: String,
}

/// Remote auth service.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current session, if any.
    async fn get_current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Register a listener for session transitions. The listener is active
    /// by the time this returns.
    fn on_auth_change(&self) -> AuthSubscription;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: serde_json::Value,
    ) -> Result<AuthResponse, BackendError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> Result<OAuthRedirect, BackendError>;
}

/// Remote keyed store of profile records.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The profile for `user_id`, or `None` when no row exists.
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;
}
