use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Refresh this many seconds before the access token actually expires.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

/// Authenticated user as reported by the auth server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Extra attributes supplied at sign-up.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub user_metadata: serde_json::Value,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            user_metadata: serde_json::Value::Null,
        }
    }
}

/// Session issued by the auth server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Session for `user_id` with a placeholder token, mostly useful in tests.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: None,
            expires_at: None,
            token_type: default_token_type(),
            user: Some(User::new(user_id)),
        }
    }

    /// The signed-in user's id, if there is one.
    ///
    /// A session without a user (or with an empty id) counts as signed out.
    pub fn user_id(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|u| u.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id().is_some()
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// Sessions without an expiry never expire locally.
    pub fn is_expired(&self) -> bool {
        self.expiry().map(|e| Utc::now() > e).unwrap_or(false)
    }

    /// Check if the session will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.expiry()
            .map(|e| Utc::now() + Duration::seconds(TOKEN_REFRESH_BUFFER_SECS) > e)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_requires_non_empty_user() {
        assert_eq!(Session::for_user("u1").user_id(), Some("u1"));
        assert_eq!(Session::for_user("").user_id(), None);

        let mut session = Session::for_user("u1");
        session.user = None;
        assert!(!session.is_signed_in());
    }

    #[test]
    fn test_expiry() {
        let mut session = Session::for_user("u1");
        assert!(!session.is_expired());
        assert!(!session.needs_refresh());

        session.expires_at = Some((Utc::now() - Duration::minutes(5)).timestamp());
        assert!(session.is_expired());
        assert!(session.needs_refresh());

        // Inside the refresh buffer but not yet expired
        session.expires_at = Some((Utc::now() + Duration::seconds(30)).timestamp());
        assert!(!session.is_expired());
        assert!(session.needs_refresh());

        session.expires_at = Some((Utc::now() + Duration::hours(1)).timestamp());
        assert!(!session.needs_refresh());
    }

    #[test]
    fn test_parse_auth_server_session() {
        let json = r#"{"access_token":"eyJhbGciOi","token_type":"bearer","expires_in":3600,"expires_at":1760000000,"refresh_token":"r3fr3sh","user":{"id":"8d0fd2b3-9ca7-4d9e-a95f-9e13dded323e","aud":"authenticated","email":"ada@example.com","user_metadata":{"full_name":"Ada"}}}"#;

        let session: Session = serde_json::from_str(json).expect("Failed to parse session JSON");
        assert_eq!(session.user_id(), Some("8d0fd2b3-9ca7-4d9e-a95f-9e13dded323e"));
        assert_eq!(session.refresh_token.as_deref(), Some("r3fr3sh"));
        assert_eq!(session.expires_at, Some(1760000000));
        let user = session.user.expect("user present");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.user_metadata["full_name"], "Ada");
    }
}
