use thiserror::Error;

use crate::api::BackendError;

/// Failure of a sign-up / sign-in / sign-out / OAuth action.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("A user with this email is already registered")]
    AlreadyRegistered,

    #[error("Email and password required")]
    MissingCredentials,

    #[error("Backend not configured")]
    NotConfigured,

    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        if matches!(err, BackendError::NotConfigured) {
            return AuthError::NotConfigured;
        }
        let message = err.message().unwrap_or_default().to_lowercase();
        match err {
            BackendError::BadRequest(_) | BackendError::Unauthorized(_)
                if message.contains("invalid_grant")
                    || message.contains("invalid login credentials") =>
            {
                AuthError::InvalidCredentials
            }
            BackendError::BadRequest(_) | BackendError::Unprocessable(_)
                if message.contains("already registered")
                    || message.contains("user_already_exists") =>
            {
                AuthError::AlreadyRegistered
            }
            other => AuthError::Backend(other),
        }
    }
}

impl AuthError {
    /// Short message suitable for showing next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Backend(BackendError::NetworkError(e)) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            AuthError::Backend(BackendError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::Backend(BackendError::RateLimited) => {
                "Too many attempts. Please wait a moment.".to_string()
            }
            AuthError::Backend(e) => format!("Authentication failed: {}", e),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_invalid_credentials() {
        let err: AuthError = BackendError::BadRequest(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#.to_string(),
        )
        .into();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn test_classify_already_registered() {
        let err: AuthError = BackendError::Unprocessable(
            r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#.to_string(),
        )
        .into();
        assert!(matches!(err, AuthError::AlreadyRegistered));
    }

    #[test]
    fn test_classify_passthrough() {
        assert!(matches!(
            AuthError::from(BackendError::NotConfigured),
            AuthError::NotConfigured
        ));
        let err = AuthError::from(BackendError::ServerError("boom".to_string()));
        assert!(matches!(err, AuthError::Backend(BackendError::ServerError(_))));
        assert_eq!(err.user_message(), "Authentication failed: Server error: boom");
        assert_eq!(
            AuthError::InvalidCredentials.user_message(),
            "Invalid email or password"
        );
    }
}
