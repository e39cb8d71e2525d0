use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend not configured - set SECLEARN_BACKEND_URL and SECLEARN_BACKEND_KEY")]
    NotConfigured,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The single-object request matched zero (or several) rows
    #[error("Expected exactly one row: {0}")]
    NotAcceptable(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl BackendError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 => BackendError::BadRequest(truncated),
            401 => BackendError::Unauthorized(truncated),
            403 => BackendError::AccessDenied(truncated),
            404 => BackendError::NotFound(truncated),
            406 => BackendError::NotAcceptable(truncated),
            422 => BackendError::Unprocessable(truncated),
            429 => BackendError::RateLimited,
            500..=599 => BackendError::ServerError(truncated),
            _ => BackendError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Body text carried by the status-mapped variants.
    pub fn message(&self) -> Option<&str> {
        match self {
            BackendError::BadRequest(m)
            | BackendError::Unauthorized(m)
            | BackendError::AccessDenied(m)
            | BackendError::NotFound(m)
            | BackendError::NotAcceptable(m)
            | BackendError::Unprocessable(m)
            | BackendError::ServerError(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            BackendError::from_status(StatusCode::BAD_REQUEST, "invalid_grant"),
            BackendError::BadRequest(m) if m == "invalid_grant"
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::NOT_ACCEPTABLE, ""),
            BackendError::NotAcceptable(_)
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            BackendError::RateLimited
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            BackendError::ServerError(_)
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::IM_A_TEAPOT, ""),
            BackendError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(400);
        let truncated = BackendError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert!(BackendError::truncate_body("short") == "short");
    }
}
