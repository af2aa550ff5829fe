//! API error type
//!
//! Every non-2xx response from a Google API surfaces as an [`ApiError`] inside
//! the `anyhow::Error` chain, so snippets can branch on the one or two
//! conditions they care about without string matching.

use serde_json::Value;
use thiserror::Error;

/// A failed Google API call
#[derive(Debug, Clone, Error)]
#[error("API request failed: {status} {message}")]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// `error.message` from the JSON error body, or the reason phrase
    pub message: String,
}

impl ApiError {
    /// Build an error from a status code and a raw response body
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| {
                reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unknown error")
                    .to_string()
            });

        Self { status, message }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_already_exists(&self) -> bool {
        self.status == 409
    }

    pub fn is_permission_denied(&self) -> bool {
        self.status == 403
    }
}

/// Find the [`ApiError`] in an error chain, if any
pub fn api_error(error: &anyhow::Error) -> Option<&ApiError> {
    error.chain().find_map(|e| e.downcast_ref::<ApiError>())
}

/// True when the error chain carries a 404
pub fn is_not_found(error: &anyhow::Error) -> bool {
    api_error(error).is_some_and(ApiError::is_not_found)
}

/// True when the error chain carries a 409
pub fn is_already_exists(error: &anyhow::Error) -> bool {
    api_error(error).is_some_and(ApiError::is_already_exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_message_from_json_body() {
        let body = r#"{"error":{"code":409,"message":"The requested bucket name is not available."}}"#;
        let err = ApiError::from_response(409, body);
        assert!(err.is_already_exists());
        assert_eq!(err.message, "The requested bucket name is not available.");
    }

    #[test]
    fn test_message_falls_back_to_reason() {
        let err = ApiError::from_response(404, "<html>nope</html>");
        assert_eq!(err.message, "Not Found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_found_through_context() {
        let result: anyhow::Result<()> =
            Err(anyhow::Error::new(ApiError::from_response(404, ""))).context("Failed to get instance");
        let err = result.unwrap_err();
        assert!(is_not_found(&err));
        assert!(!is_already_exists(&err));
    }
}
