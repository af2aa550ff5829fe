//! HTTP utilities for GCP REST API calls

use super::error::ApiError;
use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gcpsnip/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);
        let body = self.send(self.client.get(url).bearer_auth(token)).await?;
        parse_json(&body)
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("POST {}", url);
        let request = with_json(self.client.post(url).bearer_auth(token), body);
        let body = self.send(request).await?;
        parse_json(&body)
    }

    /// Make a PUT request to a GCP API
    pub async fn put(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("PUT {}", url);
        let request = with_json(self.client.put(url).bearer_auth(token), body);
        let body = self.send(request).await?;
        parse_json(&body)
    }

    /// Make a PATCH request to a GCP API
    pub async fn patch(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        tracing::debug!("PATCH {}", url);
        let request = self.client.patch(url).bearer_auth(token).json(body);
        let body = self.send(request).await?;
        parse_json(&body)
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("DELETE {}", url);
        let body = self.send(self.client.delete(url).bearer_auth(token)).await?;
        parse_json(&body)
    }

    /// GET a raw payload (object media downloads)
    pub async fn get_bytes(&self, url: &str, token: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET (bytes) {}", url);
        self.send(self.client.get(url).bearer_auth(token)).await
    }

    /// POST a raw payload (object media uploads)
    pub async fn post_bytes(
        &self,
        url: &str,
        token: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Value> {
        tracing::debug!("POST (bytes, {} bytes) {}", bytes.len(), url);
        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        let body = self.send(request).await?;
        parse_json(&body)
    }

    /// Send a request and return the body of a successful response
    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&text));
            return Err(ApiError::from_response(status.as_u16(), &text).into());
        }

        Ok(body.to_vec())
    }
}

fn with_json(request: RequestBuilder, body: Option<&Value>) -> RequestBuilder {
    match body {
        Some(body) => request.json(body),
        None => request,
    }
}

/// Parse a response body, treating an empty body as `null`
fn parse_json(body: &[u8]) -> Result<Value> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).context("Failed to parse response JSON")
}

/// Format a GCP API error for display
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(api) = super::error::api_error(error) {
        return match api.status {
            401 => "Authentication failed. Run 'gcloud auth application-default login'.".to_string(),
            403 => format!("Permission denied: {}", api.message),
            404 => format!("Resource not found: {}", api.message),
            409 => format!("Resource already exists or is in use: {}", api.message),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            400 => format!("Invalid request: {}", api.message),
            500..=599 => "GCP service temporarily unavailable. Please try again.".to_string(),
            _ => format!("Request failed ({}): {}", api.status, api.message),
        };
    }

    // Not an API error: show the context chain, minus control characters
    format!("{:#}", error)
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("500 bytes total"));
    }

    #[test]
    fn test_sanitize_strips_newlines() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_parse_json_empty_is_null() {
        assert_eq!(parse_json(b"").unwrap(), Value::Null);
        assert_eq!(parse_json(b"  \n").unwrap(), Value::Null);
        assert_eq!(parse_json(b"{\"a\":1}").unwrap()["a"], 1);
    }

    #[test]
    fn test_format_api_errors() {
        let err: anyhow::Error = ApiError::from_response(
            403,
            r#"{"error":{"message":"caller lacks storage.buckets.create"}}"#,
        )
        .into();
        assert_eq!(
            format_gcp_error(&err),
            "Permission denied: caller lacks storage.buckets.create"
        );

        let err: anyhow::Error = ApiError::from_response(503, "").into();
        assert!(format_gcp_error(&err).contains("temporarily unavailable"));
    }

    #[test]
    fn test_format_plain_error_keeps_context() {
        let err = anyhow::anyhow!("inner").context("Failed to read key file");
        assert_eq!(format_gcp_error(&err), "Failed to read key file: inner");
    }
}
