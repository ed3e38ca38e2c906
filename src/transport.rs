//! HTTP transport for Data API commands.

use crate::error::{DataApiError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

/// Name of the header carrying the application token.
pub const TOKEN_HEADER: &str = "Token";

/// Sends one JSON command and returns the decoded response body.
///
/// Implementations report API-level failures (an `errors` array in the body)
/// as [`DataApiError::RemoteRequestFailed`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `payload` to `url`.
    async fn post(&self, url: &str, payload: JsonValue) -> Result<JsonValue>;
}

/// [`Transport`] over HTTPS with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport authenticating with `token`.
    pub fn new(token: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut token_value = HeaderValue::from_str(token)
            .map_err(|e| DataApiError::config(format!("invalid token: {e}")))?;
        token_value.set_sensitive(true);
        headers.insert(TOKEN_HEADER, token_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DataApiError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, payload: JsonValue) -> Result<JsonValue> {
        debug!(url, "sending command");
        let response = self.http.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataApiError::RemoteRequestFailed {
                status: Some(status.as_u16()),
                code: None,
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }
        let body: JsonValue = response.json().await?;
        check_api_errors(&body).map_err(|err| match err {
            DataApiError::RemoteRequestFailed { code, message, .. } => {
                DataApiError::RemoteRequestFailed {
                    status: Some(status.as_u16()),
                    code,
                    message,
                }
            }
            other => other,
        })?;
        Ok(body)
    }
}

/// Fail when a response body carries a non-empty `errors` array.
pub fn check_api_errors(body: &JsonValue) -> Result<()> {
    let errors = match body.get("errors").and_then(|e| e.as_array()) {
        Some(errors) if !errors.is_empty() => errors,
        _ => return Ok(()),
    };
    let code = errors
        .iter()
        .find_map(|e| e.get("errorCode").and_then(|c| c.as_str()))
        .map(str::to_string);
    let message = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ");
    Err(DataApiError::RemoteRequestFailed {
        status: None,
        code,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_api_errors_ok() {
        let body = serde_json::json!({ "status": { "insertedIds": ["a"] } });
        assert!(check_api_errors(&body).is_ok());

        let body = serde_json::json!({ "data": {}, "errors": [] });
        assert!(check_api_errors(&body).is_ok());
    }

    #[test]
    fn test_check_api_errors_reports_code_and_messages() {
        let body = serde_json::json!({
            "errors": [
                { "message": "Document already exists with the given _id", "errorCode": "DOCUMENT_ALREADY_EXISTS" },
                { "message": "second problem" },
            ]
        });
        let err = check_api_errors(&body).unwrap_err();
        assert_eq!(err.code(), Some("DOCUMENT_ALREADY_EXISTS"));
        assert_eq!(
            err.to_string(),
            "remote request failed: Document already exists with the given _id; second problem"
        );
    }

    #[test]
    fn test_http_transport_rejects_bad_token() {
        let err = HttpTransport::new("bad\ntoken", Duration::from_secs(1), "test").unwrap_err();
        assert!(matches!(err, DataApiError::Config(_)));
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new("AstraCS:abc", Duration::from_secs(5), "test/0.1").is_ok());
    }
}
