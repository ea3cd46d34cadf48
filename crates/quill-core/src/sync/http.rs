//! HTTP implementation of the remote store.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::{SyncError, SyncResult};
use super::transport::RemoteStore;
use super::wire::{ApplyResult, PullRequest, PullResponse, WireOperation};
use crate::util::{compact_text, is_http_url};

/// Talks to the `/v1/sync/*` endpoints of a remote store.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpRemote {
    /// Create a client for `base_url`, optionally authenticating with a bearer token.
    pub fn new(
        base_url: impl AsRef<str>,
        token: Option<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = normalize_sync_url(base_url.as_ref())?;
        let token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Ok(Self {
            base_url,
            token,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Normalized base URL (no trailing slash)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> SyncResult<T> {
        let request = self.authorized(
            self.client
                .post(format!("{}{path}", self.base_url))
                .header("Accept", "application/json")
                .json(body),
        );

        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| SyncError::Protocol(format!("invalid response body: {error}")))
    }
}

impl RemoteStore for HttpRemote {
    async fn apply(&self, operations: &[WireOperation]) -> SyncResult<Vec<ApplyResult>> {
        self.post_json("/v1/sync/apply", &operations).await
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_json("/v1/sync/pull", request).await
    }
}

/// Trim and validate a remote base URL.
pub fn normalize_sync_url(url: &str) -> SyncResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(SyncError::NotConfigured(
            "sync URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(SyncError::NotConfigured(format!(
            "sync URL must start with http:// or https://: {trimmed}"
        )));
    }
    Ok(trimmed.to_string())
}

fn transport_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        SyncError::transport_retryable(error.to_string())
    } else {
        SyncError::Http(error)
    }
}

fn status_error(status: StatusCode, body: &str) -> SyncError {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SyncError::transport_retryable(message)
    } else {
        SyncError::Remote(message)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sync_url_trims_trailing_slash() {
        assert_eq!(
            normalize_sync_url(" https://sync.example.com/ ").unwrap(),
            "https://sync.example.com"
        );
        assert!(normalize_sync_url("").is_err());
        assert!(normalize_sync_url("sync.example.com").is_err());
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        let message = parse_api_error(StatusCode::BAD_REQUEST, r#"{"error":"bad payload"}"#);
        assert_eq!(message, "bad payload (400)");

        let message = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(message, "HTTP 502");
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "nope"),
            SyncError::Remote(_)
        ));
    }

    #[test]
    fn blank_token_is_dropped() {
        let remote = HttpRemote::new(
            "http://localhost:8080",
            Some("  ".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(remote.token.is_none());
        assert_eq!(remote.base_url(), "http://localhost:8080");
    }
}
