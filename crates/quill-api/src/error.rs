//! Request-level failures of the sync endpoints.
//!
//! Per-operation rejections never come through here: they travel inside a
//! 200 apply response. These errors fail the whole request, and the status
//! tells a client whether resending the same batch can help (`5xx`) or not.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidPull(String),
    #[error("batch of {count} operations exceeds the limit of {max}")]
    BatchTooLarge { count: usize, max: usize },
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("sync ledger unavailable")]
    LedgerUnavailable,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AppError {
    pub fn invalid_pull(message: impl Into<String>) -> Self {
        Self::InvalidPull(message.into())
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPull(_) => StatusCode::BAD_REQUEST,
            Self::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable identifier clients can match on
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPull(_) => "invalid_pull",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::Unauthorized(_) => "unauthorized",
            Self::LedgerUnavailable => "ledger_unavailable",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Sync request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Sync request refused");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, Self::Unauthorized(_)) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::Value;

    use super::*;

    async fn body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn oversized_batch_is_not_retryable() {
        let response = AppError::BatchTooLarge {
            count: 1_001,
            max: 1_000,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!response.status().is_server_error());
        let body = body(response).await;
        assert_eq!(body["code"], "batch_too_large");
        assert_eq!(
            body["error"],
            "batch of 1001 operations exceeds the limit of 1000"
        );
    }

    #[tokio::test]
    async fn unavailable_ledger_asks_client_to_retry() {
        let response = AppError::LedgerUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body(response).await["code"], "ledger_unavailable");
    }

    #[test]
    fn unauthorized_advertises_bearer_scheme() {
        let response = AppError::Unauthorized("missing Authorization header").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }
}
