//! Error types for the API server and the session-bridging client.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error model used by request validation, authentication, and backends.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
        code: Option<String>,
        status: StatusCode,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Backend(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates a `401 Unauthorized` error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates an `invalid_request_error` payload with status `400`.
    pub fn invalid_request(
        message: impl Into<String>,
        param: Option<&str>,
        code: Option<&str>,
    ) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: param.map(ToOwned::to_owned),
            code: code.map(ToOwned::to_owned),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// Creates a `404 Not Found` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates an error for a failed call to the translation service.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ErrorBody {
    fn new(message: String, error_type: &'static str, code: &str) -> Self {
        Self {
            message,
            error_type,
            param: None,
            code: Some(code.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized(message) => {
                let payload = ErrorPayload {
                    error: ErrorBody::new(message, "authentication_error", "invalid_token"),
                };
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    Json(payload),
                )
                    .into_response();
            }
            AppError::InvalidRequest {
                message,
                param,
                code,
                status,
            } => (
                status,
                ErrorBody {
                    message,
                    error_type: "invalid_request_error",
                    param,
                    code,
                },
            ),
            AppError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody::new(message, "invalid_request_error", "not_found"),
            ),
            AppError::Backend(message) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody::new(message, "server_error", "translation_failed"),
            ),
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new(message, "server_error", "internal_error"),
            ),
        };

        (status, Json(ErrorPayload { error: body })).into_response()
    }
}

/// Failure of a client-side call, split so callers can tell "sign in again"
/// apart from "try again later".
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No principal is signed in with the identity provider.
    #[error("not signed in")]
    Unauthenticated,
    /// The token exchange endpoint rejected the assertion or answered garbage.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    /// The resource endpoint still answered 401 after the one allowed refresh.
    #[error("request was rejected as unauthorized")]
    Unauthorized,
    /// The server could not be reached.
    #[error("could not reach server: {0}")]
    Network(#[source] reqwest::Error),
    /// The resource endpoint answered with a non-success status other than 401.
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
    /// The identity provider refused or failed an operation.
    #[error("identity provider error: {0}")]
    Identity(String),
    /// Durable session storage could not be read or written.
    #[error("session storage error: {0}")]
    Storage(String),
    /// The request was rejected locally before any network access.
    #[error("{0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Returns true when the principal has to sign in (again) for the call to
    /// succeed, as opposed to a transport or server failure worth retrying.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::Unauthorized | Self::ExchangeFailed(_)
        )
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub(crate) fn identity(message: impl Into<String>) -> Self {
        Self::Identity(message.into())
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use serde_json::Value;

    use super::{AppError, ClientError};

    #[tokio::test]
    async fn unauthorized_carries_bearer_challenge() {
        let res = AppError::unauthorized("missing bearer token").into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let bytes = to_bytes(res.into_body(), 64 * 1024).await.expect("body");
        let payload: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["error"]["type"], "authentication_error");
        assert_eq!(payload["error"]["message"], "missing bearer token");
    }

    #[test]
    fn backend_failures_map_to_bad_gateway() {
        let res = AppError::backend("model service down").into_response();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn sign_in_is_required_only_for_auth_failures() {
        assert!(ClientError::Unauthenticated.requires_sign_in());
        assert!(ClientError::Unauthorized.requires_sign_in());
        assert!(ClientError::ExchangeFailed("401".into()).requires_sign_in());
        assert!(!ClientError::decode("bad json").requires_sign_in());
        assert!(!ClientError::Status {
            status: StatusCode::BAD_GATEWAY,
            message: "down".into()
        }
        .requires_sign_in());
    }
}
