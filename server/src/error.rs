//! Error types for the SmartServe server.
//!
//! Module-level errors ([`AuthError`], [`DirectoryError`]) and extractor
//! rejections are folded into [`ServerError`], which knows how to render
//! itself as an HTTP response. Startup configuration errors are reported by
//! the binary directly.
//!
//! # Response Shape
//!
//! Every failure is returned as JSON with a single `message` field:
//!
//! ```json
//! { "message": "Token is invalid: Signature has expired" }
//! ```

use std::error::Error;
use std::fmt;

use axum::extract::rejection::PathRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::AuthError;
use crate::restaurants::DirectoryError;

/// JSON body returned for every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable failure description.
    pub message: String,
}

impl ErrorResponse {
    /// Creates a response body with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for request handling.
#[derive(Debug)]
pub enum ServerError {
    /// Login or token check failure.
    Auth(AuthError),

    /// The restaurant directory could not be read.
    Directory(DirectoryError),

    /// Malformed request that is not an authentication matter.
    Validation(String),

    /// The requested resource does not exist.
    NotFound(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "{err}"),
            Self::Directory(err) => write!(f, "{err}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Directory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<DirectoryError> for ServerError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

impl From<PathRejection> for ServerError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl ServerError {
    /// Creates a new not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(err) if err.is_client_error() => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Auth(_) | Self::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> ErrorResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn auth_errors_map_to_unauthorized() {
        for err in [
            AuthError::MissingCredentials,
            AuthError::InvalidCredentials,
            AuthError::TokenMissing,
            AuthError::token_invalid("bad"),
        ] {
            let server_err = ServerError::from(err);
            assert_eq!(server_err.status_code(), StatusCode::UNAUTHORIZED);
            assert!(server_err.status_code().is_client_error());
        }
    }

    #[test]
    fn token_issue_maps_to_internal_error() {
        let err = ServerError::from(AuthError::TokenIssue("hmac".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.status_code().is_server_error());
    }

    #[test]
    fn directory_error_maps_to_internal_error() {
        let err = ServerError::from(DirectoryError::Unavailable("offline".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ServerError::Validation("bad path".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "validation error: bad path");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ServerError::not_found("restaurant 42");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "not found: restaurant 42");
    }

    #[test]
    fn auth_error_display_is_passed_through() {
        let err = ServerError::from(AuthError::TokenMissing);
        assert_eq!(err.to_string(), "Token is missing!");
    }

    #[test]
    fn auth_error_converts_with_question_mark() {
        fn inner() -> Result<()> {
            Err(AuthError::TokenMissing)?;
            Ok(())
        }

        assert!(matches!(inner(), Err(ServerError::Auth(_))));
    }

    #[test]
    fn source_is_exposed_for_wrapped_errors() {
        assert!(ServerError::from(AuthError::TokenMissing).source().is_some());
        assert!(ServerError::not_found("x").source().is_none());
    }

    #[tokio::test]
    async fn into_response_renders_message_body() {
        let response = ServerError::from(AuthError::InvalidCredentials).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await.message, "Invalid credentials");
    }

    #[tokio::test]
    async fn into_response_keeps_token_failure_cause() {
        let response =
            ServerError::from(AuthError::token_invalid("Signature has expired")).into_response();
        assert_eq!(
            body_json(response).await.message,
            "Token is invalid: Signature has expired"
        );
    }
}
