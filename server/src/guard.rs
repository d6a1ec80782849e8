//! Access guard for protected routes.
//!
//! [`require_auth`] wraps protected handlers as axum middleware. It reads
//! the `Authorization` header, verifies the token with the
//! [`TokenService`], and either short-circuits with a 401 response or
//! stores the decoded [`Claims`] in the request's extensions. Handlers pick
//! them up with the [`AuthContext`] extractor; the claims live only as long
//! as that request.
//!
//! The header carries the raw token. A leading `Bearer ` scheme is accepted
//! and stripped.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{middleware, routing::get, Router};
//! use smartserve_server::guard::{require_auth, AuthContext};
//!
//! async fn whoami(auth: AuthContext) -> String {
//!     format!("org {}", auth.org_id())
//! }
//!
//! let protected = Router::new()
//!     .route("/whoami", get(whoami))
//!     .route_layer(middleware::from_fn_with_state(tokens, require_auth));
//! ```

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::auth::{AuthError, Claims, TokenService};
use crate::credentials::Role;
use crate::error::ServerError;

const BEARER_PREFIX: &str = "bearer ";

/// Pulls the presented token out of the `Authorization` header.
///
/// Returns `Ok(None)` when the header is absent.
fn presented_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| AuthError::token_invalid("Invalid header encoding"))?
        .trim_start();

    let token = match value.get(..BEARER_PREFIX.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER_PREFIX) => &value[BEARER_PREFIX.len()..],
        _ => value,
    };

    Ok(Some(token.trim()))
}

/// Middleware that admits only requests carrying a valid session token.
///
/// # Errors
///
/// Responds with 401 and `{"message": ...}` when the token is missing or
/// invalid. The wrapped handler is not run.
pub async fn require_auth(
    State(tokens): State<TokenService>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let claims = presented_token(request.headers())
        .and_then(|token| tokens.authorize(token))
        .map_err(|err| {
            debug!(path = %request.uri().path(), error = %err, "Request rejected by access guard");
            ServerError::from(err)
        })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Claims of the authenticated caller for the current request.
#[derive(Debug, Clone)]
pub struct AuthContext(pub Claims);

impl AuthContext {
    /// Organization bound into the caller's token.
    pub fn org_id(&self) -> i64 {
        self.0.org_id
    }

    /// Role bound into the caller's token, if any.
    pub fn role(&self) -> Option<Role> {
        self.0.role
    }

    /// Principal the token was issued to.
    pub fn principal_id(&self) -> &str {
        &self.0.principal_id
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only present when the route sits behind `require_auth`.
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AuthError::TokenMissing.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::routing::get;
    use axum::{middleware, Json, Router};
    use tower::ServiceExt;

    use crate::credentials::{CredentialRecord, InMemoryCredentialStore};
    use crate::error::ErrorResponse;

    fn service_with_secret(secret: &[u8]) -> TokenService {
        let store = InMemoryCredentialStore::new(vec![
            CredentialRecord::new("biryanis", "biryanis", 1, None),
            CredentialRecord::new("ammammagarillu", "ammammagarillu", 2, Some(Role::Captain)),
        ]);
        TokenService::new(Arc::new(store), secret, Duration::from_secs(3600))
    }

    fn service() -> TokenService {
        service_with_secret(b"guard-test-secret")
    }

    async fn echo(auth: AuthContext) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "orgId": auth.org_id(),
            "role": auth.role(),
            "principal": auth.principal_id(),
        }))
    }

    fn app(tokens: TokenService) -> Router {
        Router::new()
            .route("/guarded", get(echo))
            .route_layer(middleware::from_fn_with_state(tokens, require_auth))
    }

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/guarded");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn message(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice::<ErrorResponse>(&body).unwrap().message
    }

    // ========================================================================
    // Header extraction
    // ========================================================================

    #[test]
    fn presented_token_absent_header() {
        assert_eq!(presented_token(&HeaderMap::new()), Ok(None));
    }

    #[test]
    fn presented_token_raw_and_bearer_forms() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("abc.def.ghi"));
        assert_eq!(presented_token(&headers), Ok(Some("abc.def.ghi")));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(presented_token(&headers), Ok(Some("abc.def.ghi")));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   abc.def.ghi"));
        assert_eq!(presented_token(&headers), Ok(Some("abc.def.ghi")));
    }

    #[test]
    fn presented_token_bare_scheme_is_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(presented_token(&headers), Ok(Some("")));
    }

    #[test]
    fn presented_token_rejects_non_utf8() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());
        assert!(matches!(
            presented_token(&headers),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    // ========================================================================
    // Middleware
    // ========================================================================

    #[tokio::test]
    async fn valid_token_reaches_handler_with_claims() {
        let tokens = service();
        let issued = tokens.authenticate("ammammagarillu", "ammammagarillu").unwrap();

        let response = app(tokens)
            .oneshot(request(Some(&issued.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["orgId"], 2);
        assert_eq!(json["role"], "captain");
        assert_eq!(json["principal"], "ammammagarillu");
    }

    #[tokio::test]
    async fn bearer_prefixed_token_is_accepted() {
        let tokens = service();
        let issued = tokens.authenticate("biryanis", "biryanis").unwrap();

        let response = app(tokens)
            .oneshot(request(Some(&format!("Bearer {}", issued.token))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let response = app(service()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message(response).await, "Token is missing!");
    }

    #[tokio::test]
    async fn empty_header_is_rejected_as_missing() {
        let response = app(service()).oneshot(request(Some(""))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message(response).await, "Token is missing!");
    }

    #[tokio::test]
    async fn garbage_token_is_rejected_with_cause() {
        let response = app(service())
            .oneshot(request(Some("not-a-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(message(response).await.starts_with("Token is invalid: "));
    }

    #[tokio::test]
    async fn token_from_other_secret_is_rejected() {
        let foreign = service_with_secret(b"some-other-secret")
            .authenticate("biryanis", "biryanis")
            .unwrap();

        let response = app(service())
            .oneshot(request(Some(&foreign.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            message(response).await,
            "Token is invalid: Signature verification failed"
        );
    }

    #[tokio::test]
    async fn extractor_without_middleware_rejects() {
        let unguarded = Router::new().route("/guarded", get(echo));
        let response = unguarded.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
