//! Session token issuance and verification.
//!
//! Staff log in with a principal id and secret. On success the
//! [`TokenService`] mints an HS256 JWT binding the principal to one
//! organization and, when provisioned, one role. The token is
//! self-contained: verification needs only the process-wide signing secret
//! and the current time, never the credential store.
//!
//! # Token Claims
//!
//! ```json
//! { "username": "biryanis", "orgId": 1, "role": "admin", "iat": 1700000000, "exp": 1700086400 }
//! ```
//!
//! `role` is omitted for principals without one.
//!
//! # Known weaknesses
//!
//! Secrets are compared with plain equality and an unknown principal returns
//! earlier than a wrong secret. Both failures produce the same error, but
//! response timing can still differ.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use smartserve_server::auth::TokenService;
//! use smartserve_server::credentials::{CredentialRecord, InMemoryCredentialStore};
//!
//! let store = InMemoryCredentialStore::new(vec![
//!     CredentialRecord::new("biryanis", "biryanis", 1, None),
//! ]);
//! let service = TokenService::new(Arc::new(store), b"signing-secret", Duration::from_secs(86_400));
//!
//! let issued = service.authenticate("biryanis", "biryanis").unwrap();
//! let claims = service.authorize(Some(&issued.token)).unwrap();
//! assert_eq!(claims.org_id, 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::credentials::{CredentialStore, Role};

/// Default token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors produced while logging in or checking a presented token.
///
/// The display strings are returned to callers verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Principal id or secret was absent or empty.
    #[error("Could not verify")]
    MissingCredentials,

    /// Unknown principal or wrong secret. The two cases are deliberately
    /// indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// No token was presented.
    #[error("Token is missing!")]
    TokenMissing,

    /// The token is malformed, carries a bad signature, or has expired.
    #[error("Token is invalid: {0}")]
    TokenInvalid(String),

    /// Signing a freshly built token failed.
    #[error("failed to issue token: {0}")]
    TokenIssue(String),
}

impl AuthError {
    /// Creates a token-invalid error with the given cause.
    pub fn token_invalid(cause: impl Into<String>) -> Self {
        Self::TokenInvalid(cause.into())
    }

    /// Returns `true` for failures caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::TokenIssue(_))
    }
}

/// Claims carried inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal the token was issued to.
    #[serde(rename = "username")]
    pub principal_id: String,

    /// Organization the principal is bound to.
    #[serde(rename = "orgId")]
    pub org_id: i64,

    /// Role at issuance, if the principal has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Issued-at, unix seconds.
    pub iat: i64,

    /// Expiry, unix seconds.
    pub exp: i64,
}

impl Claims {
    /// Returns the expiry as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// Returns `true` if `now` is at or past the expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}

/// Result of a successful login.
///
/// The organization and role are duplicated here so clients can use them
/// without decoding the token.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Signed, encoded token.
    pub token: String,

    /// Organization bound into the token.
    pub org_id: i64,

    /// Role bound into the token.
    pub role: Option<Role>,

    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("org_id", &self.org_id)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues and verifies session tokens.
///
/// Cheap to clone; the credential store and keys are shared.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
}

impl TokenService {
    /// Creates a token service signing with `secret`.
    ///
    /// The secret is fixed for the lifetime of the service. Replacing it
    /// invalidates every outstanding token.
    pub fn new(store: Arc<dyn CredentialStore>, secret: &[u8], ttl: Duration) -> Self {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        debug!(ttl_secs, "Created token service");
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    /// Verifies a principal's secret and issues a token on success.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredentials`] if either field is empty; the
    ///   store is not consulted.
    /// - [`AuthError::InvalidCredentials`] for an unknown principal or a
    ///   wrong secret.
    pub fn authenticate(&self, principal_id: &str, secret: &str) -> Result<IssuedToken, AuthError> {
        self.authenticate_at(principal_id, secret, Utc::now())
    }

    /// Same as [`authenticate`](Self::authenticate) with an explicit clock.
    pub fn authenticate_at(
        &self,
        principal_id: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        if principal_id.is_empty() || secret.is_empty() {
            debug!("Login rejected: missing credentials");
            return Err(AuthError::MissingCredentials);
        }

        let record = match self.store.lookup(principal_id) {
            Some(record) => record,
            None => {
                debug!(principal = %principal_id, reason = "unknown_principal", "Login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if record.secret != secret {
            debug!(principal = %principal_id, reason = "secret_mismatch", "Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let iat = now.timestamp();
        let claims = Claims {
            principal_id: record.principal_id,
            org_id: record.org_id,
            role: record.role,
            iat,
            exp: iat.saturating_add(self.ttl_secs),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::TokenIssue(err.to_string()))?;

        let expires_at = claims.expires_at().unwrap_or(DateTime::<Utc>::MAX_UTC);

        info!(
            principal = %claims.principal_id,
            org_id = claims.org_id,
            role = claims.role.map(|r| r.as_str()).unwrap_or("<none>"),
            expires_at = %expires_at,
            "Issued session token"
        );

        Ok(IssuedToken {
            token,
            org_id: claims.org_id,
            role: claims.role,
            expires_at,
        })
    }

    /// Validates a presented token and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenMissing`] if no token (or an empty one) is given.
    /// - [`AuthError::TokenInvalid`] for any parse, signature, or expiry
    ///   failure, with the cause in the message.
    pub fn authorize(&self, presented: Option<&str>) -> Result<Claims, AuthError> {
        self.authorize_at(presented, Utc::now())
    }

    /// Same as [`authorize`](Self::authorize) with an explicit clock.
    pub fn authorize_at(
        &self,
        presented: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthError> {
        let token = match presented.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::TokenMissing),
        };

        // Expiry is checked below against `now` so callers control the clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|err| AuthError::TokenInvalid(describe_jwt_error(&err)))?
            .claims;

        if claims.is_expired_at(now) {
            trace!(principal = %claims.principal_id, exp = claims.exp, "Rejected expired token");
            return Err(AuthError::token_invalid("Signature has expired"));
        }

        trace!(principal = %claims.principal_id, org_id = claims.org_id, "Token verified");
        Ok(claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("principal_count", &self.store.len())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

/// Turns a jsonwebtoken error into a human-readable cause.
fn describe_jwt_error(error: &jsonwebtoken::errors::Error) -> String {
    match error.kind() {
        ErrorKind::InvalidSignature => "Signature verification failed".to_string(),
        ErrorKind::ExpiredSignature => "Signature has expired".to_string(),
        ErrorKind::InvalidToken => "Not enough segments".to_string(),
        ErrorKind::InvalidAlgorithm => "The specified alg value is not allowed".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => {
            format!("Token is missing the \"{claim}\" claim")
        }
        ErrorKind::Base64(err) => format!("Invalid token encoding: {err}"),
        ErrorKind::Json(err) => format!("Invalid token payload: {err}"),
        ErrorKind::Utf8(err) => format!("Invalid token payload: {err}"),
        _ => error.to_string(),
    }
}
