//! Wire types for the SmartServe server.
//!
//! HTTP request/response bodies and the JSON frames exchanged over the
//! realtime WebSocket channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Role;

/// Body of `POST /api/admin/login`.
///
/// Both fields are optional at the serde level so that an absent field is
/// reported as missing credentials rather than a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    /// Principal identifier.
    #[serde(default)]
    pub username: Option<String>,

    /// Principal secret.
    #[serde(default)]
    pub password: Option<String>,
}

impl LoginRequest {
    /// Returns `(username, password)` with absent fields as empty strings.
    pub fn fields(&self) -> (&str, &str) {
        (
            self.username.as_deref().unwrap_or_default(),
            self.password.as_deref().unwrap_or_default(),
        )
    }
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Signed session token.
    pub token: String,

    /// Organization bound into the token.
    pub org_id: i64,

    /// Role bound into the token, omitted when the principal has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Response of the protected admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedResponse {
    /// Human-readable confirmation naming the organization.
    pub message: String,

    /// Caller's organization.
    pub org_id: i64,

    /// Caller's role, omitted when the token carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Kinds of event relayed over the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// A customer placed an order.
    NewOrder,
    /// Kitchen or floor staff changed an order's status.
    StatusUpdate,
}

/// One realtime event frame.
///
/// ```json
/// { "event": "newOrder", "data": { "tableId": 4, "items": ["dosa"] } }
/// ```
///
/// `data` is opaque to the server and relayed as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Event name, sent on the wire as `event`.
    #[serde(rename = "event")]
    pub kind: EventKind,

    /// Client-defined payload.
    #[serde(default)]
    pub data: Value,
}

impl RealtimeEvent {
    /// Creates an event with the given payload.
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// Parses a text frame sent by a client.
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
