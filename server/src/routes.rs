//! HTTP route handlers for the SmartServe server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /api/admin/login` - Exchange staff credentials for a session token
//! - `GET /api/admin/protected` - Token-gated endpoint scoped to the caller's organization
//! - `GET /api/restaurants` - List restaurants
//! - `GET /api/restaurants/{org_id}` - Look up one restaurant
//! - `GET /ws` - Realtime order event channel
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The token service used by login and the access guard
//! - The realtime hub relaying events between WebSocket clients
//! - The restaurant directory
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use smartserve_server::config::Config;
//! use smartserve_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        rejection::PathRejection,
        ws::{Message, WebSocket},
        DefaultBodyLimit, Path, State, WebSocketUpgrade,
    },
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace};

use crate::auth::{AuthError, TokenService};
use crate::broadcast::{Connection, ConnectionId, RealtimeHub};
use crate::config::Config;
use crate::credentials::InMemoryCredentialStore;
use crate::error::{Result, ServerError};
use crate::guard::{require_auth, AuthContext};
use crate::restaurants::{InMemoryRestaurantDirectory, RestaurantDirectory, RestaurantSummary};
use crate::types::{LoginRequest, LoginResponse, ProtectedResponse, RealtimeEvent};

// ============================================================================
// Constants
// ============================================================================

/// Maximum body size for login requests (64 KiB).
const MAX_LOGIN_BODY_SIZE: usize = 64 * 1024;

/// Interval between server pings on realtime connections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Issues tokens on login and verifies them for protected routes.
    pub tokens: TokenService,

    /// Relays realtime events between WebSocket clients.
    pub hub: RealtimeHub,

    /// Restaurant listing backend.
    pub restaurants: Arc<dyn RestaurantDirectory>,

    /// Ping interval for realtime connections.
    pub heartbeat_interval: Duration,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state backed by the in-memory stores built from
    /// `config`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use smartserve_server::config::Config;
    /// use smartserve_server::routes::AppState;
    ///
    /// let config = Config::from_env().expect("failed to load config");
    /// let state = AppState::new(config);
    /// ```
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = InMemoryCredentialStore::new(config.credentials.iter().cloned());
        let tokens = TokenService::new(
            Arc::new(store),
            config.secret_key.as_bytes(),
            config.token_ttl,
        );
        let restaurants = InMemoryRestaurantDirectory::new(config.restaurants.iter().cloned());

        Self::with_components(config, tokens, RealtimeHub::new(), Arc::new(restaurants))
    }

    /// Creates application state with caller-supplied components.
    ///
    /// Useful for testing or for plugging in other store backends.
    #[must_use]
    pub fn with_components(
        config: Config,
        tokens: TokenService,
        hub: RealtimeHub,
        restaurants: Arc<dyn RestaurantDirectory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            tokens,
            hub,
            restaurants,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            start_time: Instant::now(),
        }
    }

    /// Overrides the realtime ping interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("tokens", &self.tokens)
            .field("hub", &self.hub)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// The protected route sits behind [`require_auth`]. Every route gets
/// permissive CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/admin/protected", get(get_protected))
        .route_layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            require_auth,
        ));

    Router::new()
        .route(
            "/api/admin/login",
            post(post_login).layer(DefaultBodyLimit::max(MAX_LOGIN_BODY_SIZE)),
        )
        .merge(protected)
        .route("/api/restaurants", get(get_restaurants))
        .route("/api/restaurants/{org_id}", get(get_restaurant))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// POST /api/admin/login
// ============================================================================

/// POST /api/admin/login - Exchange credentials for a session token.
///
/// # Request Body
///
/// ```json
/// { "username": "biryanis", "password": "..." }
/// ```
///
/// # Responses
///
/// - `200 OK` - `{ "token": "...", "orgId": 1, "role": "admin" }`
/// - `401 Unauthorized` - `Could not verify` for absent fields or an
///   unreadable body, `Invalid credentials` otherwise
async fn post_login(State(state): State<AppState>, body: Bytes) -> Result<Json<LoginResponse>> {
    let request = if body.is_empty() {
        LoginRequest::default()
    } else {
        // The parse error can quote submitted values, so only its category is logged.
        serde_json::from_slice::<LoginRequest>(&body).map_err(|err| {
            debug!(category = ?err.classify(), "Unreadable login body");
            AuthError::MissingCredentials
        })?
    };

    let (username, password) = request.fields();
    let issued = state.tokens.authenticate(username, password)?;

    Ok(Json(LoginResponse {
        token: issued.token,
        org_id: issued.org_id,
        role: issued.role,
    }))
}

// ============================================================================
// GET /api/admin/protected
// ============================================================================

/// GET /api/admin/protected - Illustrative token-gated endpoint.
///
/// Echoes the organization (and role) bound into the caller's token.
async fn get_protected(auth: AuthContext) -> Json<ProtectedResponse> {
    trace!(org_id = auth.org_id(), "Serving protected route");

    Json(ProtectedResponse {
        message: format!("This is a protected route for orgId: {}", auth.org_id()),
        org_id: auth.org_id(),
        role: auth.role(),
    })
}

// ============================================================================
// GET /api/restaurants
// ============================================================================

/// GET /api/restaurants - List every restaurant.
///
/// # Responses
///
/// - `200 OK` - `[{ "orgId": 1, "name": "Biryanis" }, ...]`
/// - `500 Internal Server Error` - The directory could not be read
async fn get_restaurants(State(state): State<AppState>) -> Result<Json<Vec<RestaurantSummary>>> {
    Ok(Json(state.restaurants.list()?))
}

/// GET /api/restaurants/{org_id} - Look up one restaurant.
///
/// # Responses
///
/// - `200 OK` - `{ "orgId": 1, "name": "Biryanis" }`
/// - `400 Bad Request` - `org_id` is not an integer
/// - `404 Not Found` - No restaurant for that organization
async fn get_restaurant(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<RestaurantSummary>> {
    let Path(org_id) = path?;
    state
        .restaurants
        .get(org_id)?
        .map(Json)
        .ok_or_else(|| ServerError::not_found(format!("restaurant {org_id}")))
}

// ============================================================================
// GET /ws - Realtime Channel
// ============================================================================

/// GET /ws - Realtime order event channel.
///
/// Any peer may connect; no token is required.
///
/// # WebSocket Protocol
///
/// Clients send and receive JSON text frames:
///
/// ```json
/// { "event": "newOrder", "data": { ... } }
/// { "event": "statusUpdate", "data": { ... } }
/// ```
///
/// A frame from one client is relayed unchanged to every other connected
/// client. Unreadable frames and unknown events are dropped. The server
/// pings every [`HEARTBEAT_INTERVAL`] and closes connections that have sent
/// nothing, not even a pong, since the previous ping.
async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    debug!("WebSocket client connecting");
    let hub = state.hub.clone();
    let heartbeat = state.heartbeat_interval;
    ws.on_upgrade(move |socket| handle_websocket(socket, hub, heartbeat))
}

/// Handles an established WebSocket connection.
async fn handle_websocket(socket: WebSocket, hub: RealtimeHub, heartbeat: Duration) {
    let (sender, mut receiver) = socket.split();
    let connection = hub.connect();
    let connection_id = connection.id();

    info!(connection_id = %connection_id, "WebSocket client connected");

    // Set on every inbound frame, cleared at every ping.
    let alive = Arc::new(AtomicBool::new(true));

    let mut forward_task = tokio::spawn(forward_events(
        sender,
        connection,
        heartbeat,
        Arc::clone(&alive),
    ));

    let relay_hub = hub.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            alive.store(true, Ordering::Release);

            match msg {
                Ok(Message::Text(text)) => relay_frame(&relay_hub, connection_id, text.as_str()),
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %connection_id, "WebSocket client sent close frame");
                    break;
                }
                Ok(Message::Ping(data)) => {
                    // axum handles pong automatically
                    trace!(data_len = data.len(), "Received ping");
                }
                Ok(Message::Pong(_)) => {
                    trace!(connection_id = %connection_id, "Received pong");
                }
                Ok(Message::Binary(data)) => {
                    debug!(connection_id = %connection_id, len = data.len(), "Ignoring binary frame");
                }
                Err(err) => {
                    debug!(connection_id = %connection_id, error = %err, "WebSocket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
    }

    hub.disconnect(connection_id);
    info!(connection_id = %connection_id, "WebSocket client disconnected");
}

/// Sends peer events and heartbeat pings to one client until either side
/// gives up.
async fn forward_events(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut connection: Connection,
    heartbeat: Duration,
    alive: Arc<AtomicBool>,
) {
    let connection_id = connection.id();
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = connection.recv() => {
                let Some(event) = event else {
                    debug!(connection_id = %connection_id, "Realtime connection closed");
                    break;
                };

                match serde_json::to_string(&*event) {
                    Ok(json) => {
                        trace!(connection_id = %connection_id, kind = ?event.kind, "Sending event to WebSocket client");
                        if let Err(err) = sender.send(Message::Text(json.into())).await {
                            debug!(connection_id = %connection_id, error = %err, "Failed to send event to WebSocket client");
                            break;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to serialize event");
                    }
                }
            }
            _ = ticker.tick() => {
                if !alive.swap(false, Ordering::AcqRel) {
                    info!(connection_id = %connection_id, "Terminating unresponsive WebSocket client");
                    break;
                }
                if let Err(err) = sender.send(Message::Ping(Bytes::new())).await {
                    debug!(connection_id = %connection_id, error = %err, "Failed to ping WebSocket client");
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
}

/// Parses one client frame and relays it to every other connection.
fn relay_frame(hub: &RealtimeHub, origin: ConnectionId, text: &str) {
    match RealtimeEvent::from_frame(text) {
        Ok(event) => {
            let kind = event.kind;
            let peers = hub.publish(origin, event);
            debug!(connection_id = %origin, kind = ?kind, peers, "Relayed realtime event");
        }
        Err(err) => {
            debug!(connection_id = %origin, error = %err, "Dropping unreadable realtime frame");
        }
    }
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of live realtime connections.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// No authentication required.
///
/// ```json
/// { "status": "ok", "connections": 3, "uptimeSeconds": 3600 }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.hub.connection_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
