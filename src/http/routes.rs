//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::app::AppState;
use crate::store::{self, friends, FriendError, MatchHistoryEntry, PlayerProfile, StoreError};
use crate::util::time::uptime_secs;
use crate::ws::handler::{game_ws_handler, lobby_ws_handler};
use crate::ws::protocol::{Identity, LobbyServerMsg};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;
const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origins);

    let socket_routes = Router::new()
        .route("/ws/lobby", get(lobby_ws_handler))
        .route("/ws/game", get(game_ws_handler));

    let api_routes = Router::new()
        .route("/api/online", get(online_handler))
        .route("/api/profile/:identity", get(profile_handler).put(update_profile_handler))
        .route("/api/friends/:identity", get(friends_handler))
        .route("/api/friends/request", post(friend_request_handler))
        .route("/api/friends/accept", post(friend_accept_handler))
        .route("/api/history/:identity", get(history_handler));

    Router::new()
        .route("/health", get(health_handler))
        .merge(socket_routes)
        .merge(api_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Listed origins get credentialed CORS; with none configured any origin
/// is allowed without credentials
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|s| s.parse().ok()).collect();
    if allowed.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(allowed).allow_credentials(true)
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    players_in_rooms: usize,
    queue_size: usize,
    online: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.lobby.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.active_rooms(),
        players_in_rooms: state.rooms.total_players(),
        queue_size,
        online: state.presence.online_count(),
    })
}

// ============================================================================
// Presence and profiles
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct OnlinePlayer {
    identity: Identity,
    display_name: String,
}

async fn online_handler(State(state): State<AppState>) -> Json<Vec<OnlinePlayer>> {
    let online = state
        .presence
        .online()
        .into_iter()
        .map(|(identity, display_name)| OnlinePlayer {
            identity,
            display_name,
        })
        .collect();
    Json(online)
}

async fn profile_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<PlayerProfile>, AppError> {
    let identity = parse_identity(&identity)?;
    state
        .store
        .get_profile(identity)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
}

#[derive(Deserialize)]
struct UpdateProfileRequest {
    display_name: String,
}

async fn update_profile_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<PlayerProfile>, AppError> {
    let identity = parse_identity(&identity)?;
    let display_name = req.display_name.trim();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "Display name must be 1-{MAX_DISPLAY_NAME_LEN} characters"
        )));
    }

    let profile = store::touch_profile(state.store.as_ref(), &identity, Some(display_name)).await?;
    info!(identity = %identity, "Profile updated");
    Ok(Json(profile))
}

// ============================================================================
// Friends
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct FriendEntry {
    identity: Identity,
    display_name: String,
    online: bool,
}

async fn friends_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<Vec<FriendEntry>>, AppError> {
    let identity = parse_identity(&identity)?;
    let friend_ids = friends::accepted_friends(state.store.as_ref(), &identity).await?;

    let mut entries = Vec::with_capacity(friend_ids.len());
    for friend in friend_ids {
        let display_name = match state.presence.display_name(&friend) {
            Some(name) => name,
            None => store::display_name_of(state.store.as_ref(), &friend).await,
        };
        entries.push(FriendEntry {
            online: state.presence.is_online(&friend),
            identity: friend,
            display_name,
        });
    }
    Ok(Json(entries))
}

#[derive(Deserialize)]
struct FriendPair {
    from: String,
    to: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

/// `from` asks `to` to be friends
async fn friend_request_handler(
    State(state): State<AppState>,
    Json(req): Json<FriendPair>,
) -> Result<Json<StatusResponse>, AppError> {
    let from = parse_identity(&req.from)?;
    let to = parse_identity(&req.to)?;
    friends::request(state.store.as_ref(), &from, &to).await?;

    let display_name = store::display_name_of(state.store.as_ref(), &from).await;
    state.presence.send(&to, LobbyServerMsg::FriendRequest { from, display_name });
    Ok(Json(StatusResponse { status: "pending" }))
}

/// `to` accepts the request `from` sent earlier
async fn friend_accept_handler(
    State(state): State<AppState>,
    Json(req): Json<FriendPair>,
) -> Result<Json<StatusResponse>, AppError> {
    let from = parse_identity(&req.from)?;
    let to = parse_identity(&req.to)?;
    friends::accept(state.store.as_ref(), &from, &to).await?;

    let display_name = store::display_name_of(state.store.as_ref(), &to).await;
    state.presence.send(
        &from,
        LobbyServerMsg::FriendAccepted {
            identity: to,
            display_name,
        },
    );
    Ok(Json(StatusResponse { status: "accepted" }))
}

// ============================================================================
// Match history
// ============================================================================

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MatchHistoryEntry>>, AppError> {
    let identity = parse_identity(&identity)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let entries = state.store.history(identity, limit).await?;
    Ok(Json(entries))
}

fn parse_identity(raw: &str) -> Result<Identity, AppError> {
    let identity = Identity::new(raw);
    if identity.is_empty() {
        return Err(AppError::BadRequest("Identity must not be empty".to_string()));
    }
    Ok(identity)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Friend(#[from] FriendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Friend(FriendError::SelfRequest) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Friend(FriendError::UnknownPlayer) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Friend(FriendError::NoPendingRequest) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Friend(FriendError::Store(e)) | AppError::Store(e) => {
                error!(error = %e, "Record store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde::de::DeserializeOwned;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::lobby::PresenceFrame;
    use crate::store::MemoryStore;

    fn test_state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "RESERVATION_SECRET" => Some("test-secret".to_string()),
            _ => None,
        })
        .unwrap();
        let (state, _outcomes) = AppState::with_store(config, Arc::new(MemoryStore::new()));
        state
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(state: &AppState, uri: &str) -> (StatusCode, Option<T>) {
        let (status, body) = call(state, Request::get(uri).body(Body::empty()).unwrap()).await;
        (status, serde_json::from_slice(&body).ok())
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = test_state();
        let (status, body) = get_json::<serde_json::Value>(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_rooms"], 0);
        assert_eq!(body["online"], 0);
    }

    #[tokio::test]
    async fn profile_can_be_created_and_read() {
        let state = test_state();
        let (status, _) = get_json::<PlayerProfile>(&state, "/api/profile/alice").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = json_request(Method::PUT, "/api/profile/alice", serde_json::json!({"display_name": " Alice "}));
        let (status, _) = call(&state, request).await;
        assert_eq!(status, StatusCode::OK);

        let (status, profile) = get_json::<PlayerProfile>(&state, "/api/profile/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile.unwrap().display_name, "Alice");

        let request = json_request(Method::PUT, "/api/profile/alice", serde_json::json!({"display_name": "  "}));
        assert_eq!(call(&state, request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn friend_request_and_accept_notify_online_players() {
        let state = test_state();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        state.presence.connect(&alice, "Alice", tx_a).await;
        state.presence.connect(&bob, "Bob", tx_b).await;

        let request = json_request(Method::POST, "/api/friends/request", serde_json::json!({"from": "alice", "to": "bob"}));
        assert_eq!(call(&state, request).await.0, StatusCode::OK);
        assert_eq!(
            rx_b.try_recv().unwrap(),
            PresenceFrame::Message(LobbyServerMsg::FriendRequest {
                from: alice.clone(),
                display_name: "Alice".into(),
            })
        );

        let request = json_request(Method::POST, "/api/friends/accept", serde_json::json!({"from": "alice", "to": "bob"}));
        assert_eq!(call(&state, request).await.0, StatusCode::OK);
        assert_eq!(
            rx_a.try_recv().unwrap(),
            PresenceFrame::Message(LobbyServerMsg::FriendAccepted {
                identity: bob.clone(),
                display_name: "Bob".into(),
            })
        );

        let (_, friends) = get_json::<Vec<FriendEntry>>(&state, "/api/friends/alice").await;
        let friends = friends.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].identity, bob);
        assert!(friends[0].online);
    }

    #[tokio::test]
    async fn friend_errors_map_to_status_codes() {
        let state = test_state();
        let request = json_request(Method::POST, "/api/friends/request", serde_json::json!({"from": "a", "to": "a"}));
        assert_eq!(call(&state, request).await.0, StatusCode::BAD_REQUEST);

        let request = json_request(Method::POST, "/api/friends/request", serde_json::json!({"from": "a", "to": "ghost"}));
        assert_eq!(call(&state, request).await.0, StatusCode::NOT_FOUND);

        let request = json_request(Method::POST, "/api/friends/accept", serde_json::json!({"from": "a", "to": "b"}));
        assert_eq!(call(&state, request).await.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn game_socket_requires_valid_reservation() {
        let state = test_state();
        let request = Request::get("/ws/game?reservation=bogus")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&state, request).await;
        assert_ne!(status, StatusCode::SWITCHING_PROTOCOLS);
    }

    #[tokio::test]
    async fn empty_history_is_a_list() {
        let state = test_state();
        let (status, entries) = get_json::<Vec<MatchHistoryEntry>>(&state, "/api/history/alice?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert!(entries.unwrap().is_empty());
    }
}
