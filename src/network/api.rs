//! HTTP API
//!
//! The three JSON endpoints that surround the WebSocket: lobby creation,
//! login (which issues the admission token), and status polling. Served on
//! its own listener so the game transport stays a plain WebSocket port.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::session::lobby::GameState;
use crate::session::manager::{LoginError, Manager};

/// Body of `POST /api/lobby`.
#[derive(Debug, Deserialize)]
pub struct CreateLobbyRequest {
    /// Display name for the new lobby.
    #[serde(rename = "lobbyName")]
    pub lobby_name: String,
}

/// Response to `POST /api/lobby`.
#[derive(Debug, Serialize)]
pub struct CreateLobbyResponse {
    /// Identifier of the created lobby.
    #[serde(rename = "lobbyId")]
    pub lobby_id: String,
}

/// Body of `POST /api/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username to authenticate as.
    pub username: String,
    /// Password; registers the user on first login.
    pub password: String,
    /// Lobby to log into.
    #[serde(rename = "lobbyId")]
    pub lobby_id: String,
}

/// Response to a successful `POST /api/login`.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Single-use admission token for the WebSocket upgrade.
    pub token: String,
    /// Echo of the lobby id the token is good for.
    #[serde(rename = "lobbyId")]
    pub lobby_id: String,
}

/// Body of `POST /api/status`.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// Lobby to query; need not be live.
    #[serde(rename = "lobbyId")]
    pub lobby_id: String,
}

/// Response to `POST /api/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Lifecycle state, `"dne"` for lobbies that never existed.
    #[serde(rename = "lobbyStatus")]
    pub lobby_status: GameState,
}

/// JSON error body used by all endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable failure description.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Build the API router.
pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/api/lobby", post(create_lobby))
        .route("/api/login", post(login))
        .route("/api/status", post(status))
        .with_state(manager)
}

/// Serve the API until the shutdown channel fires.
pub async fn serve(
    addr: SocketAddr,
    manager: Arc<Manager>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api server listening");
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("api server shutting down");
        })
        .await
}

async fn create_lobby(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<CreateLobbyRequest>,
) -> Json<CreateLobbyResponse> {
    let lobby_id = manager.create_lobby(&req.lobby_name);
    Json(CreateLobbyResponse { lobby_id })
}

async fn login(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let lobby_id = req.lobby_id.clone();
    // Bcrypt is CPU-bound; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || {
        manager.login(&req.lobby_id, &req.username, &req.password)
    })
    .await;

    match result {
        Ok(Ok(token)) => Ok(Json(LoginResponse { token, lobby_id })),
        Ok(Err(err)) => Err(login_error(err)),
        Err(join_err) => {
            warn!(%join_err, "login task failed");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
            ))
        }
    }
}

fn login_error(err: LoginError) -> ApiError {
    match err {
        LoginError::UnknownLobby => api_error(StatusCode::NOT_FOUND, err.to_string()),
        LoginError::AuthenticationFailure => api_error(StatusCode::UNAUTHORIZED, err.to_string()),
        LoginError::Hash(_) => {
            warn!(%err, "password hashing failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn status(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<StatusRequest>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        lobby_status: manager.lobby_status(&req.lobby_id),
    })
}
