//! WebSocket Server
//!
//! Accept loop for game connections. Admission runs inside the upgrade
//! handshake, so a bad lobby id or token is refused with a real HTTP status
//! before any WebSocket exists: 401 for credential problems, 410 for a lobby
//! whose game already finished. Admitted connections are registered with
//! their lobby, caught up on state they missed, and handed to the pump pair.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::network::client::Client;
use crate::network::dispatch::Dispatcher;
use crate::network::protocol::Event;
use crate::session::lobby::{GameState, Lobby};
use crate::session::manager::{Admission, AdmissionError, Manager, ManagerConfig};

/// Query parameter carrying the lobby id on the upgrade request.
const QUERY_LOBBY: &str = "l";
/// Query parameter carrying the admission token on the upgrade request.
const QUERY_TOKEN: &str = "otp";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP API.
    pub api_addr: SocketAddr,
    /// Bind address for WebSocket upgrades.
    pub ws_addr: SocketAddr,
    /// Per-connection outbound queue capacity.
    pub egress_capacity: usize,
    /// Session-layer settings.
    pub session: ManagerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            egress_capacity: 64,
            session: ManagerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// anything unset or unparsable.
    ///
    /// Recognized variables: `TRIVIA_API_ADDR`, `TRIVIA_WS_ADDR`,
    /// `TRIVIA_EGRESS_CAPACITY`, `TRIVIA_TIME_LIMIT_SECS`,
    /// `TRIVIA_RESULTS_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = env_parse("TRIVIA_API_ADDR") {
            config.api_addr = addr;
        }
        if let Some(addr) = env_parse("TRIVIA_WS_ADDR") {
            config.ws_addr = addr;
        }
        if let Some(capacity) = env_parse("TRIVIA_EGRESS_CAPACITY") {
            config.egress_capacity = capacity;
        }
        if let Some(secs) = env_parse("TRIVIA_TIME_LIMIT_SECS") {
            config.session.default_time_limit_secs = secs;
        }
        if let Ok(dir) = std::env::var("TRIVIA_RESULTS_DIR") {
            config.session.results_dir = dir.into();
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Server startup failures.
#[derive(Debug, thiserror::Error)]
pub enum WsServerError {
    /// Could not bind the listen address.
    #[error("failed to bind listener: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The WebSocket side of the server.
pub struct WsServer {
    config: ServerConfig,
    manager: Arc<Manager>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsServer {
    /// Build the server and its session registry.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let manager = Arc::new(Manager::new(config.session.clone()));
        let dispatcher = Arc::new(Dispatcher::new(manager.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            manager,
            dispatcher,
            shutdown_tx,
        })
    }

    /// The session registry, shared with the HTTP API.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Accept connections until shutdown is signalled.
    pub async fn run(self: Arc<Self>) -> Result<(), WsServerError> {
        let listener = TcpListener::bind(self.config.ws_addr).await?;
        info!(addr = %self.config.ws_addr, "websocket server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("websocket server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(%err, "failed to accept connection");
                            continue;
                        }
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
            }
        }
        Ok(())
    }

    /// Signal shutdown to the accept loop and API.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// A fresh receiver on the shutdown channel.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let mut admitted: Option<Admission> = None;
        let manager = self.manager.clone();
        let ws = match accept_hdr_async(stream, |req: &Request, resp: Response| {
            match admit_request(&manager, req) {
                Ok(admission) => {
                    admitted = Some(admission);
                    Ok(resp)
                }
                Err(err) => {
                    debug!(%peer, %err, "upgrade rejected");
                    Err(reject_response(&err))
                }
            }
        })
        .await
        {
            Ok(ws) => ws,
            Err(err) => {
                debug!(%peer, %err, "handshake failed");
                return;
            }
        };
        let Some(admission) = admitted else { return };

        let Admission {
            username,
            token,
            lobby,
        } = admission;
        info!(%peer, client = %username, lobby = %lobby.id(), "connection admitted");

        let (client, egress_rx) =
            Client::new(username, token, lobby.clone(), self.config.egress_capacity);
        lobby.add_client(client.clone());
        catch_up(&lobby, &client);

        client.run(ws, egress_rx, self.dispatcher.clone()).await;
    }
}

/// Resolve an upgrade request into an admission via its query string.
fn admit_request(manager: &Manager, req: &Request) -> Result<Admission, AdmissionError> {
    let query = req.uri().query().unwrap_or("");
    let lobby_id =
        query_param(query, QUERY_LOBBY).ok_or(AdmissionError::MissingCredentials)?;
    let token = query_param(query, QUERY_TOKEN).ok_or(AdmissionError::MissingCredentials)?;
    manager.admit(lobby_id, token)
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Map an admission failure onto the handshake response.
fn reject_response(err: &AdmissionError) -> ErrorResponse {
    let status = match err {
        AdmissionError::LobbyFinished => StatusCode::GONE,
        AdmissionError::MissingCredentials
        | AdmissionError::UnknownLobby
        | AdmissionError::InvalidToken => StatusCode::UNAUTHORIZED,
    };
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = status;
    response
}

/// Bring a freshly admitted client up to date with its lobby.
///
/// Before the game starts that is the member list (one `new-member` per
/// member in join order, the newcomer included) while everyone else learns of
/// the newcomer. Mid-game it is the start event and the client's current
/// problem.
fn catch_up(lobby: &Arc<Lobby>, client: &Arc<Client>) {
    match lobby.game_state() {
        GameState::Waiting => {
            let members: Vec<Arc<Client>> =
                lobby.state.read().clients.values().cloned().collect();
            for member in &members {
                if member.seq() != client.seq() {
                    member.send(Event::new_member(client.name()));
                }
                client.send(Event::new_member(member.name()));
            }
        }
        GameState::InPlay => {
            if let Some(start_time) = lobby.start_time() {
                client.send(Event::start_game(start_time, lobby.time_limit_secs()));
            }
            if let Some(event) = lobby.current_problem_event(client.name()) {
                client.send(event);
            }
        }
        // Admission already refused finished lobbies; nothing to send.
        GameState::Finished | GameState::DoesNotExist => {}
    }
}
