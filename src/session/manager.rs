//! Session Registry
//!
//! The manager owns the lobby-id → lobby map and brokers everything that
//! crosses a lobby boundary: creation, login, connection admission, status
//! queries, and end-of-game teardown. The map is read-mostly after creation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::game::problem::ProblemSet;
use crate::game::results::{GameRecord, ResultsStore, UserScore};
use crate::network::protocol::Event;
use crate::session::lobby::{GameState, Lobby, User};
use crate::{DEFAULT_TIME_LIMIT_SECS, TOKEN_SWEEP_INTERVAL, TOKEN_TTL};

/// Session-layer configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Admission token time-to-live.
    pub token_ttl: Duration,
    /// How often each lobby sweeps its token store.
    pub sweep_interval: Duration,
    /// Game duration for new lobbies, in seconds.
    pub default_time_limit_secs: u32,
    /// Directory for post-game result records.
    pub results_dir: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            token_ttl: TOKEN_TTL,
            sweep_interval: TOKEN_SWEEP_INTERVAL,
            default_time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            results_dir: PathBuf::from("logs"),
        }
    }
}

/// Login failures.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// No lobby with the given id.
    #[error("unknown lobby")]
    UnknownLobby,

    /// Password did not match the stored digest.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// Hashing the password failed.
    #[error("hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Connection admission failures. The cause decides the status code at the
/// upgrade boundary (401 vs 410).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Upgrade request carried no lobby id or token.
    #[error("admission failure: missing credentials")]
    MissingCredentials,

    /// No lobby with the given id.
    #[error("admission failure: unknown lobby")]
    UnknownLobby,

    /// The lobby's game already finished.
    #[error("admission failure: lobby finished")]
    LobbyFinished,

    /// Token unknown, expired, or already consumed.
    #[error("admission failure: invalid token")]
    InvalidToken,
}

/// A successful admission: the resolved identity plus the lobby to join.
pub struct Admission {
    /// Username the token was bound to.
    pub username: String,
    /// The (now consumed) token presented at the upgrade.
    pub token: String,
    /// Lobby the connection belongs to.
    pub lobby: Arc<Lobby>,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("username", &self.username)
            .field("token", &self.token)
            .field("lobby", &self.lobby.id())
            .finish()
    }
}

/// Top-level registry of live lobbies.
pub struct Manager {
    config: ManagerConfig,
    lobbies: RwLock<HashMap<String, Arc<Lobby>>>,
    results: ResultsStore,
}

impl Manager {
    /// Create an empty registry.
    pub fn new(config: ManagerConfig) -> Self {
        let results = ResultsStore::new(config.results_dir.clone());
        Self {
            config,
            lobbies: RwLock::new(HashMap::new()),
            results,
        }
    }

    /// Create a lobby with the default problem sequence. Returns its id.
    pub fn create_lobby(&self, name: &str) -> String {
        self.create_lobby_with_problems(name, ProblemSet::default_set())
    }

    /// Create a lobby with a custom problem sequence. Returns its id.
    pub fn create_lobby_with_problems(&self, name: &str, problems: ProblemSet) -> String {
        let id = Uuid::new_v4().to_string();
        let lobby = Lobby::new(
            id.clone(),
            name.to_string(),
            self.config.default_time_limit_secs,
            problems,
            self.config.token_ttl,
            self.config.sweep_interval,
        );
        self.lobbies.write().insert(id.clone(), lobby);
        info!(lobby = %id, name, "created lobby");
        id
    }

    /// Look up a live lobby.
    pub fn lobby(&self, id: &str) -> Option<Arc<Lobby>> {
        self.lobbies.read().get(id).cloned()
    }

    /// Number of live lobbies.
    pub fn lobby_count(&self) -> usize {
        self.lobbies.read().len()
    }

    /// Authenticate `username` against `lobby_id` and issue an admission
    /// token.
    ///
    /// An unseen username is registered with the supplied password's hash; a
    /// known one must present the matching password. The first user to
    /// authenticate becomes the lobby owner.
    ///
    /// Bcrypt runs on the calling thread; async callers should wrap this in
    /// `spawn_blocking`.
    pub fn login(
        &self,
        lobby_id: &str,
        username: &str,
        password: &str,
    ) -> Result<String, LoginError> {
        let lobby = self.lobby(lobby_id).ok_or(LoginError::UnknownLobby)?;

        let existing_digest = lobby
            .state
            .read()
            .users
            .get(username)
            .map(|u| u.password_hash.clone());

        match existing_digest {
            Some(digest) => {
                if !auth::verify(password, &digest) {
                    debug!(lobby = %lobby_id, username, "login rejected");
                    return Err(LoginError::AuthenticationFailure);
                }
            }
            None => {
                // Hash outside the lock; registration itself is atomic. If a
                // concurrent login for the same fresh username wins the race,
                // its digest stands and must match ours.
                let digest = auth::hash(password)?;
                let raced_digest = {
                    let mut state = lobby.state.write();
                    match state.users.entry(username.to_string()) {
                        std::collections::hash_map::Entry::Vacant(slot) => {
                            slot.insert(User::new(digest));
                            None
                        }
                        std::collections::hash_map::Entry::Occupied(slot) => {
                            Some(slot.get().password_hash.clone())
                        }
                    }
                };
                if let Some(stored) = raced_digest {
                    if !auth::verify(password, &stored) {
                        return Err(LoginError::AuthenticationFailure);
                    }
                }
            }
        }

        {
            let mut state = lobby.state.write();
            if state.owner.is_none() {
                state.owner = Some(username.to_string());
                info!(lobby = %lobby_id, username, "lobby owner set");
            }
        }

        Ok(lobby.tokens().issue(username))
    }

    /// Redeem an admission token for a connection into `lobby_id`.
    ///
    /// Fails when the lobby is unknown, already `Finished`, or the token does
    /// not verify. A finished lobby is rejected before the token is touched,
    /// so the token survives for a status-polling client.
    pub fn admit(&self, lobby_id: &str, token: &str) -> Result<Admission, AdmissionError> {
        let lobby = self.lobby(lobby_id).ok_or(AdmissionError::UnknownLobby)?;
        if lobby.game_state() == GameState::Finished {
            return Err(AdmissionError::LobbyFinished);
        }
        let username = lobby
            .tokens()
            .verify(token)
            .ok_or(AdmissionError::InvalidToken)?;
        Ok(Admission {
            username,
            token: token.to_string(),
            lobby,
        })
    }

    /// Status of a lobby id, live or not.
    ///
    /// Absent from the registry means either "never existed" or "finished and
    /// evicted"; the result record distinguishes them.
    pub fn lobby_status(&self, lobby_id: &str) -> GameState {
        match self.lobby(lobby_id) {
            Some(lobby) => lobby.game_state(),
            None if self.results.exists(lobby_id) => GameState::Finished,
            None => GameState::DoesNotExist,
        }
    }

    /// Evict a lobby and stop its background work. Live connections drain on
    /// their own.
    pub fn remove_lobby(&self, lobby_id: &str) -> bool {
        let removed = self.lobbies.write().remove(lobby_id);
        match removed {
            Some(lobby) => {
                lobby.shutdown();
                info!(lobby = %lobby_id, "removed lobby");
                true
            }
            None => false,
        }
    }

    /// Spawn the game timer for a lobby whose game just started: after the
    /// time limit elapses the game is ended and torn down.
    pub fn spawn_game_timer(self: &Arc<Self>, lobby: Arc<Lobby>) -> JoinHandle<()> {
        let manager = self.clone();
        let limit = Duration::from_secs(u64::from(lobby.time_limit_secs()));
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            manager.finish_lobby(&lobby);
        })
    }

    /// End a lobby's game: move to `Finished`, deliver each client its final
    /// score, persist the result record, and evict the lobby from the
    /// registry.
    pub fn finish_lobby(&self, lobby: &Arc<Lobby>) {
        let (clients, scores) = {
            let mut state = lobby.state.write();
            if let Err(err) = state.end_game() {
                debug!(lobby = %lobby.id(), %err, "game not running, nothing to finish");
                return;
            }
            let clients: Vec<_> = state.clients.values().cloned().collect();
            let scores: HashMap<String, (u32, usize)> = state
                .users
                .iter()
                .map(|(name, user)| (name.clone(), (user.score, user.problem_index)))
                .collect();
            (clients, scores)
        };

        for client in &clients {
            if let Some((score, _)) = scores.get(client.name()) {
                client.send(Event::game_over(*score));
            }
        }

        let mut score_lines: Vec<UserScore> = scores
            .into_iter()
            .map(|(username, (score, problems_answered))| UserScore {
                username,
                score,
                problems_answered,
            })
            .collect();
        score_lines.sort_by(|a, b| a.username.cmp(&b.username));

        let record = GameRecord {
            lobby_id: lobby.id().to_string(),
            lobby_name: lobby.name().to_string(),
            finished_at: Utc::now(),
            scores: score_lines,
        };
        if let Err(err) = self.results.record(&record) {
            warn!(lobby = %lobby.id(), %err, "failed to write result record");
        }

        info!(lobby = %lobby.id(), "game finished");
        self.remove_lobby(lobby.id());
    }
}
