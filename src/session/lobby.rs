//! Lobby State and Registry
//!
//! A lobby owns one game session: its state machine, the registered users,
//! the live connections, and the token store admitting new connections. All
//! mutable state sits behind a single reader/writer lock per lobby; handlers
//! never await while holding it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::game::problem::ProblemSet;
use crate::network::client::Client;
use crate::network::protocol::Event;
use crate::session::token::TokenStore;

/// Game lifecycle states.
///
/// The machine only ever moves `Waiting → InPlay → Finished`; it never goes
/// backward and never skips. `DoesNotExist` is a sentinel reported by status
/// queries for lobbies absent from the registry, never stored on a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    /// Players may join; the owner has not started the game.
    Waiting,
    /// The game is running.
    #[serde(rename = "playing")]
    InPlay,
    /// The game is over; new admissions are rejected.
    Finished,
    /// Status-query sentinel for unknown lobbies.
    #[serde(rename = "dne")]
    DoesNotExist,
}

/// Lobby contract errors. Recoverable; callers decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// An operation was attempted from a state that does not allow it.
    #[error("cannot {action} while game is {from:?}")]
    InvalidStateTransition {
        /// State the lobby was in.
        from: GameState,
        /// What was attempted.
        action: &'static str,
    },
}

/// A registered participant. Created on first login, lives as long as the
/// lobby.
#[derive(Debug, Clone)]
pub struct User {
    /// Bcrypt digest of the login password.
    pub password_hash: String,
    /// Index into the lobby's problem sequence. Monotonically non-decreasing
    /// and bounded by the sequence length.
    pub problem_index: usize,
    /// Score so far. Monotonically non-decreasing.
    pub score: u32,
}

impl User {
    /// New user at the start of the sequence.
    pub fn new(password_hash: String) -> Self {
        Self {
            password_hash,
            problem_index: 0,
            score: 0,
        }
    }
}

/// Mutable lobby state, guarded by the lobby's lock.
pub struct LobbyState {
    /// Current lifecycle state.
    pub game_state: GameState,
    /// Set exactly once, at game start.
    pub start_time: Option<DateTime<Utc>>,
    /// Set exactly once, to the first successfully authenticated username.
    pub owner: Option<String>,
    /// Username → user record.
    pub users: HashMap<String, User>,
    /// Live connections keyed by join sequence, so iteration follows join
    /// order.
    pub clients: BTreeMap<u64, Arc<Client>>,
}

impl LobbyState {
    fn new() -> Self {
        Self {
            game_state: GameState::Waiting,
            start_time: None,
            owner: None,
            users: HashMap::new(),
            clients: BTreeMap::new(),
        }
    }

    /// Move `Waiting → InPlay`, stamping the start time.
    pub fn start_game(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>, LobbyError> {
        if self.game_state != GameState::Waiting {
            return Err(LobbyError::InvalidStateTransition {
                from: self.game_state,
                action: "start the game",
            });
        }
        self.game_state = GameState::InPlay;
        self.start_time = Some(now);
        Ok(now)
    }

    /// Move `InPlay → Finished`.
    pub fn end_game(&mut self) -> Result<(), LobbyError> {
        if self.game_state != GameState::InPlay {
            return Err(LobbyError::InvalidStateTransition {
                from: self.game_state,
                action: "end the game",
            });
        }
        self.game_state = GameState::Finished;
        Ok(())
    }

    /// Outbound event carrying `username`'s current problem, or the game-over
    /// signal once the sequence is exhausted. `None` for unknown users.
    pub fn problem_event(&self, username: &str, problems: &ProblemSet) -> Option<Event> {
        let user = self.users.get(username)?;
        Some(match problems.get(user.problem_index) {
            Some(problem) => Event::new_problem(problem),
            None => Event::game_over(user.score),
        })
    }
}

/// One game session: immutable identity plus locked mutable state.
pub struct Lobby {
    id: String,
    name: String,
    time_limit_secs: u32,
    problems: ProblemSet,
    tokens: Arc<TokenStore>,
    next_seq: AtomicU64,
    sweeper: JoinHandle<()>,
    /// All mutable fields live here, behind the lobby's single lock.
    pub(crate) state: RwLock<LobbyState>,
}

impl Lobby {
    /// Create a lobby in `Waiting` and start its token sweeper.
    ///
    /// Must run inside a tokio runtime (the sweeper is spawned here).
    pub fn new(
        id: String,
        name: String,
        time_limit_secs: u32,
        problems: ProblemSet,
        token_ttl: Duration,
        sweep_interval: Duration,
    ) -> Arc<Self> {
        let tokens = Arc::new(TokenStore::new(token_ttl));
        let sweeper = TokenStore::spawn_sweeper(tokens.clone(), sweep_interval);
        Arc::new(Self {
            id,
            name,
            time_limit_secs,
            problems,
            tokens,
            next_seq: AtomicU64::new(0),
            sweeper,
            state: RwLock::new(LobbyState::new()),
        })
    }

    /// Unique lobby identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Game duration in seconds.
    pub fn time_limit_secs(&self) -> u32 {
        self.time_limit_secs
    }

    /// The lobby's fixed problem sequence.
    pub fn problems(&self) -> &ProblemSet {
        &self.problems
    }

    /// The lobby's admission token store.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Next join-sequence number for a new client.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn game_state(&self) -> GameState {
        self.state.read().game_state
    }

    /// Lobby owner, if one has authenticated yet.
    pub fn owner(&self) -> Option<String> {
        self.state.read().owner.clone()
    }

    /// Game start time, once started.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().start_time
    }

    /// Number of live connections.
    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Register a live connection.
    pub fn add_client(&self, client: Arc<Client>) {
        self.state.write().clients.insert(client.seq(), client);
    }

    /// Deregister a connection and close its transport. Returns whether the
    /// client was present.
    pub fn remove_client(&self, seq: u64) -> bool {
        let removed = self.state.write().clients.remove(&seq);
        match removed {
            Some(client) => {
                client.disconnect();
                true
            }
            None => false,
        }
    }

    /// Send an event to every current client.
    ///
    /// The client set is snapshotted under the lock and delivery happens
    /// after it is released, so one slow consumer cannot block registry
    /// mutation or the other clients.
    pub fn broadcast(&self, event: &Event) {
        let targets: Vec<Arc<Client>> = self.state.read().clients.values().cloned().collect();
        for client in targets {
            client.send(event.clone());
        }
    }

    /// Current-problem event for `username` (see [`LobbyState::problem_event`]).
    pub fn current_problem_event(&self, username: &str) -> Option<Event> {
        self.state.read().problem_event(username, &self.problems)
    }

    /// Stop background work owned by this lobby.
    pub fn shutdown(&self) {
        self.sweeper.abort();
    }
}

impl Drop for Lobby {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol;
    use tokio::sync::mpsc;

    fn test_lobby() -> Arc<Lobby> {
        Lobby::new(
            "lobby-1".into(),
            "Trivia".into(),
            600,
            ProblemSet::default_set(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
    }

    fn test_client(lobby: &Arc<Lobby>, name: &str) -> (Arc<Client>, mpsc::Receiver<Event>) {
        Client::new(name.to_string(), "token".into(), lobby.clone(), 8)
    }

    #[tokio::test]
    async fn test_state_machine_happy_path() {
        let lobby = test_lobby();
        assert_eq!(lobby.game_state(), GameState::Waiting);

        lobby.state.write().start_game(Utc::now()).unwrap();
        assert_eq!(lobby.game_state(), GameState::InPlay);
        assert!(lobby.start_time().is_some());

        lobby.state.write().end_game().unwrap();
        assert_eq!(lobby.game_state(), GameState::Finished);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let lobby = test_lobby();
        lobby.state.write().start_game(Utc::now()).unwrap();
        let first_start = lobby.start_time();

        let err = lobby.state.write().start_game(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LobbyError::InvalidStateTransition {
                from: GameState::InPlay,
                ..
            }
        ));
        // Start time was set exactly once.
        assert_eq!(lobby.start_time(), first_start);
    }

    #[tokio::test]
    async fn test_end_before_start_fails() {
        let lobby = test_lobby();
        let err = lobby.state.write().end_game().unwrap_err();
        assert!(matches!(
            err,
            LobbyError::InvalidStateTransition {
                from: GameState::Waiting,
                ..
            }
        ));
        assert_eq!(lobby.game_state(), GameState::Waiting);
    }

    #[tokio::test]
    async fn test_add_remove_client() {
        let lobby = test_lobby();
        let (alice, _rx_a) = test_client(&lobby, "alice");
        let (bob, _rx_b) = test_client(&lobby, "bob");

        lobby.add_client(alice.clone());
        lobby.add_client(bob.clone());
        assert_eq!(lobby.client_count(), 2);

        assert!(lobby.remove_client(alice.seq()));
        assert_eq!(lobby.client_count(), 1);
        assert!(alice.is_disconnected());
        assert!(!bob.is_disconnected());

        // Removing twice is a no-op.
        assert!(!lobby.remove_client(alice.seq()));
    }

    #[tokio::test]
    async fn test_concurrent_add_remove_balance() {
        let lobby = test_lobby();
        let mut tasks = Vec::new();

        for t in 0..16 {
            let lobby = lobby.clone();
            tasks.push(tokio::spawn(async move {
                let mut receivers = Vec::new();
                let mut kept = 0usize;
                for i in 0..25 {
                    let (client, rx) =
                        Client::new(format!("u{t}-{i}"), "tok".into(), lobby.clone(), 4);
                    receivers.push(rx);
                    lobby.add_client(client.clone());
                    // Remove every other client again.
                    if i % 2 == 0 {
                        assert!(lobby.remove_client(client.seq()));
                    } else {
                        kept += 1;
                    }
                }
                kept
            }));
        }

        let mut expected = 0;
        for task in tasks {
            expected += task.await.unwrap();
        }
        assert_eq!(lobby.client_count(), expected);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let lobby = test_lobby();
        let (_alice, mut rx_a) = {
            let (c, rx) = test_client(&lobby, "alice");
            lobby.add_client(c.clone());
            (c, rx)
        };
        let (_bob, mut rx_b) = {
            let (c, rx) = test_client(&lobby, "bob");
            lobby.add_client(c.clone());
            (c, rx)
        };

        lobby.broadcast(&Event::new_member("carol"));

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.try_recv().unwrap();
            assert_eq!(event.kind, protocol::EVENT_NEW_MEMBER);
            assert_eq!(event.payload["name"], "carol");
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_block_others() {
        let lobby = test_lobby();

        // Slow client with a single-slot queue, pre-filled.
        let (slow, _rx_slow) = Client::new("slow".into(), "tok".into(), lobby.clone(), 1);
        lobby.add_client(slow.clone());
        slow.send(Event::new_member("filler"));

        let (fast_a, mut rx_a) = test_client(&lobby, "fast-a");
        let (fast_b, mut rx_b) = test_client(&lobby, "fast-b");
        lobby.add_client(fast_a.clone());
        lobby.add_client(fast_b.clone());

        lobby.broadcast(&Event::new_member("carol"));

        // The other clients still got the broadcast.
        assert_eq!(rx_a.try_recv().unwrap().payload["name"], "carol");
        assert_eq!(rx_b.try_recv().unwrap().payload["name"], "carol");

        // The overflowing client was disconnected, not waited on.
        assert!(slow.is_disconnected());
        assert!(!fast_a.is_disconnected());
    }

    #[tokio::test]
    async fn test_problem_event_progression() {
        let lobby = test_lobby();
        lobby
            .state
            .write()
            .users
            .insert("alice".into(), User::new("digest".into()));

        let event = lobby.current_problem_event("alice").unwrap();
        assert_eq!(event.kind, protocol::EVENT_NEW_PROBLEM);
        assert_eq!(
            event.payload["title"],
            lobby.problems().get(0).unwrap().title
        );

        // Exhaust the sequence: the event becomes game-over with the score.
        {
            let mut state = lobby.state.write();
            let user = state.users.get_mut("alice").unwrap();
            user.problem_index = lobby.problems().len();
            user.score = 4;
        }
        let event = lobby.current_problem_event("alice").unwrap();
        assert_eq!(event.kind, protocol::EVENT_GAME_OVER);
        assert_eq!(event.payload["score"], 4);

        assert!(lobby.current_problem_event("nobody").is_none());
    }
}
