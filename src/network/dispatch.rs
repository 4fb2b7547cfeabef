//! Event Dispatch
//!
//! Maps inbound event tags to handlers. Handlers are synchronous: they take
//! the lobby lock, mutate, and queue outbound events without awaiting, so a
//! handler can never hold a lock across a suspension point. Errors bubble
//! back to the connection loop, which reports them on the same connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::network::client::Client;
use crate::network::protocol::{
    Event, GiveAnswerPayload, EVENT_GIVE_ANSWER, EVENT_REQUEST_PROBLEM, EVENT_START_GAME_OWNER,
};
use crate::session::lobby::{GameState, LobbyError};
use crate::session::manager::Manager;

/// Handler failures. All are per-message: the connection survives them.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler registered for the event tag.
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// The event is restricted to the lobby owner.
    #[error("only the lobby owner may do this")]
    NotOwner,

    /// The lobby refused the operation in its current state.
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// The payload did not match the event's schema.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The sending connection has no user record in its lobby.
    #[error("unknown user: {0}")]
    UnknownUser(String),
}

/// One inbound event tag's handler.
pub trait EventHandler: Send + Sync {
    /// Handle `event` sent by `client`.
    fn handle(&self, event: &Event, client: &Arc<Client>) -> Result<(), DispatchError>;
}

/// Tag → handler table for inbound events.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Box<dyn EventHandler>>,
}

impl Dispatcher {
    /// Build the table with every supported event registered.
    pub fn new(manager: Arc<Manager>) -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn EventHandler>> = HashMap::new();
        handlers.insert(
            EVENT_START_GAME_OWNER,
            Box::new(StartGameHandler { manager }),
        );
        handlers.insert(EVENT_GIVE_ANSWER, Box::new(GiveAnswerHandler));
        handlers.insert(EVENT_REQUEST_PROBLEM, Box::new(RequestProblemHandler));
        Self { handlers }
    }

    /// Route an event to its handler.
    pub fn dispatch(&self, event: &Event, client: &Arc<Client>) -> Result<(), DispatchError> {
        debug!(
            client = %client.name(),
            lobby = %client.lobby().id(),
            event = %event.kind,
            "dispatching event"
        );
        match self.handlers.get(event.kind.as_str()) {
            Some(handler) => handler.handle(event, client),
            None => Err(DispatchError::UnsupportedEvent(event.kind.clone())),
        }
    }
}

/// `start-game-owner`: the owner moves the lobby into play.
///
/// Broadcasts the start to everyone, hands each connection its first problem,
/// and arms the game timer.
struct StartGameHandler {
    manager: Arc<Manager>,
}

impl EventHandler for StartGameHandler {
    fn handle(&self, _event: &Event, client: &Arc<Client>) -> Result<(), DispatchError> {
        let lobby = client.lobby().clone();

        let (start_time, clients) = {
            let mut state = lobby.state.write();
            if state.owner.as_deref() != Some(client.name()) {
                return Err(DispatchError::NotOwner);
            }
            let start_time = state.start_game(Utc::now())?;
            let clients: Vec<Arc<Client>> = state.clients.values().cloned().collect();
            (start_time, clients)
        };

        info!(lobby = %lobby.id(), owner = %client.name(), "game started");
        lobby.broadcast(&Event::start_game(start_time, lobby.time_limit_secs()));
        for member in clients {
            if let Some(event) = lobby.current_problem_event(member.name()) {
                member.send(event);
            }
        }
        self.manager.spawn_game_timer(lobby);
        Ok(())
    }
}

/// `give-answer`: score the submission and advance to the next problem.
struct GiveAnswerHandler;

impl EventHandler for GiveAnswerHandler {
    fn handle(&self, event: &Event, client: &Arc<Client>) -> Result<(), DispatchError> {
        let payload: GiveAnswerPayload = event.payload_as()?;
        let lobby = client.lobby();
        let problems = lobby.problems();

        let reply = {
            let mut state = lobby.state.write();
            if state.game_state != GameState::InPlay {
                return Err(LobbyError::InvalidStateTransition {
                    from: state.game_state,
                    action: "answer a problem",
                }
                .into());
            }
            let user = state
                .users
                .get_mut(client.name())
                .ok_or_else(|| DispatchError::UnknownUser(client.name().to_string()))?;

            // Past the end of the sequence the reply just restates game-over.
            if problems.get(user.problem_index).is_some() {
                if problems.check_answer(user.problem_index, &payload.answer) {
                    user.score += 1;
                }
                user.problem_index += 1;
            }
            state.problem_event(client.name(), problems)
        };

        if let Some(event) = reply {
            client.send(event);
        }
        Ok(())
    }
}

/// `request-problem`: restate the sender's current problem, no mutation.
struct RequestProblemHandler;

impl EventHandler for RequestProblemHandler {
    fn handle(&self, _event: &Event, client: &Arc<Client>) -> Result<(), DispatchError> {
        let event = client
            .lobby()
            .current_problem_event(client.name())
            .ok_or_else(|| DispatchError::UnknownUser(client.name().to_string()))?;
        client.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol;
    use crate::session::lobby::{Lobby, User};
    use crate::session::manager::ManagerConfig;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn temp_manager() -> Arc<Manager> {
        Arc::new(Manager::new(ManagerConfig {
            results_dir: std::env::temp_dir().join(format!("trivia-dispatch-{}", Uuid::new_v4())),
            ..Default::default()
        }))
    }

    /// A lobby with `names` registered as users and connected as clients.
    /// The first name is the owner.
    fn seeded_lobby(
        manager: &Arc<Manager>,
        names: &[&str],
    ) -> (Arc<Lobby>, Vec<(Arc<Client>, mpsc::Receiver<Event>)>) {
        let id = manager.create_lobby("Trivia");
        let lobby = manager.lobby(&id).unwrap();
        let mut connections = Vec::new();
        {
            let mut state = lobby.state.write();
            state.owner = Some(names[0].to_string());
            for name in names {
                state.users.insert(name.to_string(), User::new("digest".into()));
            }
        }
        for name in names {
            let (client, rx) = Client::new(name.to_string(), "tok".into(), lobby.clone(), 16);
            lobby.add_client(client.clone());
            connections.push((client, rx));
        }
        (lobby, connections)
    }

    fn give_answer(answer: &str) -> Event {
        Event::new(EVENT_GIVE_ANSWER, json!({ "answer": answer }))
    }

    #[tokio::test]
    async fn test_unsupported_event_rejected() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (_lobby, mut conns) = seeded_lobby(&manager, &["alice"]);
        let (client, _rx) = conns.remove(0);

        let err = dispatcher
            .dispatch(&Event::new("bogus", Value::Null), &client)
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedEvent(tag) if tag == "bogus"));
    }

    #[tokio::test]
    async fn test_start_game_requires_owner() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (lobby, mut conns) = seeded_lobby(&manager, &["alice", "bob"]);
        let (bob, _rx_bob) = conns.remove(1);

        let err = dispatcher
            .dispatch(&Event::new(EVENT_START_GAME_OWNER, Value::Null), &bob)
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotOwner));
        assert_eq!(lobby.game_state(), GameState::Waiting);
    }

    #[tokio::test]
    async fn test_start_game_broadcasts_and_deals_problems() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (lobby, mut conns) = seeded_lobby(&manager, &["alice", "bob"]);
        let (alice, mut rx_alice) = conns.remove(0);
        let (_bob, mut rx_bob) = conns.remove(0);

        dispatcher
            .dispatch(&Event::new(EVENT_START_GAME_OWNER, Value::Null), &alice)
            .unwrap();
        assert_eq!(lobby.game_state(), GameState::InPlay);

        for rx in [&mut rx_alice, &mut rx_bob] {
            let start = rx.try_recv().unwrap();
            assert_eq!(start.kind, protocol::EVENT_START_GAME);
            assert_eq!(start.payload["timeLimitSeconds"], lobby.time_limit_secs());

            let problem = rx.try_recv().unwrap();
            assert_eq!(problem.kind, protocol::EVENT_NEW_PROBLEM);
        }

        // Starting twice is refused.
        let err = dispatcher
            .dispatch(&Event::new(EVENT_START_GAME_OWNER, Value::Null), &alice)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Lobby(_)));
    }

    #[tokio::test]
    async fn test_give_answer_advances_and_finishes() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (lobby, mut conns) = seeded_lobby(&manager, &["alice"]);
        let (alice, mut rx) = conns.remove(0);

        dispatcher
            .dispatch(&Event::new(EVENT_START_GAME_OWNER, Value::Null), &alice)
            .unwrap();
        rx.try_recv().unwrap(); // start-game
        rx.try_recv().unwrap(); // first problem

        let total = lobby.problems().len();
        for i in 0..total {
            dispatcher.dispatch(&give_answer("42"), &alice).unwrap();
            let reply = rx.try_recv().unwrap();
            if i + 1 < total {
                assert_eq!(reply.kind, protocol::EVENT_NEW_PROBLEM);
                assert_eq!(
                    reply.payload["title"],
                    lobby.problems().get(i + 1).unwrap().title
                );
            } else {
                assert_eq!(reply.kind, protocol::EVENT_GAME_OVER);
                assert_eq!(reply.payload["score"], total as u32);
            }
        }

        // Answers past the end just restate game-over without scoring.
        dispatcher.dispatch(&give_answer("42"), &alice).unwrap();
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.kind, protocol::EVENT_GAME_OVER);
        assert_eq!(reply.payload["score"], total as u32);
    }

    #[tokio::test]
    async fn test_give_answer_before_start_rejected() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (_lobby, mut conns) = seeded_lobby(&manager, &["alice"]);
        let (alice, _rx) = conns.remove(0);

        let err = dispatcher.dispatch(&give_answer("42"), &alice).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Lobby(LobbyError::InvalidStateTransition {
                from: GameState::Waiting,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_give_answer_malformed_payload() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (_lobby, mut conns) = seeded_lobby(&manager, &["alice"]);
        let (alice, _rx) = conns.remove(0);

        let err = dispatcher
            .dispatch(&Event::new(EVENT_GIVE_ANSWER, json!({ "answer": 7 })), &alice)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Payload(_)));
    }

    #[tokio::test]
    async fn test_request_problem_restates_without_advancing() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (lobby, mut conns) = seeded_lobby(&manager, &["alice"]);
        let (alice, mut rx) = conns.remove(0);

        dispatcher
            .dispatch(&Event::new(EVENT_START_GAME_OWNER, Value::Null), &alice)
            .unwrap();
        rx.try_recv().unwrap();
        let first = rx.try_recv().unwrap();

        for _ in 0..2 {
            dispatcher
                .dispatch(&Event::new(EVENT_REQUEST_PROBLEM, Value::Null), &alice)
                .unwrap();
            let again = rx.try_recv().unwrap();
            assert_eq!(again.kind, protocol::EVENT_NEW_PROBLEM);
            assert_eq!(again.payload["title"], first.payload["title"]);
        }
        assert_eq!(
            lobby.state.read().users.get("alice").unwrap().problem_index,
            0
        );
    }

    #[tokio::test]
    async fn test_unregistered_sender_rejected() {
        let manager = temp_manager();
        let dispatcher = Dispatcher::new(manager.clone());
        let (lobby, _conns) = seeded_lobby(&manager, &["alice"]);

        // A connection whose username has no user record.
        let (ghost, _rx) = Client::new("ghost".into(), "tok".into(), lobby.clone(), 8);
        let err = dispatcher
            .dispatch(&Event::new(EVENT_REQUEST_PROBLEM, Value::Null), &ghost)
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownUser(name) if name == "ghost"));
    }
}
