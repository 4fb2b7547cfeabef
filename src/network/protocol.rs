//! Wire Protocol
//!
//! Every frame on the WebSocket is a JSON envelope `{type, payload}`. The
//! payload schema is decided by the type tag; the envelope keeps it as a raw
//! value so the dispatch table can key on the tag string and report an
//! unsupported type as a per-message error rather than a decode failure.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::game::problem::Problem;

// Inbound event tags.

/// Owner requests the game start.
pub const EVENT_START_GAME_OWNER: &str = "start-game-owner";
/// A client submits an answer to its current problem.
pub const EVENT_GIVE_ANSWER: &str = "give-answer";
/// A client asks for its current problem again (resync).
pub const EVENT_REQUEST_PROBLEM: &str = "request-problem";

// Outbound event tags.

/// A member joined the lobby (also used for member-list catch-up).
pub const EVENT_NEW_MEMBER: &str = "new-member";
/// The game started.
pub const EVENT_START_GAME: &str = "start-game";
/// A problem for the receiving client.
pub const EVENT_NEW_PROBLEM: &str = "new-problem";
/// The receiving client's game is over.
pub const EVENT_GAME_OVER: &str = "game-over";
/// A message-level error; the connection stays open.
pub const EVENT_ERROR: &str = "error";

/// The wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event tag deciding the payload schema.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload; omitted on the wire when there is none.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// Payload of [`EVENT_GIVE_ANSWER`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveAnswerPayload {
    /// The submitted answer text.
    pub answer: String,
}

impl Event {
    /// Build an event from a tag and raw payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// `new-member {name}`.
    pub fn new_member(name: &str) -> Self {
        Self::new(EVENT_NEW_MEMBER, json!({ "name": name }))
    }

    /// `start-game {startTime, timeLimitSeconds}`.
    pub fn start_game(start_time: DateTime<Utc>, time_limit_seconds: u32) -> Self {
        Self::new(
            EVENT_START_GAME,
            json!({
                "startTime": start_time,
                "timeLimitSeconds": time_limit_seconds,
            }),
        )
    }

    /// `new-problem {title, description, markup}`.
    pub fn new_problem(problem: &Problem) -> Self {
        Self::new(
            EVENT_NEW_PROBLEM,
            json!({
                "title": problem.title,
                "description": problem.description,
                "markup": problem.markup,
            }),
        )
    }

    /// `game-over {score}`.
    pub fn game_over(score: u32) -> Self {
        Self::new(EVENT_GAME_OVER, json!({ "score": score }))
    }

    /// `error {message}`.
    pub fn error(message: &str) -> Self {
        Self::new(EVENT_ERROR, json!({ "message": message }))
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_field_names() {
        let event = Event::new_member("alice");
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""type":"new-member""#));
        assert!(json.contains(r#""payload""#));
        assert!(json.contains(r#""name":"alice""#));
    }

    #[test]
    fn test_payloadless_event_omits_payload() {
        let event = Event::new(EVENT_REQUEST_PROBLEM, Value::Null);
        let json = event.to_json().unwrap();
        assert_eq!(json, r#"{"type":"request-problem"}"#);

        // And parses back with a null payload.
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(parsed.kind, EVENT_REQUEST_PROBLEM);
        assert!(parsed.payload.is_null());
    }

    #[test]
    fn test_unknown_tag_still_decodes() {
        // Unknown tags are a dispatch-level concern, not a decode error.
        let parsed = Event::from_json(r#"{"type":"bogus","payload":{"x":1}}"#).unwrap();
        assert_eq!(parsed.kind, "bogus");
        assert_eq!(parsed.payload["x"], 1);
    }

    #[test]
    fn test_give_answer_payload_roundtrip() {
        let parsed =
            Event::from_json(r#"{"type":"give-answer","payload":{"answer":"42"}}"#).unwrap();
        assert_eq!(parsed.kind, EVENT_GIVE_ANSWER);
        let payload: GiveAnswerPayload = parsed.payload_as().unwrap();
        assert_eq!(payload.answer, "42");
    }

    #[test]
    fn test_malformed_payload_reports_error() {
        let parsed =
            Event::from_json(r#"{"type":"give-answer","payload":{"answer":7}}"#).unwrap();
        assert!(parsed.payload_as::<GiveAnswerPayload>().is_err());
    }

    #[test]
    fn test_start_game_payload_keys() {
        let start = Utc::now();
        let event = Event::start_game(start, 600);
        assert_eq!(event.payload["timeLimitSeconds"], 600);
        // RFC 3339 timestamp string.
        assert!(event.payload["startTime"].is_string());
    }

    #[test]
    fn test_new_problem_payload_keys() {
        let problem = Problem::new("Roots", "Find the positive root.", r"x^2 - 9 = 0");
        let event = Event::new_problem(&problem);
        assert_eq!(event.kind, EVENT_NEW_PROBLEM);
        assert_eq!(event.payload["title"], "Roots");
        assert_eq!(event.payload["markup"], r"x^2 - 9 = 0");
    }
}
