//! # Trivia Lobby Server
//!
//! Multi-user timed trivia sessions over persistent WebSocket connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TRIVIA LOBBY SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  auth.rs         - Password hashing and verification         │
//! │                                                              │
//! │  game/           - Game content                              │
//! │  ├── problem.rs  - Problem sequence played in a lobby        │
//! │  └── results.rs  - Post-game result records on disk          │
//! │                                                              │
//! │  session/        - Session state                             │
//! │  ├── token.rs    - Single-use admission tokens (TTL swept)   │
//! │  ├── lobby.rs    - Lobby state machine, users, connections   │
//! │  └── manager.rs  - Lobby registry, login, admission          │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── protocol.rs - JSON event envelope                       │
//! │  ├── client.rs   - Per-connection pump pair                  │
//! │  ├── dispatch.rs - Inbound event routing                     │
//! │  ├── server.rs   - WebSocket accept loop, admission at       │
//! │  │                 upgrade time (401/410 before the socket)  │
//! │  └── api.rs      - JSON API: create, login, status           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow
//!
//! A client creates or learns of a lobby via the HTTP API, logs in to get a
//! single-use admission token, then opens the WebSocket with the lobby id
//! and token in the query string. Everything after the upgrade is JSON
//! events: the owner starts the game, each client answers its own problem
//! sequence, and a server-side timer ends the game, persists the scores, and
//! retires the lobby.
//!
//! Handlers are synchronous and never await while holding a lock; slow
//! consumers are disconnected rather than waited on.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod game;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use game::problem::{Problem, ProblemSet};
pub use network::protocol::Event;
pub use network::server::{ServerConfig, WsServer};
pub use session::lobby::{GameState, Lobby};
pub use session::manager::{Manager, ManagerConfig};

use std::time::Duration;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default game duration in seconds
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 600;

/// How long an unredeemed admission token stays valid
pub const TOKEN_TTL: Duration = Duration::from_secs(5);

/// How often each lobby sweeps expired admission tokens
pub const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
