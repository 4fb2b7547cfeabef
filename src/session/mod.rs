//! Session layer: admission tokens, per-lobby state, and the registry that
//! ties lobby ids to live lobbies.

pub mod lobby;
pub mod manager;
pub mod token;

pub use lobby::{GameState, Lobby, LobbyError, LobbyState, User};
pub use manager::{Admission, AdmissionError, LoginError, Manager, ManagerConfig};
pub use token::TokenStore;
