//! Network layer: wire protocol, client connections, event dispatch, and the
//! two server surfaces (WebSocket transport plus the JSON API).

pub mod api;
pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use dispatch::{DispatchError, Dispatcher, EventHandler};
pub use protocol::Event;
pub use server::{ServerConfig, WsServer, WsServerError};
