//! Trivia Lobby Server
//!
//! Binary entry point: starts the JSON API and the WebSocket transport on
//! their configured addresses and runs until either fails or Ctrl-C.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trivia_lobby::network::api;
use trivia_lobby::{ServerConfig, WsServer, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!("Trivia Lobby Server v{}", VERSION);
    info!(api = %config.api_addr, ws = %config.ws_addr, "starting");

    let server = WsServer::new(config.clone());
    let api_shutdown = server.subscribe_shutdown();

    let mut api_task = tokio::spawn(api::serve(
        config.api_addr,
        server.manager().clone(),
        api_shutdown,
    ));
    let mut ws_task = tokio::spawn(server.clone().run());

    tokio::select! {
        result = &mut ws_task => {
            error!("websocket server exited");
            result??;
        }
        result = &mut api_task => {
            error!("api server exited");
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            server.shutdown();
            let _ = ws_task.await;
            let _ = api_task.await;
        }
    }

    Ok(())
}
