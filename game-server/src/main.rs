mod bug_reports;
mod connection;
mod engine_task;
mod registry;
mod router;

use crate::engine_task::{Engine, EngineMessage};
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use engine::config::GameConfig;
use engine::persistence;
use engine::state::GameState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// What the HTTP handlers need: a line to the engine and the effective
/// config, frozen at startup.
struct ServerHandle {
    engine: mpsc::Sender<EngineMessage>,
    config_json: String,
    next_client: AtomicU64,
}

#[tokio::main]
/// Activates tracing, loads config and the saved game (refusing corrupt
/// state), spawns the engine task and serves the web socket plus the
/// read-only admin pages. The server listens on port 8080.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug,engine=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "starweb.json".into());
    let config = match GameConfig::load_or_default(Path::new(&config_path)).await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration rejected.");
            panic!("Configuration rejected: {e}");
        }
    };

    let data_dir = PathBuf::from("data");
    let state = match persistence::load_snapshot(&data_dir).await {
        Ok(Some(mut state)) => {
            // Nobody is live right after a restart.
            for player in state.players.values_mut() {
                player.connected = false;
            }
            tracing::info!(turn = state.turn, players = state.players.len(), "Resuming saved game.");
            state
        }
        Ok(None) => {
            tracing::info!(map_size = config.game.map_size, "Generating a fresh galaxy.");
            GameState::generate(&config)
        }
        Err(e) => {
            tracing::error!(error = %e, "Saved game refused to load.");
            panic!("Saved game is corrupt ({e}); restore a backup before starting.");
        }
    };

    let (engine_tx, engine_rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
    let engine = Engine::new(state, config.clone(), data_dir);
    let engine_task = tokio::spawn(engine.run(engine_rx));

    let handle = Arc::new(ServerHandle {
        engine: engine_tx.clone(),
        config_json: serde_json::to_string_pretty(&config).expect("config serializes"),
        next_client: AtomicU64::new(1),
    });

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/status", get(status_handler))
        .route("/config", get(config_handler))
        .with_state(handle)
        .fallback_service(
            ServeDir::new("static").not_found_service(ServeFile::new("static/index.html")),
        );

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
    tracing::info!("Listening on 0.0.0.0:8080");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Last save before the lights go out.
    let (done_tx, done_rx) = oneshot::channel();
    if engine_tx
        .send(EngineMessage::Shutdown { done: done_tx })
        .await
        .is_ok()
    {
        let _ = done_rx.await;
    }
    engine_task.abort();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown requested.");
}

/// Upgrades to a web socket and hands the connection to its own tasks.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(handle): State<Arc<ServerHandle>>,
) -> impl IntoResponse {
    let client = handle.next_client.fetch_add(1, Ordering::Relaxed);
    let engine = handle.engine.clone();
    ws.on_upgrade(move |socket| connection::run(socket, client, engine))
}

/// One text page with turn, clock and the player roster.
async fn status_handler(State(handle): State<Arc<ServerHandle>>) -> String {
    let (reply_tx, reply_rx) = oneshot::channel();
    if handle
        .engine
        .send(EngineMessage::Status { reply: reply_tx })
        .await
        .is_err()
    {
        return "Engine is not running.".into();
    }
    reply_rx.await.unwrap_or_else(|_| "Engine is not running.".into())
}

/// The effective configuration as the engine sees it.
async fn config_handler(State(handle): State<Arc<ServerHandle>>) -> String {
    handle.config_json.clone()
}
