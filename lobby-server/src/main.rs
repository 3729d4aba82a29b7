mod config;
mod directory;
mod gateway;
mod registry;
mod room;
mod storage;

use crate::config::Config;
use crate::directory::DirectoryEntryUpdate;
use crate::registry::RoomRegistry;
use crate::storage::FileStorage;
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    registry: Arc<RoomRegistry>,
    config: Arc<Config>,
}

#[tokio::main]
/// Sets up structured logging, the directory/registry actors, and the
/// routing for the lobby/relay server. Listens on the configured address.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
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

    let config = Arc::new(Config::from_env());
    let storage = Arc::new(FileStorage::new("./lobby-data"));
    let directory = directory::spawn(storage);
    let registry = Arc::new(RoomRegistry::new(directory, config.clone()));

    let state = AppState { registry, config: config.clone() };

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/websocket", get(websocket_handler))
        .route("/upsert", post(upsert_handler))
        .route("/remove", post(remove_handler))
        .route("/list.bin", get(list_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .unwrap_or_else(|err| panic!("Failed to bind {}: {}", config.listen_addr, err));

    tracing::info!(addr = %config.listen_addr, "Lobby server listening.");
    axum::serve(listener, app).await.unwrap();
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| gateway::handle_socket(socket, state.registry, state.config))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryUpsertRequest {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    game_type: u32,
    #[serde(default)]
    slots_used: u32,
    #[serde(default)]
    slots_total: u32,
}

#[derive(Deserialize)]
struct DirectoryRemoveRequest {
    #[serde(default)]
    name: String,
}

/// Administrative hook to publish a room in the directory without going
/// through the lobby handshake (used by trusted backends, not clients).
async fn upsert_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<DirectoryUpsertRequest>,
) -> impl IntoResponse {
    if body.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "bad");
    }
    state
        .registry
        .directory_upsert(DirectoryEntryUpdate {
            name: body.name,
            game_type: body.game_type,
            slots_used: body.slots_used,
            slots_total: body.slots_total,
        })
        .await;
    (StatusCode::OK, "ok")
}

async fn remove_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<DirectoryRemoveRequest>,
) -> impl IntoResponse {
    if body.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "bad");
    }
    state.registry.directory_remove(body.name).await;
    (StatusCode::OK, "ok")
}

/// Returns the current game list, pre-encoded as a `GameListResponse` frame.
async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    let frame = state.registry.directory_snapshot().await;
    (
        [
            (axum::http::header::CONTENT_TYPE, "application/octet-stream"),
            (axum::http::header::CACHE_CONTROL, "no-store"),
        ],
        frame.to_vec(),
    )
}
