//! Authoritative room server for Slipstream.
//!
//! Clients connect to `/ws`, join a room by id and stream input frames; each
//! room runs one tick loop that owns its simulation and broadcasts snapshots
//! and race events.

pub mod config;
pub mod game_loop;
pub mod health;
pub mod room_manager;
pub mod simulation;
pub mod state;
pub mod ws;

use axum::Router;
use axum::routing::get;

use config::ServerConfig;
use state::AppState;

/// Build the axum router. Returns the router and shared state.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);
    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .with_state(state.clone());
    (app, state)
}
