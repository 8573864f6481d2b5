use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use slipstream_core::net::protocol::PROTOCOL_VERSION;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub protocol_version: u8,
    pub connections: usize,
    pub rooms: RoomInfo,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub active: usize,
    pub players: usize,
}

/// Returns server status, connection count and room info as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.ws_connection_count.load(Ordering::Relaxed);
    let (active, players) = {
        let rooms = state.rooms.read().await;
        (rooms.room_count(), rooms.player_count())
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: PROTOCOL_VERSION,
        connections,
        rooms: RoomInfo { active, players },
    })
}
