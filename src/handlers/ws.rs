use crate::state::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::debug;

/// Upgrades the connection and hands the socket to the hub.
///
/// The room id in the path is advisory; the hello frame carries the
/// authoritative room id, which the capability token must match.
pub async fn room_socket(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("websocket upgrade requested for room {}", room_id);

    ws.max_message_size(state.cfg.ws_read_limit)
        .write_buffer_size(state.cfg.ws_write_buffer)
        .on_upgrade(move |socket| state.hub.clone().handle_connection(socket))
}
