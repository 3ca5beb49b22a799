use crate::handlers::{create_room, get_room, health_check, ready_check, room_socket, share_room};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Assembles the REST and realtime routes over the shared state.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/:id", get(get_room))
        .route("/rooms/:id/share", post(share_room));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .nest("/api", api)
        .route("/ws/room/:id", get(room_socket))
        .with_state(state)
}
