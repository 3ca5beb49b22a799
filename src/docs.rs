use crate::models::*;
use utoipa::OpenApi;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Create a room and mint its capability tokens
#[utoipa::path(
    post,
    path = "/api/rooms",
    tag = "rooms",
    responses(
        (status = 201, description = "Room created", body = CreateRoomResponse),
        (status = 500, description = "Room could not be created", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn create_room_doc() {}

/// Fetch room metadata and the latest snapshot
#[utoipa::path(
    get,
    path = "/api/rooms/{id}",
    tag = "rooms",
    responses(
        (status = 200, description = "Room metadata retrieved", body = RoomResponse),
        (status = 404, description = "Room not found", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Room ID")
    )
)]
#[allow(dead_code)]
pub async fn get_room_doc() {}

/// Mint a share token for a room
#[utoipa::path(
    post,
    path = "/api/rooms/{id}/share",
    tag = "rooms",
    request_body = ShareRequest,
    responses(
        (status = 200, description = "Token minted", body = ShareResponse),
        (status = 400, description = "Invalid role or payload", body = ErrorResponse),
        (status = 404, description = "Room not found", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Room ID")
    )
)]
#[allow(dead_code)]
pub async fn share_room_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        create_room_doc,
        get_room_doc,
        share_room_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            CreateRoomResponse,
            ShareLinks,
            ShareExpiries,
            RoomResponse,
            RoomSnapshotView,
            ShareRequest,
            ShareResponse
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room management and sharing endpoints")
    )
)]
pub struct ApiDoc;
