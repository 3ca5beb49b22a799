use crate::auth::{
    clamp_ttl, default_ttl, generate_capability_token, CapabilityClaims, CapabilityRole,
};
use crate::models::{
    CreateRoomResponse, ErrorResponse, Room, RoomResponse, RoomSnapshotView, ShareExpiries,
    ShareLinks, ShareRequest, ShareResponse, Snapshot, StoreError, EMPTY_ROOM_STATE,
};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::value::RawValue;
use tracing::error;

// Unreserved URI characters stay readable in share links.
const URL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Create a room with an empty initial snapshot and both capability tokens
pub async fn create_room(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), (StatusCode, Json<ErrorResponse>)> {
    let now = Utc::now();
    let room_id = state.ids.next_id();

    let initial_state = RawValue::from_string(EMPTY_ROOM_STATE.to_string()).map_err(|e| {
        error!("build initial room state: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create room")
    })?;

    let room = Room {
        id: room_id.clone(),
        created_at: now,
        updated_at: now,
        current_seq: 0,
        snapshot: Some(Snapshot {
            room_id: room_id.clone(),
            seq: 0,
            state: initial_state,
            created_at: now,
        }),
    };

    if let Err(e) = state.store.create_room(room).await {
        error!("create room: {}", e);
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to create room",
        ));
    }

    let (view_token, view_expiry) =
        new_capability(&state, &room_id, CapabilityRole::View, now, default_ttl()).map_err(|e| {
            error!("create view token: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create tokens")
        })?;
    let (edit_token, edit_expiry) =
        new_capability(&state, &room_id, CapabilityRole::Edit, now, default_ttl()).map_err(|e| {
            error!("create edit token: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create tokens")
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            id: room_id.clone(),
            created_at: now,
            links: ShareLinks {
                view: share_url(&room_id, &view_token),
                edit: share_url(&room_id, &edit_token),
            },
            expires: ShareExpiries {
                view: view_expiry,
                edit: edit_expiry,
            },
            view_token,
            edit_token,
        }),
    ))
}

/// Fetch room metadata with its latest snapshot
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<(StatusCode, Json<RoomResponse>), (StatusCode, Json<ErrorResponse>)> {
    let room = match state.store.get_room(&room_id).await {
        Ok(room) => room,
        Err(StoreError::RoomNotFound) => {
            return Err(error_response(StatusCode::NOT_FOUND, "room not found"));
        }
        Err(e) => {
            error!("get room {}: {}", room_id, e);
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load room",
            ));
        }
    };

    Ok((
        StatusCode::OK,
        Json(RoomResponse {
            id: room.id,
            created_at: room.created_at,
            updated_at: room.updated_at,
            current_seq: room.current_seq,
            snapshot: room.snapshot.map(|snapshot| RoomSnapshotView {
                seq: snapshot.seq,
                state: snapshot.state,
            }),
        }),
    ))
}

/// Mint a capability token for an existing room
///
/// The room lookup runs before the body is parsed, so a request against a
/// missing room is a 404 regardless of its payload.
pub async fn share_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ShareResponse>), (StatusCode, Json<ErrorResponse>)> {
    match state.store.get_room(&room_id).await {
        Ok(_) => {}
        Err(StoreError::RoomNotFound) => {
            return Err(error_response(StatusCode::NOT_FOUND, "room not found"));
        }
        Err(e) => {
            error!("lookup room {} before share: {}", room_id, e);
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load room",
            ));
        }
    }

    let request: ShareRequest = serde_json::from_slice(&body)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid payload"))?;

    let role = CapabilityRole::parse(&request.role)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "invalid role"))?;

    let ttl = clamp_ttl(Duration::minutes(request.ttl_minutes.unwrap_or(0)));
    let now = Utc::now();
    let (token, expiry) = new_capability(&state, &room_id, role, now, ttl).map_err(|e| {
        error!("generate share token: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create token")
    })?;

    Ok((
        StatusCode::OK,
        Json(ShareResponse {
            link: share_url(&room_id, &token),
            token,
            role: role.as_str().to_string(),
            expiry,
        }),
    ))
}

fn new_capability(
    state: &AppState,
    room_id: &str,
    role: CapabilityRole,
    issued_at: DateTime<Utc>,
    ttl: Duration,
) -> Result<(String, DateTime<Utc>), crate::auth::CapabilityError> {
    let ttl = clamp_ttl(ttl);
    let claims = CapabilityClaims {
        room_id: room_id.to_string(),
        role,
        issued_at,
        expires_at: issued_at + ttl,
    };
    let token = generate_capability_token(state.cfg.jwt_secret.as_bytes(), &claims)?;
    Ok((token, claims.expires_at))
}

fn share_url(room_id: &str, token: &str) -> String {
    format!(
        "/room/{}?token={}",
        utf8_percent_encode(room_id, URL_ESCAPE),
        utf8_percent_encode(token, URL_ESCAPE)
    )
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: message.to_string(),
        }),
    )
}
