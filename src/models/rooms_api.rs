use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use utoipa::ToSchema;

/// Response for creating a room
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub view_token: String,
    pub edit_token: String,
    pub links: ShareLinks,
    pub expires: ShareExpiries,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ShareLinks {
    pub view: String,
    pub edit: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ShareExpiries {
    pub view: DateTime<Utc>,
    pub edit: DateTime<Utc>,
}

/// Room metadata with its latest snapshot
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_seq: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<RoomSnapshotView>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RoomSnapshotView {
    pub seq: i64,
    #[schema(value_type = Object)]
    pub state: Box<RawValue>,
}

/// Request to mint a capability token for an existing room
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub role: String,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
}

/// Response carrying a freshly minted capability token
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ShareResponse {
    pub token: String,
    pub role: String,
    pub expiry: DateTime<Utc>,
    pub link: String,
}
