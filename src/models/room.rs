use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Metadata about a collaborative room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Largest persisted operation sequence; 0 if none.
    pub current_seq: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

/// The full state of a room materialized at a particular sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub room_id: String,
    pub seq: i64,
    /// Opaque state document. The engine never parses it.
    pub state: Box<RawValue>,
    pub created_at: DateTime<Utc>,
}

/// A committed batch of ordered op payloads occupying one sequence slot.
///
/// Cloning deep-copies the op payloads, so stores hand out copies rather
/// than aliases of the ingested batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub room_id: String,
    pub seq: i64,
    pub ops: Vec<Box<RawValue>>,
    pub created_at: DateTime<Utc>,
}

/// The empty document every freshly created room starts from.
pub const EMPTY_ROOM_STATE: &str = r#"{"nodes":[],"layers":[],"meta":{}}"#;
