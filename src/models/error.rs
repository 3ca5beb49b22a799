use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Failure modes surfaced by a room store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room already exists")]
    RoomExists,
    #[error("snapshot not found")]
    SnapshotNotFound,
    /// A non-contiguous sequence number was provided for an append.
    #[error("sequence conflict")]
    SequenceConflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}