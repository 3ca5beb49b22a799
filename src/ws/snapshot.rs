use crate::models::{Operation, Snapshot, StoreError};
use crate::store::RoomStore;
use chrono::Utc;
use serde_json::value::RawValue;
use std::sync::Arc;

/// Collapses a prior state document and the operations committed after it
/// into a new state document.
///
/// The engine does not know how operations fold into state; embedders supply
/// this and the engine persists whatever it returns. Without a folder no
/// compaction ever runs.
pub type StateFolder = Arc<
    dyn Fn(Option<&RawValue>, &[Operation]) -> serde_json::Result<Box<RawValue>> + Send + Sync,
>;

/// Writes a snapshot anchored at the newest committed operation.
///
/// Returns the sequence the snapshot was written at, or `None` when there is
/// nothing newer than the latest snapshot.
pub(crate) async fn compact_room(
    store: &Arc<dyn RoomStore>,
    folder: &StateFolder,
    room_id: &str,
) -> Result<Option<i64>, StoreError> {
    let room = store.get_room(room_id).await?;

    let base_seq = room.snapshot.as_ref().map(|s| s.seq).unwrap_or(0);
    let ops = store.operations_since(room_id, base_seq, 0).await?;
    let Some(last) = ops.last() else {
        return Ok(None);
    };
    let seq = last.seq;

    let base_state = room.snapshot.as_ref().map(|s| s.state.as_ref());
    let state = folder(base_state, &ops)?;

    store
        .save_snapshot(Snapshot {
            room_id: room_id.to_string(),
            seq,
            state,
            created_at: Utc::now(),
        })
        .await?;

    Ok(Some(seq))
}
