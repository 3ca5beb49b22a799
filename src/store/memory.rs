use crate::models::{Operation, Room, Snapshot, StoreError};
use crate::store::RoomStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store implementation backed by process memory.
///
/// The room map lock serializes appends, which is what makes the sequence
/// check atomic here.
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, RoomRecord>>,
}

struct RoomRecord {
    room: Room,
    snapshot: Option<Snapshot>,
    ops: Vec<Operation>,
}

impl RoomRecord {
    fn to_room(&self) -> Room {
        let mut room = self.room.clone();
        room.snapshot = self.snapshot.clone();
        room
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create_room(&self, mut room: Room) -> Result<Room, StoreError> {
        let mut rooms = self.rooms.write().await;

        if rooms.contains_key(&room.id) {
            return Err(StoreError::RoomExists);
        }

        let snapshot = room.snapshot.take();
        let record = RoomRecord {
            room,
            snapshot,
            ops: Vec::new(),
        };
        let stored = record.to_room();
        rooms.insert(stored.id.clone(), record);
        Ok(stored)
    }

    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError> {
        let rooms = self.rooms.read().await;
        let record = rooms.get(room_id).ok_or(StoreError::RoomNotFound)?;
        Ok(record.to_room())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(&snapshot.room_id)
            .ok_or(StoreError::RoomNotFound)?;

        record.room.updated_at = snapshot.created_at;
        if snapshot.seq > record.room.current_seq {
            record.room.current_seq = snapshot.seq;
        }
        record.snapshot = Some(snapshot);
        Ok(())
    }

    async fn latest_snapshot(&self, room_id: &str) -> Result<Snapshot, StoreError> {
        let rooms = self.rooms.read().await;
        let record = rooms.get(room_id).ok_or(StoreError::RoomNotFound)?;
        record.snapshot.clone().ok_or(StoreError::SnapshotNotFound)
    }

    async fn append_operation(&self, mut op: Operation) -> Result<Operation, StoreError> {
        let mut rooms = self.rooms.write().await;
        let record = rooms.get_mut(&op.room_id).ok_or(StoreError::RoomNotFound)?;

        let expected_seq = record.room.current_seq + 1;
        if op.seq != expected_seq {
            return Err(StoreError::SequenceConflict);
        }

        op.created_at = Utc::now();
        record.room.current_seq = op.seq;
        record.room.updated_at = op.created_at;
        record.ops.push(op.clone());

        Ok(op)
    }

    async fn operations_since(
        &self,
        room_id: &str,
        since_seq: i64,
        limit: i64,
    ) -> Result<Vec<Operation>, StoreError> {
        let rooms = self.rooms.read().await;
        let record = rooms.get(room_id).ok_or(StoreError::RoomNotFound)?;

        let start = record.ops.partition_point(|op| op.seq <= since_seq);
        let mut ops = Vec::new();
        for op in &record.ops[start..] {
            if limit > 0 && ops.len() as i64 >= limit {
                break;
            }
            ops.push(op.clone());
        }

        Ok(ops)
    }
}
