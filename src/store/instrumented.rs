use crate::models::{Operation, Room, Snapshot, StoreError};
use crate::store::RoomStore;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

/// Decorator that reports per-call durations and failures for any store.
///
/// This is the engine's telemetry hook point; the subscriber decides where
/// the events go.
pub struct InstrumentedStore<S> {
    inner: S,
}

impl<S: RoomStore> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    fn record<T>(operation: &str, start: Instant, result: &Result<T, StoreError>) {
        let elapsed_ms = start.elapsed().as_millis();
        match result {
            Ok(_) => debug!("store {} completed in {}ms", operation, elapsed_ms),
            Err(e) => warn!("store {} failed after {}ms: {}", operation, elapsed_ms, e),
        }
    }
}

#[async_trait]
impl<S: RoomStore> RoomStore for InstrumentedStore<S> {
    async fn create_room(&self, room: Room) -> Result<Room, StoreError> {
        let start = Instant::now();
        let result = self.inner.create_room(room).await;
        Self::record("CreateRoom", start, &result);
        result
    }

    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError> {
        let start = Instant::now();
        let result = self.inner.get_room(room_id).await;
        Self::record("GetRoom", start, &result);
        result
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = self.inner.save_snapshot(snapshot).await;
        Self::record("SaveSnapshot", start, &result);
        result
    }

    async fn latest_snapshot(&self, room_id: &str) -> Result<Snapshot, StoreError> {
        let start = Instant::now();
        let result = self.inner.latest_snapshot(room_id).await;
        Self::record("LatestSnapshot", start, &result);
        result
    }

    async fn append_operation(&self, op: Operation) -> Result<Operation, StoreError> {
        let start = Instant::now();
        let result = self.inner.append_operation(op).await;
        Self::record("AppendOperation", start, &result);
        result
    }

    async fn operations_since(
        &self,
        room_id: &str,
        since_seq: i64,
        limit: i64,
    ) -> Result<Vec<Operation>, StoreError> {
        let start = Instant::now();
        let result = self.inner.operations_since(room_id, since_seq, limit).await;
        Self::record("OperationsSince", start, &result);
        result
    }
}
