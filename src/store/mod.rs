pub mod instrumented;
pub mod memory;
pub mod postgres;

use crate::config::Config;
use crate::models::{Operation, Room, Snapshot, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use instrumented::InstrumentedStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Persistence operations required by the room engine.
///
/// All methods are safe to call concurrently. `append_operation` must make
/// the sequence check and the append atomic with respect to other appends
/// for the same room.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persists a new room. Fails with `RoomExists` on id collision.
    async fn create_room(&self, room: Room) -> Result<Room, StoreError>;

    /// Fetches a room with its latest snapshot and derived `current_seq`.
    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError>;

    /// Upserts a snapshot keyed by `(room_id, seq)`.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// Returns the snapshot with the greatest `seq` for the room.
    async fn latest_snapshot(&self, room_id: &str) -> Result<Snapshot, StoreError>;

    /// Commits an operation, assigning `created_at` at commit time. Fails
    /// with `SequenceConflict` unless `op.seq == current_seq + 1`.
    async fn append_operation(&self, op: Operation) -> Result<Operation, StoreError>;

    /// Returns ops with `seq > since_seq` in ascending order. A limit of 0
    /// or below means unbounded.
    async fn operations_since(
        &self,
        room_id: &str,
        since_seq: i64,
        limit: i64,
    ) -> Result<Vec<Operation>, StoreError>;
}

/// Returns the configured store implementation wrapped with telemetry.
pub async fn connect(cfg: &Config) -> Result<Arc<dyn RoomStore>, StoreError> {
    if cfg.db_enable {
        let store = PostgresStore::connect(&cfg.db_dsn).await?;
        info!("store initialized with driver 'postgres'");
        Ok(Arc::new(InstrumentedStore::new(store)))
    } else {
        info!("store initialized with driver 'memory'");
        Ok(Arc::new(InstrumentedStore::new(MemoryStore::new())))
    }
}
