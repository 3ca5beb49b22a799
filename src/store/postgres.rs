use crate::models::{Operation, Room, Snapshot, StoreError};
use crate::store::RoomStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

/// Store implementation backed by Postgres using the rooms/snapshots/ops
/// schema. Appends lock the room row so the sequence check and the insert
/// serialize per room.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects a pool and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("database connection pool created successfully");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                room_id TEXT NOT NULL,
                seq BIGINT NOT NULL,
                body BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (room_id, seq)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ops (
                room_id TEXT NOT NULL,
                seq BIGINT NOT NULL,
                body BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (room_id, seq)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn room_exists<'e, E>(executor: E, room_id: &str) -> Result<bool, StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let row = sqlx::query("SELECT 1 FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(executor)
            .await?;
        Ok(row.is_some())
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, StoreError> {
    let body: Vec<u8> = row.get("body");
    let state: Box<RawValue> = serde_json::from_slice(&body)?;
    Ok(Snapshot {
        room_id: row.get("room_id"),
        seq: row.get("seq"),
        state,
        created_at: row.get("created_at"),
    })
}

fn operation_from_row(row: &PgRow) -> Result<Operation, StoreError> {
    let body: Vec<u8> = row.get("body");
    let ops: Vec<Box<RawValue>> = serde_json::from_slice(&body)?;
    Ok(Operation {
        room_id: row.get("room_id"),
        seq: row.get("seq"),
        ops,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl RoomStore for PostgresStore {
    async fn create_room(&self, mut room: Room) -> Result<Room, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query("INSERT INTO rooms (id, created_at) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(&room.id)
            .bind(room.created_at)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::RoomExists);
        }

        if let Some(snapshot) = &room.snapshot {
            sqlx::query(
                "INSERT INTO snapshots (room_id, seq, body, created_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (room_id, seq) DO NOTHING",
            )
            .bind(&snapshot.room_id)
            .bind(snapshot.seq)
            .bind(snapshot.state.get().as_bytes())
            .bind(snapshot.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        room.updated_at = room.created_at;
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError> {
        let room_row = sqlx::query("SELECT id, created_at FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RoomNotFound)?;

        let created_at: DateTime<Utc> = room_row.get("created_at");

        let max_op =
            sqlx::query("SELECT MAX(seq) AS seq, MAX(created_at) AS updated_at FROM ops WHERE room_id = $1")
                .bind(room_id)
                .fetch_one(&self.pool)
                .await?;
        let max_op_seq: Option<i64> = max_op.get("seq");
        let max_op_at: Option<DateTime<Utc>> = max_op.get("updated_at");

        let snapshot_row = sqlx::query(
            "SELECT room_id, seq, body, created_at FROM snapshots
             WHERE room_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        let snapshot = snapshot_row
            .as_ref()
            .map(snapshot_from_row)
            .transpose()?;

        let mut current_seq = max_op_seq.unwrap_or(0);
        if let Some(snapshot) = &snapshot {
            if snapshot.seq > current_seq {
                current_seq = snapshot.seq;
            }
        }

        let mut updated_at = created_at;
        if let Some(at) = max_op_at {
            if at > updated_at {
                updated_at = at;
            }
        }
        if let Some(snapshot) = &snapshot {
            if snapshot.created_at > updated_at {
                updated_at = snapshot.created_at;
            }
        }

        Ok(Room {
            id: room_row.get("id"),
            created_at,
            updated_at,
            current_seq,
            snapshot,
        })
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if !Self::room_exists(&mut *tx, &snapshot.room_id).await? {
            return Err(StoreError::RoomNotFound);
        }

        sqlx::query(
            "INSERT INTO snapshots (room_id, seq, body, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (room_id, seq)
             DO UPDATE SET body = EXCLUDED.body, created_at = EXCLUDED.created_at",
        )
        .bind(&snapshot.room_id)
        .bind(snapshot.seq)
        .bind(snapshot.state.get().as_bytes())
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_snapshot(&self, room_id: &str) -> Result<Snapshot, StoreError> {
        if !Self::room_exists(&self.pool, room_id).await? {
            return Err(StoreError::RoomNotFound);
        }

        let row = sqlx::query(
            "SELECT room_id, seq, body, created_at FROM snapshots
             WHERE room_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::SnapshotNotFound)?;

        snapshot_from_row(&row)
    }

    async fn append_operation(&self, mut op: Operation) -> Result<Operation, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Locking the room row serializes concurrent appends for one room.
        let room_row = sqlx::query("SELECT id FROM rooms WHERE id = $1 FOR UPDATE")
            .bind(&op.room_id)
            .fetch_optional(&mut *tx)
            .await?;
        if room_row.is_none() {
            return Err(StoreError::RoomNotFound);
        }

        let last_seq: i64 =
            sqlx::query("SELECT COALESCE(MAX(seq), 0) AS seq FROM ops WHERE room_id = $1")
                .bind(&op.room_id)
                .fetch_one(&mut *tx)
                .await?
                .get("seq");
        if op.seq != last_seq + 1 {
            return Err(StoreError::SequenceConflict);
        }

        let body = serde_json::to_vec(&op.ops)?;
        op.created_at = Utc::now();

        sqlx::query("INSERT INTO ops (room_id, seq, body, created_at) VALUES ($1, $2, $3, $4)")
            .bind(&op.room_id)
            .bind(op.seq)
            .bind(body)
            .bind(op.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(op)
    }

    async fn operations_since(
        &self,
        room_id: &str,
        since_seq: i64,
        limit: i64,
    ) -> Result<Vec<Operation>, StoreError> {
        if !Self::room_exists(&self.pool, room_id).await? {
            return Err(StoreError::RoomNotFound);
        }

        let rows = if limit > 0 {
            sqlx::query(
                "SELECT room_id, seq, body, created_at FROM ops
                 WHERE room_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3",
            )
            .bind(room_id)
            .bind(since_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT room_id, seq, body, created_at FROM ops
                 WHERE room_id = $1 AND seq > $2 ORDER BY seq ASC",
            )
            .bind(room_id)
            .bind(since_seq)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(operation_from_row).collect()
    }
}
