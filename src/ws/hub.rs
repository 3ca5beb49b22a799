use crate::auth::{parse_capability_token, CapabilityRole};
use crate::config::Config;
use crate::models::{Operation, Room, StoreError};
use crate::store::RoomStore;
use crate::ws::protocol::{
    decode_client_frame, encode_delta, encode_error, encode_pong, encode_snapshot, ClientFrame,
    ErrorCode, HelloFrame, OpFrame, PingFrame,
};
use crate::ws::session::{write_loop, Session, PONG_WAIT};
use crate::ws::snapshot::{compact_room, StateFolder};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Orchestrates room fan-out and persistence.
///
/// The hub owns the process-wide room registry; its lifetime is bound to the
/// engine instance so independent hubs never share state.
pub struct Hub {
    cfg: Config,
    store: Arc<dyn RoomStore>,
    folder: Option<StateFolder>,
    rooms: RwLock<HashMap<String, Arc<RoomState>>>,
    next_session_id: AtomicU64,
}

/// Live state for one room: the set of connected sessions and the
/// commits-since-snapshot counter.
pub(crate) struct RoomState {
    id: String,
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    ops_since_snapshot: AtomicU64,
}

impl RoomState {
    fn new(id: String) -> Self {
        Self {
            id,
            sessions: RwLock::new(HashMap::new()),
            ops_since_snapshot: AtomicU64::new(0),
        }
    }

    /// Enqueues an encoded payload on every member session. Holds only the
    /// member lock, shared, and performs no I/O.
    pub(crate) fn broadcast(&self, payload: &str) {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for session in sessions.values() {
            if let Err(e) = session.enqueue(payload.to_string()) {
                debug!("drop message for room {}: {}", self.id, e);
            }
        }
    }

    fn remove_session(&self, session: &Session) {
        let remaining = {
            let mut sessions = self
                .sessions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sessions.remove(&session.id);
            sessions.len()
        };
        session.close();
        info!("client left room {} ({} remaining)", self.id, remaining);
    }
}

impl Hub {
    pub fn new(cfg: Config, store: Arc<dyn RoomStore>, folder: Option<StateFolder>) -> Self {
        Self {
            cfg,
            store,
            folder,
            rooms: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    fn get_or_create_room(&self, room_id: &str) -> Arc<RoomState> {
        let mut rooms = self
            .rooms
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(RoomState::new(room_id.to_string())))
            .clone()
    }

    /// Drops a room's live state if no sessions remain. The registry lock is
    /// taken before the member lock, never the other way around.
    pub fn remove_room(&self, room_id: &str) {
        let mut rooms = self
            .rooms
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let empty = rooms.get(room_id).is_some_and(|state| {
            state
                .sessions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .is_empty()
        });
        if empty {
            rooms.remove(room_id);
        }
    }

    /// Performs the hello handshake and runs the session loops until the
    /// socket goes away.
    pub async fn handle_connection(self: Arc<Self>, mut socket: WebSocket) {
        let hello = match timeout(PONG_WAIT, socket.recv()).await {
            Err(_) => {
                debug!("handshake read deadline expired");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!("failed to read hello: {}", e);
                return;
            }
            Ok(Some(Ok(Message::Text(text)))) => match decode_client_frame(&text) {
                Ok(ClientFrame::Hello(hello)) => hello,
                _ => {
                    reject(socket, ErrorCode::Invalid, "expected hello message").await;
                    return;
                }
            },
            Ok(Some(Ok(_))) => {
                reject(socket, ErrorCode::Invalid, "expected hello message").await;
                return;
            }
        };

        let (room, role, since) = match self.process_hello(&hello).await {
            Ok(accepted) => accepted,
            Err((code, msg)) => {
                reject(socket, code, msg).await;
                return;
            }
        };

        let session = Arc::new(Session::new(
            self.next_session_id(),
            room.id.clone(),
            role,
            since,
        ));

        let state = match self.join_room(session.clone(), &room).await {
            Ok(state) => state,
            Err(e) => {
                warn!("catch-up for room {} failed: {}", room.id, e);
                reject(socket, ErrorCode::ServerError, "failed to load room history").await;
                return;
            }
        };

        let (sink, mut stream) = socket.split();
        {
            let session = session.clone();
            tokio::spawn(async move { write_loop(&session, sink).await });
        }

        self.read_loop(&session, &mut stream).await;

        // Closing the session shuts the queue, which ends the writer task.
        state.remove_session(&session);
    }

    /// Validates a hello frame against the capability token and the store.
    ///
    /// A missing room is reported as `unauthorized`, not `not found`, so an
    /// unauthenticated caller cannot probe for room existence.
    pub(crate) async fn process_hello(
        &self,
        hello: &HelloFrame,
    ) -> Result<(Room, CapabilityRole, i64), (ErrorCode, &'static str)> {
        if hello.room_id.is_empty() {
            return Err((ErrorCode::Invalid, "roomId required"));
        }
        if hello.token.is_empty() {
            return Err((ErrorCode::Invalid, "token required"));
        }
        let role = CapabilityRole::parse(&hello.role)
            .ok_or((ErrorCode::Invalid, "invalid capability role"))?;

        let claims =
            parse_capability_token(self.cfg.jwt_secret.as_bytes(), &hello.token, Utc::now())
                .map_err(|_| (ErrorCode::Unauthorized, "invalid capability token"))?;
        if claims.room_id != hello.room_id {
            return Err((ErrorCode::Unauthorized, "token does not match room"));
        }
        if claims.role != role {
            return Err((ErrorCode::Unauthorized, "capability role mismatch"));
        }

        let room = match self.store.get_room(&hello.room_id).await {
            Ok(room) => room,
            Err(StoreError::RoomNotFound) => {
                return Err((ErrorCode::Unauthorized, "room not found"));
            }
            Err(e) => {
                error!("load room {}: {}", hello.room_id, e);
                return Err((ErrorCode::ServerError, "failed to load room"));
            }
        };

        let since = hello.since.max(0);
        if since > room.current_seq {
            return Err((ErrorCode::Conflict, "since ahead of server"));
        }

        Ok((room, role, since))
    }

    /// Registers the session and enqueues its catch-up stream.
    ///
    /// The snapshot and replay ops are fetched first; insertion and the
    /// catch-up enqueue then happen inside one member-lock critical section,
    /// so a racing commit's broadcast always lands after them.
    pub(crate) async fn join_room(
        &self,
        session: Arc<Session>,
        room: &Room,
    ) -> Result<Arc<RoomState>, StoreError> {
        let replay = if room.current_seq > session.since {
            self.store
                .operations_since(&room.id, session.since, 0)
                .await?
        } else {
            Vec::new()
        };

        let snapshot_frame = match &room.snapshot {
            Some(snapshot) => match encode_snapshot(&room.id, snapshot) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    error!("encode snapshot for room {}: {}", room.id, e);
                    None
                }
            },
            None => None,
        };
        let mut delta_frames = Vec::with_capacity(replay.len());
        for op in &replay {
            delta_frames.push(encode_delta(op)?);
        }

        let state = self.get_or_create_room(&room.id);
        {
            let mut sessions = state
                .sessions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sessions.insert(session.id, session.clone());

            if let Some(frame) = snapshot_frame {
                if let Err(e) = session.enqueue(frame) {
                    debug!("queue snapshot for room {}: {}", room.id, e);
                }
            }
            for frame in delta_frames {
                if let Err(e) = session.enqueue(frame) {
                    debug!("queue catch-up delta for room {}: {}", room.id, e);
                }
            }

            info!(
                "client joined room {} ({} total)",
                room.id,
                sessions.len()
            );
        }

        Ok(state)
    }

    async fn read_loop(self: &Arc<Self>, session: &Arc<Session>, stream: &mut SplitStream<WebSocket>) {
        let mut stop = session.stop_signal();

        loop {
            let message = tokio::select! {
                _ = stop.changed() => return,
                read = timeout(PONG_WAIT, stream.next()) => match read {
                    Err(_) => {
                        debug!("read deadline expired for room {}", session.room_id);
                        return;
                    }
                    Ok(None) => return,
                    Ok(Some(Err(e))) => {
                        debug!("socket read for room {}: {}", session.room_id, e);
                        return;
                    }
                    Ok(Some(Ok(message))) => message,
                },
            };

            match message {
                Message::Text(text) => match decode_client_frame(&text) {
                    Ok(ClientFrame::Op(frame)) => self.handle_op(session, frame).await,
                    Ok(ClientFrame::Ping(frame)) => handle_ping(session, &frame),
                    Ok(ClientFrame::Hello(_)) => {
                        debug!("unexpected hello after handshake");
                    }
                    Err(e) => {
                        debug!("decode client frame: {}", e);
                        let _ = session.enqueue(encode_error(ErrorCode::Invalid, "invalid payload"));
                    }
                },
                Message::Close(_) => return,
                // Pongs and other control traffic refresh the read deadline
                // simply by arriving; non-text payloads are rejected silently.
                _ => {}
            }
        }
    }

    /// The commit path: validate, append, fan out to every member.
    pub(crate) async fn handle_op(self: &Arc<Self>, session: &Arc<Session>, frame: OpFrame) {
        if session.role != CapabilityRole::Edit {
            warn!("discarding op from viewer in room {}", session.room_id);
            let _ = session.enqueue(encode_error(
                ErrorCode::Unauthorized,
                "edit capability required",
            ));
            return;
        }

        if frame.room_id != session.room_id {
            warn!(
                "operation room mismatch: got {}, session is in {}",
                frame.room_id, session.room_id
            );
            let _ = session.enqueue(encode_error(ErrorCode::Invalid, "room mismatch"));
            return;
        }

        if frame.ops.is_empty() {
            return;
        }

        let op = Operation {
            room_id: session.room_id.clone(),
            seq: frame.seq,
            ops: frame.ops,
            created_at: Utc::now(),
        };

        let committed = match self.store.append_operation(op).await {
            Ok(committed) => committed,
            Err(StoreError::SequenceConflict) => {
                let _ = session.enqueue(encode_error(ErrorCode::Conflict, "sequence conflict"));
                return;
            }
            Err(e) => {
                error!("append operation for room {}: {}", session.room_id, e);
                let _ = session.enqueue(encode_error(ErrorCode::ServerError, "operation failed"));
                return;
            }
        };

        let payload = match encode_delta(&committed) {
            Ok(payload) => payload,
            Err(e) => {
                error!("encode delta for room {}: {}", session.room_id, e);
                return;
            }
        };

        let state = self.get_or_create_room(&session.room_id);
        state.broadcast(&payload);
        self.note_commit(&state);
    }

    /// Bumps the room's commit counter and kicks off compaction when the
    /// op-count trigger fires. No-op without a configured folder.
    fn note_commit(self: &Arc<Self>, state: &Arc<RoomState>) {
        if self.folder.is_none() {
            return;
        }

        let committed = state.ops_since_snapshot.fetch_add(1, Ordering::AcqRel) + 1;
        if committed >= self.cfg.persist_every_n_ops {
            state.ops_since_snapshot.store(0, Ordering::Release);
            let hub = self.clone();
            let room_id = state.id.clone();
            tokio::spawn(async move { hub.compact(&room_id).await });
        }
    }

    async fn compact(&self, room_id: &str) {
        let Some(folder) = &self.folder else { return };
        match compact_room(&self.store, folder, room_id).await {
            Ok(Some(seq)) => info!("snapshot saved for room {} at seq {}", room_id, seq),
            Ok(None) => {}
            Err(e) => error!("snapshot compaction for room {}: {}", room_id, e),
        }
    }

    /// Periodic compaction pass over rooms with uncompacted commits. Runs
    /// for the process lifetime; does nothing without a configured folder.
    pub async fn run_snapshot_loop(self: Arc<Self>) {
        if self.folder.is_none() {
            return;
        }

        let mut ticker = tokio::time::interval(self.cfg.snapshot_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let pending: Vec<String> = {
                let rooms = self
                    .rooms
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                rooms
                    .values()
                    .filter(|state| state.ops_since_snapshot.load(Ordering::Acquire) > 0)
                    .map(|state| state.id.clone())
                    .collect()
            };

            for room_id in pending {
                if let Some(state) = self.room_state(&room_id) {
                    state.ops_since_snapshot.store(0, Ordering::Release);
                }
                self.compact(&room_id).await;
            }
        }
    }

    fn room_state(&self, room_id: &str) -> Option<Arc<RoomState>> {
        let rooms = self
            .rooms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        rooms.get(room_id).cloned()
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn handle_ping(session: &Session, frame: &PingFrame) {
    match encode_pong(frame.ts) {
        Ok(payload) => {
            if let Err(e) = session.enqueue(payload) {
                debug!("queue pong: {}", e);
            }
        }
        Err(e) => warn!("encode pong: {}", e),
    }
}

/// Reports a handshake failure: an error frame followed by a policy
/// violation close.
async fn reject(mut socket: WebSocket, code: ErrorCode, msg: &str) {
    if let Err(e) = socket.send(Message::Text(encode_error(code, msg))).await {
        debug!("write handshake error: {}", e);
    }
    let close = Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: msg.to_string().into(),
    }));
    if let Err(e) = socket.send(close).await {
        debug!("write close frame: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_capability_token, CapabilityClaims};
    use crate::models::{Snapshot, EMPTY_ROOM_STATE};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::value::RawValue;

    const SECRET: &str = "test-secret-at-least-16-bytes";

    fn test_config() -> Config {
        Config {
            app_host: "127.0.0.1".to_string(),
            app_port: 0,
            app_env: "development".to_string(),
            jwt_secret: SECRET.to_string(),
            app_allowed_origins: None,
            api_rate_rps: 5.0,
            api_rate_burst: 10,
            db_enable: false,
            db_dsn: String::new(),
            ws_write_buffer: 262_144,
            ws_read_limit: 1_048_576,
            snapshot_interval_sec: 20,
            persist_every_n_ops: 50,
        }
    }

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).expect("valid json")
    }

    fn new_hub() -> Arc<Hub> {
        Arc::new(Hub::new(
            test_config(),
            Arc::new(MemoryStore::new()),
            None,
        ))
    }

    async fn create_room(hub: &Hub, room_id: &str) -> Room {
        let now = Utc::now();
        hub.store
            .create_room(Room {
                id: room_id.to_string(),
                created_at: now,
                updated_at: now,
                current_seq: 0,
                snapshot: Some(Snapshot {
                    room_id: room_id.to_string(),
                    seq: 0,
                    state: raw(EMPTY_ROOM_STATE),
                    created_at: now,
                }),
            })
            .await
            .unwrap()
    }

    fn token_for(room_id: &str, role: CapabilityRole) -> String {
        let now = Utc::now();
        generate_capability_token(
            SECRET.as_bytes(),
            &CapabilityClaims {
                room_id: room_id.to_string(),
                role,
                issued_at: now,
                expires_at: now + Duration::hours(1),
            },
        )
        .unwrap()
    }

    fn hello(room_id: &str, role: &str, since: i64, token: String) -> HelloFrame {
        HelloFrame {
            room_id: room_id.to_string(),
            role: role.to_string(),
            since,
            token,
        }
    }

    fn edit_session(hub: &Hub, room_id: &str, since: i64) -> Arc<Session> {
        Arc::new(Session::new(
            hub.next_session_id(),
            room_id.to_string(),
            CapabilityRole::Edit,
            since,
        ))
    }

    async fn join(hub: &Arc<Hub>, session: &Arc<Session>) -> Arc<RoomState> {
        let room = hub.store.get_room(&session.room_id).await.unwrap();
        hub.join_room(session.clone(), &room).await.unwrap()
    }

    fn op_frame(room_id: &str, seq: i64, payload: &str) -> OpFrame {
        OpFrame {
            room_id: room_id.to_string(),
            seq,
            ops: vec![raw(payload)],
        }
    }

    #[tokio::test]
    async fn hello_accepts_a_matching_token() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let frame = hello("room-1", "edit", 0, token_for("room-1", CapabilityRole::Edit));
        let (room, role, since) = hub.process_hello(&frame).await.unwrap();
        assert_eq!(room.id, "room-1");
        assert_eq!(role, CapabilityRole::Edit);
        assert_eq!(since, 0);
    }

    #[tokio::test]
    async fn hello_rejects_tampered_tokens() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let mut token = token_for("room-1", CapabilityRole::Edit);
        let flipped = if token.ends_with('a') { 'b' } else { 'a' };
        token.pop();
        token.push(flipped);

        let frame = hello("room-1", "edit", 0, token);
        let (code, _) = hub.process_hello(&frame).await.unwrap_err();
        assert_eq!(code, ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn hello_rejects_token_for_another_room() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;
        create_room(&hub, "room-2").await;

        let frame = hello("room-1", "edit", 0, token_for("room-2", CapabilityRole::Edit));
        let (code, msg) = hub.process_hello(&frame).await.unwrap_err();
        assert_eq!(code, ErrorCode::Unauthorized);
        assert_eq!(msg, "token does not match room");
    }

    #[tokio::test]
    async fn hello_rejects_role_mismatch() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let frame = hello("room-1", "edit", 0, token_for("room-1", CapabilityRole::View));
        let (code, msg) = hub.process_hello(&frame).await.unwrap_err();
        assert_eq!(code, ErrorCode::Unauthorized);
        assert_eq!(msg, "capability role mismatch");
    }

    #[tokio::test]
    async fn hello_hides_missing_rooms_behind_unauthorized() {
        let hub = new_hub();
        let frame = hello("ghost", "edit", 0, token_for("ghost", CapabilityRole::Edit));
        let (code, msg) = hub.process_hello(&frame).await.unwrap_err();
        assert_eq!(code, ErrorCode::Unauthorized);
        assert_eq!(msg, "room not found");
    }

    #[tokio::test]
    async fn hello_normalizes_negative_since_but_rejects_future_since() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let frame = hello("room-1", "edit", -5, token_for("room-1", CapabilityRole::Edit));
        let (_, _, since) = hub.process_hello(&frame).await.unwrap();
        assert_eq!(since, 0);

        let frame = hello("room-1", "edit", 99, token_for("room-1", CapabilityRole::Edit));
        let (code, msg) = hub.process_hello(&frame).await.unwrap_err();
        assert_eq!(code, ErrorCode::Conflict);
        assert_eq!(msg, "since ahead of server");
    }

    #[tokio::test]
    async fn hello_validates_fields_before_the_token() {
        let hub = new_hub();

        let frame = hello("", "edit", 0, "tok".to_string());
        assert_eq!(
            hub.process_hello(&frame).await.unwrap_err().0,
            ErrorCode::Invalid
        );

        let frame = hello("room-1", "edit", 0, String::new());
        assert_eq!(
            hub.process_hello(&frame).await.unwrap_err().0,
            ErrorCode::Invalid
        );

        // Roles are case-sensitive.
        let frame = hello("room-1", "Edit", 0, "tok".to_string());
        let (code, msg) = hub.process_hello(&frame).await.unwrap_err();
        assert_eq!(code, ErrorCode::Invalid);
        assert_eq!(msg, "invalid capability role");
    }

    #[tokio::test]
    async fn catch_up_streams_snapshot_then_replay_deltas() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        // Snapshot at seq 10, then live ops 11..=15.
        hub.store
            .save_snapshot(Snapshot {
                room_id: "room-1".to_string(),
                seq: 10,
                state: raw(r#"{"nodes":["compacted"]}"#),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        for seq in 11..=15 {
            hub.store
                .append_operation(Operation {
                    room_id: "room-1".to_string(),
                    seq,
                    ops: vec![raw(&format!(r#"{{"seq":{seq}}}"#))],
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let session = edit_session(&hub, "room-1", 7);
        join(&hub, &session).await;

        let snapshot = session.next_frame().await.unwrap();
        assert!(snapshot.contains(r#""type":"snapshot""#));
        assert!(snapshot.contains(r#""seq":10"#));

        for expected in 11..=15 {
            let frame = session.next_frame().await.unwrap();
            assert!(frame.contains(r#""type":"delta""#));
            assert!(frame.contains(&format!(r#""to":{expected}"#)));
        }

        // A later cursor replays only the newer deltas.
        let session = edit_session(&hub, "room-1", 12);
        join(&hub, &session).await;

        let snapshot = session.next_frame().await.unwrap();
        assert!(snapshot.contains(r#""type":"snapshot""#));
        for expected in 13..=15 {
            let frame = session.next_frame().await.unwrap();
            assert!(frame.contains(&format!(r#""to":{expected}"#)));
        }
    }

    #[tokio::test]
    async fn fresh_room_catch_up_is_a_single_zero_snapshot() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let session = edit_session(&hub, "room-1", 0);
        join(&hub, &session).await;

        let snapshot = session.next_frame().await.unwrap();
        assert!(snapshot.contains(r#""seq":0"#));
        assert!(snapshot.contains(EMPTY_ROOM_STATE));

        session.close();
        assert_eq!(session.next_frame().await, None);
    }

    #[tokio::test]
    async fn commit_fans_out_to_every_member_including_the_sender() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let editor = edit_session(&hub, "room-1", 0);
        let viewer = Arc::new(Session::new(
            hub.next_session_id(),
            "room-1".to_string(),
            CapabilityRole::View,
            0,
        ));
        join(&hub, &editor).await;
        join(&hub, &viewer).await;

        // Drain the catch-up snapshots.
        editor.next_frame().await.unwrap();
        viewer.next_frame().await.unwrap();

        hub.handle_op(&editor, op_frame("room-1", 1, r#"{"k":"add"}"#))
            .await;

        let expected = r#"{"type":"delta","roomId":"room-1","from":0,"to":1,"ops":[{"k":"add"}]}"#;
        assert_eq!(editor.next_frame().await.unwrap(), expected);
        assert_eq!(viewer.next_frame().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn viewers_cannot_commit() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let viewer = Arc::new(Session::new(
            hub.next_session_id(),
            "room-1".to_string(),
            CapabilityRole::View,
            0,
        ));
        join(&hub, &viewer).await;
        viewer.next_frame().await.unwrap();

        hub.handle_op(&viewer, op_frame("room-1", 1, r#"{"k":"add"}"#))
            .await;

        assert_eq!(
            viewer.next_frame().await.unwrap(),
            r#"{"type":"error","code":"unauthorized","msg":"edit capability required"}"#
        );
        let room = hub.store.get_room("room-1").await.unwrap();
        assert_eq!(room.current_seq, 0);
    }

    #[tokio::test]
    async fn sequence_conflicts_only_reach_the_loser() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let winner = edit_session(&hub, "room-1", 0);
        let loser = edit_session(&hub, "room-1", 0);
        join(&hub, &winner).await;
        join(&hub, &loser).await;
        winner.next_frame().await.unwrap();
        loser.next_frame().await.unwrap();

        hub.handle_op(&winner, op_frame("room-1", 1, r#"{"k":"add"}"#))
            .await;
        hub.handle_op(&loser, op_frame("room-1", 1, r#"{"k":"late"}"#))
            .await;

        // Winner sees its own delta and nothing else.
        let frame = winner.next_frame().await.unwrap();
        assert!(frame.contains(r#""to":1"#));

        // Loser sees the winner's delta, then the conflict.
        let frame = loser.next_frame().await.unwrap();
        assert!(frame.contains(r#""to":1"#));
        assert_eq!(
            loser.next_frame().await.unwrap(),
            r#"{"type":"error","code":"conflict","msg":"sequence conflict"}"#
        );

        // Reconnecting with the advanced cursor replays nothing new.
        let retry = edit_session(&hub, "room-1", 1);
        join(&hub, &retry).await;
        let snapshot = retry.next_frame().await.unwrap();
        assert!(snapshot.contains(r#""type":"snapshot""#));
        retry.close();
        assert_eq!(retry.next_frame().await, None);
    }

    #[tokio::test]
    async fn op_for_another_room_is_invalid() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let editor = edit_session(&hub, "room-1", 0);
        join(&hub, &editor).await;
        editor.next_frame().await.unwrap();

        hub.handle_op(&editor, op_frame("room-2", 1, r#"{"k":"add"}"#))
            .await;
        assert_eq!(
            editor.next_frame().await.unwrap(),
            r#"{"type":"error","code":"invalid","msg":"room mismatch"}"#
        );
    }

    #[tokio::test]
    async fn empty_op_batches_are_dropped_silently() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let editor = edit_session(&hub, "room-1", 0);
        join(&hub, &editor).await;
        editor.next_frame().await.unwrap();

        hub.handle_op(
            &editor,
            OpFrame {
                room_id: "room-1".to_string(),
                seq: 1,
                ops: Vec::new(),
            },
        )
        .await;

        editor.close();
        assert_eq!(editor.next_frame().await, None);
        assert_eq!(hub.store.get_room("room-1").await.unwrap().current_seq, 0);
    }

    #[tokio::test]
    async fn every_member_observes_commits_in_sequence_order() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let first = edit_session(&hub, "room-1", 0);
        let second = edit_session(&hub, "room-1", 0);
        join(&hub, &first).await;
        join(&hub, &second).await;
        first.next_frame().await.unwrap();
        second.next_frame().await.unwrap();

        for seq in 1..=4 {
            let sender = if seq % 2 == 1 { &first } else { &second };
            hub.handle_op(sender, op_frame("room-1", seq, r#"{"k":"add"}"#))
                .await;
        }

        for session in [&first, &second] {
            for expected in 1..=4 {
                let frame = session.next_frame().await.unwrap();
                assert!(
                    frame.contains(&format!(r#""from":{},"to":{}"#, expected - 1, expected)),
                    "unexpected frame {frame}"
                );
            }
        }
    }

    #[tokio::test]
    async fn departed_sessions_stop_receiving_broadcasts() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let stayer = edit_session(&hub, "room-1", 0);
        let leaver = edit_session(&hub, "room-1", 0);
        let state = join(&hub, &stayer).await;
        join(&hub, &leaver).await;
        stayer.next_frame().await.unwrap();
        leaver.next_frame().await.unwrap();

        state.remove_session(&leaver);

        hub.handle_op(&stayer, op_frame("room-1", 1, r#"{"k":"add"}"#))
            .await;

        assert!(stayer.next_frame().await.unwrap().contains(r#""to":1"#));
        assert_eq!(leaver.next_frame().await, None);
    }

    #[tokio::test]
    async fn empty_rooms_can_be_reaped_from_the_registry() {
        let hub = new_hub();
        create_room(&hub, "room-1").await;

        let session = edit_session(&hub, "room-1", 0);
        let state = join(&hub, &session).await;

        // Occupied rooms survive a reap attempt.
        hub.remove_room("room-1");
        assert!(hub.room_state("room-1").is_some());

        state.remove_session(&session);
        hub.remove_room("room-1");
        assert!(hub.room_state("room-1").is_none());
    }

    #[tokio::test]
    async fn op_count_trigger_compacts_through_the_folder() {
        let folder: StateFolder = Arc::new(|state, ops| {
            let mut items: Vec<serde_json::Value> = match state {
                Some(raw) => serde_json::from_str(raw.get())?,
                None => Vec::new(),
            };
            for op in ops {
                for payload in &op.ops {
                    items.push(serde_json::from_str(payload.get())?);
                }
            }
            RawValue::from_string(serde_json::to_string(&items)?)
        });

        let mut cfg = test_config();
        cfg.persist_every_n_ops = 2;
        let hub = Arc::new(Hub::new(cfg, Arc::new(MemoryStore::new()), Some(folder)));

        let now = Utc::now();
        hub.store
            .create_room(Room {
                id: "room-1".to_string(),
                created_at: now,
                updated_at: now,
                current_seq: 0,
                snapshot: None,
            })
            .await
            .unwrap();

        let editor = edit_session(&hub, "room-1", 0);
        join(&hub, &editor).await;

        hub.handle_op(&editor, op_frame("room-1", 1, r#"{"n":1}"#)).await;
        hub.handle_op(&editor, op_frame("room-1", 2, r#"{"n":2}"#)).await;

        // The trigger spawns compaction; give it a moment to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let snapshot = hub.store.latest_snapshot("room-1").await.unwrap();
        assert_eq!(snapshot.seq, 2);
        assert_eq!(snapshot.state.get(), r#"[{"n":1},{"n":2}]"#);
    }
}
