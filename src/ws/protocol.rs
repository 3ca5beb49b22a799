use crate::models::{Operation, Snapshot};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Wire error codes emitted to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Conflict,
    Invalid,
    ServerError,
}

/// The first frame a client must send after connecting.
#[derive(Debug, Deserialize)]
pub struct HelloFrame {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "cap")]
    pub role: String,
    #[serde(default)]
    pub since: i64,
    pub token: String,
}

/// An ordered batch of op payloads targeting one sequence slot.
#[derive(Debug, Deserialize)]
pub struct OpFrame {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub seq: i64,
    pub ops: Vec<Box<RawValue>>,
}

/// Keepalive probe carrying a client timestamp.
#[derive(Debug, Deserialize)]
pub struct PingFrame {
    #[serde(default)]
    pub ts: i64,
}

/// A decoded client frame.
#[derive(Debug)]
pub enum ClientFrame {
    Hello(HelloFrame),
    Op(OpFrame),
    Ping(PingFrame),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("decode frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported frame type '{0}'")]
    UnsupportedType(String),
}

#[derive(Deserialize)]
struct FrameProbe {
    #[serde(rename = "type")]
    kind: String,
}

/// Decodes a client frame in two phases: the `type` discriminator first,
/// then the full payload into the matching variant. Unknown types are
/// rejected without attempting a full decode.
pub fn decode_client_frame(data: &str) -> Result<ClientFrame, ProtocolError> {
    let probe: FrameProbe = serde_json::from_str(data)?;

    match probe.kind.as_str() {
        "hello" => Ok(ClientFrame::Hello(serde_json::from_str(data)?)),
        "op" => Ok(ClientFrame::Op(serde_json::from_str(data)?)),
        "ping" => Ok(ClientFrame::Ping(serde_json::from_str(data)?)),
        other => Err(ProtocolError::UnsupportedType(other.to_string())),
    }
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ServerFrame<'a> {
    #[serde(rename = "snapshot")]
    Snapshot {
        #[serde(rename = "roomId")]
        room_id: &'a str,
        seq: i64,
        state: &'a RawValue,
    },
    #[serde(rename = "delta")]
    Delta {
        #[serde(rename = "roomId")]
        room_id: &'a str,
        from: i64,
        to: i64,
        ops: &'a [Box<RawValue>],
    },
    #[serde(rename = "pong")]
    Pong { ts: i64 },
    #[serde(rename = "error")]
    Error { code: ErrorCode, msg: &'a str },
}

/// Encodes the catch-up anchor emitted after a successful handshake.
pub fn encode_snapshot(room_id: &str, snapshot: &Snapshot) -> serde_json::Result<String> {
    serde_json::to_string(&ServerFrame::Snapshot {
        room_id,
        seq: snapshot.seq,
        state: &snapshot.state,
    })
}

/// Encodes one committed operation as an incremental update.
pub fn encode_delta(op: &Operation) -> serde_json::Result<String> {
    serde_json::to_string(&ServerFrame::Delta {
        room_id: &op.room_id,
        from: op.seq - 1,
        to: op.seq,
        ops: &op.ops,
    })
}

/// Encodes a pong echoing the client timestamp, or server time if zero.
pub fn encode_pong(ts: i64) -> serde_json::Result<String> {
    let ts = if ts == 0 {
        Utc::now().timestamp_millis()
    } else {
        ts
    };
    serde_json::to_string(&ServerFrame::Pong { ts })
}

/// Encodes an error frame. Never embeds internal details.
pub fn encode_error(code: ErrorCode, msg: &str) -> String {
    serde_json::to_string(&ServerFrame::Error { code, msg }).unwrap_or_else(|_| {
        r#"{"type":"error","code":"server_error","msg":"encoding failure"}"#.to_string()
    })
}
