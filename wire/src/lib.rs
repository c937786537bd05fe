//! Shared frame model and protobuf codec for the realtime event channels.
//!
//! This crate owns the wire representation spoken by both the sync engine
//! and the backend: broadcast event frames for the change feed and the
//! presence/cursor channel. Frame payloads stay flexible
//! (`serde_json::Value`) while encoding over protobuf for compact binary
//! transport; typed payload structs cover the shapes the engine relies on.
//!
//! Numbers inside `data` pass through a protobuf `Value` bridge, which
//! carries every number as a double. Payload timestamps are therefore `f64`
//! milliseconds end to end.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Namespaced operation names carried in [`Frame::op`].
pub mod op {
    /// An object was durably created (change feed).
    pub const OBJECT_CREATED: &str = "object:created";
    /// An object was durably updated (change feed).
    pub const OBJECT_UPDATED: &str = "object:updated";
    /// A participant joined the workspace (presence channel).
    pub const PRESENCE_JOIN: &str = "presence:join";
    /// A participant connection left the workspace (presence channel).
    pub const PRESENCE_LEAVE: &str = "presence:leave";
    /// Full roster sent to a freshly subscribed participant.
    pub const PRESENCE_SNAPSHOT: &str = "presence:snapshot";
    /// A participant's live pointer position (presence channel).
    pub const CURSOR_MOVED: &str = "cursor:moved";
}

/// Error returned by [`decode_frame`] and the typed payload accessors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The frame payload does not match the expected shape.
    #[error("invalid frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A single broadcast message on the realtime wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame (UUID string).
    pub id: String,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
    /// Workspace context for this frame, if any.
    pub workspace_id: Option<String>,
    /// Sender identifier (user id or system label).
    pub from: Option<String>,
    /// Namespaced operation name, e.g. `"object:created"`.
    pub op: String,
    /// Arbitrary JSON payload.
    pub data: Value,
}

impl Frame {
    /// Parse the payload as an [`ObjectRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if required fields are missing or
    /// mistyped.
    pub fn object_record(&self) -> Result<ObjectRecord, CodecError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Parse the payload as a [`CursorPayload`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if required fields are missing or
    /// mistyped.
    pub fn cursor_payload(&self) -> Result<CursorPayload, CodecError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Parse the payload as a [`PresencePayload`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if required fields are missing or
    /// mistyped.
    pub fn presence_payload(&self) -> Result<PresencePayload, CodecError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Parse the payload as a [`PresenceSnapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if required fields are missing or
    /// mistyped.
    pub fn presence_snapshot(&self) -> Result<PresenceSnapshot, CodecError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// A canvas object as stored durably and carried on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Unique identifier, client-generated and preserved by the backend.
    pub id: String,
    /// Left edge in workspace coordinates.
    pub x: f64,
    /// Top edge in workspace coordinates.
    pub y: f64,
    /// Width in workspace units.
    pub width: f64,
    /// Height in workspace units.
    pub height: f64,
    /// Fill color, one of the fixed palette.
    pub color: String,
    /// User who created the object, if known.
    pub created_by: Option<String>,
    /// Creation time, ms since the Unix epoch.
    pub created_at: f64,
    /// Last accepted mutation time, ms since the Unix epoch.
    pub updated_at: f64,
    /// Workspace this object belongs to.
    pub workspace_id: String,
}

/// Sparse update for an object. Only present fields are applied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    /// New x position, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// New y position, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// New width, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// New height, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Timestamp of the mutation, ms since the Unix epoch. Drives
    /// last-writer-wins resolution at the backend.
    pub updated_at: f64,
}

/// A participant's live pointer state. Fire-and-forget, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    /// Owning user id.
    pub user_id: String,
    /// Display name shown next to the cursor.
    pub display_name: String,
    /// Presence color (hex).
    pub color: String,
    /// Pointer x in workspace coordinates.
    pub x: f64,
    /// Pointer y in workspace coordinates.
    pub y: f64,
    /// False when the pointer left the workspace or the session ended.
    pub visible: bool,
    /// Send time, ms since the Unix epoch.
    pub ts: f64,
}

/// A participant identity on the presence channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Owning user id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Presence color (hex).
    pub color: String,
    /// Connection key; one user may hold several (multiple tabs).
    pub conn_id: String,
}

/// Full roster broadcast to a freshly subscribed participant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Every currently connected participant, one entry per connection.
    pub users: Vec<PresencePayload>,
}

/// Serialize a payload struct into a frame `data` value.
///
/// Serialization of the payload types in this crate cannot fail; a `Null`
/// payload is substituted if it ever does.
#[must_use]
pub fn to_data<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = frame_to_wire(frame);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Safety: encoding into a Vec<u8> is infallible; the only error prost
    // returns here is `BufferTooSmall`, which cannot occur with a growable Vec.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    Ok(wire_to_frame(wire))
}

fn frame_to_wire(frame: &Frame) -> WireFrame {
    WireFrame {
        id: frame.id.clone(),
        ts: frame.ts,
        workspace_id: frame.workspace_id.clone(),
        from: frame.from.clone(),
        op: frame.op.clone(),
        data: Some(json_to_proto_value(&frame.data)),
    }
}

fn wire_to_frame(wire: WireFrame) -> Frame {
    Frame {
        id: wire.id,
        ts: wire.ts,
        workspace_id: wire.workspace_id,
        from: wire.from,
        op: wire.op,
        data: wire
            .data
            .map_or(Value::Object(Map::new()), |v| proto_to_json_value(&v)),
    }
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => {
            prost_types::value::Kind::NullValue(prost_types::NullValue::NullValue as i32)
        }
        Value::Bool(v) => prost_types::value::Kind::BoolValue(*v),
        Value::Number(v) => prost_types::value::Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => prost_types::value::Kind::StringValue(v.clone()),
        Value::Array(v) => prost_types::value::Kind::ListValue(prost_types::ListValue {
            values: v.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(v) => prost_types::value::Kind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

fn proto_to_json_value(value: &prost_types::Value) -> Value {
    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        prost_types::value::Kind::NullValue(_) => Value::Null,
        prost_types::value::Kind::NumberValue(v) => {
            serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number)
        }
        prost_types::value::Kind::StringValue(v) => Value::String(v.clone()),
        prost_types::value::Kind::BoolValue(v) => Value::Bool(*v),
        prost_types::value::Kind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        prost_types::value::Kind::ListValue(v) => {
            Value::Array(v.values.iter().map(proto_to_json_value).collect())
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    ts: i64,
    #[prost(string, optional, tag = "3")]
    workspace_id: Option<String>,
    #[prost(string, optional, tag = "4")]
    from: Option<String>,
    #[prost(string, tag = "5")]
    op: String,
    #[prost(message, optional, tag = "6")]
    data: Option<prost_types::Value>,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
