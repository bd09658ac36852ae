//! Application messages carried over the data channel.
//!
//! Every frame is a JSON object tagged by `type`. Frames with an unknown tag
//! are rejected at the boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ktn_core::{DeviceId, Entity, EntityKind, Timestamp};

use crate::error::{Result, SyncError};

/// Tag of a chunk envelope.
pub const CHUNK_TYPE: &str = "__chunk__";

/// Chunking limits.
pub mod limits {
    /// Frames larger than this are split into chunk envelopes.
    pub const CHUNK_SIZE: usize = 16 * 1024;
    /// Sending pauses while more than this many bytes are buffered.
    pub const HIGH_WATER_MARK: usize = 64 * 1024;
    /// Max chunked messages being reassembled at once.
    pub const MAX_CONCURRENT_STREAMS: usize = 64;
    /// Max chunks in one chunked message.
    pub const MAX_CHUNKS_PER_STREAM: usize = 4096;
}

/// A frame on the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppMessage {
    /// Ask the peer for its snapshot.
    #[serde(rename = "sync_request", rename_all = "camelCase")]
    SyncRequest {
        device_id: DeviceId,
        timestamp: Timestamp,
    },

    /// A full snapshot, expecting an ack with the peer's snapshot.
    #[serde(rename = "sync_data")]
    SyncData(Snapshot),

    /// A full snapshot sent in reply to `sync_data`.
    #[serde(rename = "sync_ack")]
    SyncAck(Snapshot),

    /// One slice of a larger frame.
    #[serde(rename = "__chunk__")]
    Chunk(ChunkEnvelope),
}

impl AppMessage {
    pub fn name(&self) -> &'static str {
        match self {
            AppMessage::SyncRequest { .. } => "sync_request",
            AppMessage::SyncData(_) => "sync_data",
            AppMessage::SyncAck(_) => "sync_ack",
            AppMessage::Chunk(_) => CHUNK_TYPE,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }
}

/// Full contents of the three collections at one moment.
///
/// Entities are kept as raw JSON so one undecodable record only costs that
/// record during merge, not the whole message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub notes: Vec<Value>,
    #[serde(default)]
    pub notebooks: Vec<Value>,
    #[serde(default)]
    pub folders: Vec<Value>,
    pub timestamp: Timestamp,
}

impl Snapshot {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            notes: Vec::new(),
            notebooks: Vec::new(),
            folders: Vec::new(),
            timestamp,
        }
    }

    pub fn collection(&self, kind: EntityKind) -> &[Value] {
        match kind {
            EntityKind::Folder => &self.folders,
            EntityKind::Notebook => &self.notebooks,
            EntityKind::Note => &self.notes,
        }
    }

    fn collection_mut(&mut self, kind: EntityKind) -> &mut Vec<Value> {
        match kind {
            EntityKind::Folder => &mut self.folders,
            EntityKind::Notebook => &mut self.notebooks,
            EntityKind::Note => &mut self.notes,
        }
    }

    /// Append an entity to its collection.
    pub fn push<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let value = serde_json::to_value(entity)?;
        self.collection_mut(E::KIND).push(value);
        Ok(())
    }

    /// Builder form of [`push`](Self::push).
    pub fn with<E: Entity>(mut self, entity: &E) -> Result<Self> {
        self.push(entity)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.notes.len() + self.notebooks.len() + self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One slice of a chunked frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnvelope {
    /// Shared by all chunks of one frame.
    pub chunk_id: String,
    /// 0-based position.
    pub index: usize,
    pub total: usize,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktn_core::{Folder, Note};
    use serde_json::json;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_sync_request_wire_form() {
        let msg = AppMessage::SyncRequest {
            device_id: DeviceId::from_bytes([0xab; 16]),
            timestamp: ts("2026-03-01T10:00:00.000Z"),
        };
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "sync_request",
                "deviceId": "abababababababababababababababab",
                "timestamp": "2026-03-01T10:00:00.000Z"
            })
        );
    }

    #[test]
    fn test_sync_data_wire_form() {
        let snapshot = Snapshot::new(ts("2026-03-01T10:00:00Z"))
            .with(&Folder::new("F1", "Inbox", ts("2026-01-01T00:00:00Z")))
            .unwrap();
        let value: Value =
            serde_json::from_str(&AppMessage::SyncData(snapshot.clone()).encode().unwrap())
                .unwrap();

        assert_eq!(value["type"], "sync_data");
        assert_eq!(value["folders"][0]["id"], "F1");
        assert_eq!(value["folders"][0]["updatedAt"], "2026-01-01T00:00:00Z");
        assert_eq!(value["notes"], json!([]));

        let back = AppMessage::decode(&value.to_string()).unwrap();
        assert_eq!(back, AppMessage::SyncData(snapshot));
    }

    #[test]
    fn test_chunk_wire_form() {
        let msg = AppMessage::Chunk(ChunkEnvelope {
            chunk_id: "lq2x9k1a".into(),
            index: 0,
            total: 2,
            data: "{\"ty".into(),
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "__chunk__",
                "chunkId": "lq2x9k1a",
                "index": 0,
                "total": 2,
                "data": "{\"ty"
            })
        );
    }

    #[test]
    fn test_decode_accepts_missing_collections() {
        let msg = AppMessage::decode(
            r#"{"type":"sync_ack","notes":[{"id":"N1"}],"timestamp":"2026-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        match msg {
            AppMessage::SyncAck(snapshot) => {
                assert_eq!(snapshot.notes.len(), 1);
                assert!(snapshot.folders.is_empty());
            }
            other => panic!("expected sync_ack, got {}", other.name()),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        for frame in [
            r#"{"type":"sync_nack"}"#,
            r#"{"notes":[]}"#,
            "not json",
            r#"{"type":"sync_request","deviceId":"zz","timestamp":"2026-03-01T10:00:00Z"}"#,
        ] {
            assert!(
                matches!(AppMessage::decode(frame), Err(SyncError::InvalidMessage(_))),
                "accepted {frame}"
            );
        }
    }

    #[test]
    fn test_snapshot_push_routes_by_kind() {
        let mut snapshot = Snapshot::new(ts("2026-03-01T10:00:00Z"));
        snapshot
            .push(&Note::new("N1", "a", ts("2026-01-01T00:00:00Z")))
            .unwrap();
        assert_eq!(snapshot.collection(EntityKind::Note).len(), 1);
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.is_empty());
    }
}
