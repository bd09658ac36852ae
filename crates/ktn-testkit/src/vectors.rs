//! Wire vectors for interop with other clients.
//!
//! Each vector pairs a value with the JSON another implementation must
//! produce for it and accept from us. JSON is compared structurally, so key
//! order does not matter.

use serde_json::Value;

use ktn_core::{
    encode_compact, wrap, DeviceId, Folder, IceCandidate, SessionDescription, SignalingPayload,
    Timestamp,
};
use ktn_sync::{AppMessage, ChunkEnvelope, Snapshot};

/// A signaling payload and its compact form.
#[derive(Debug, Clone)]
pub struct SignalingVector {
    pub name: &'static str,
    pub payload: SignalingPayload,
    pub compact: &'static str,
}

/// A data-channel message and its frame.
#[derive(Debug, Clone)]
pub struct MessageVector {
    pub name: &'static str,
    pub message: AppMessage,
    pub frame: &'static str,
}

fn at(raw: &str) -> Timestamp {
    Timestamp::parse(raw).unwrap_or_else(|e| panic!("bad vector timestamp {raw:?}: {e}"))
}

pub fn signaling_vectors() -> Vec<SignalingVector> {
    vec![
        SignalingVector {
            name: "offer_one_candidate",
            payload: SignalingPayload::Offer(
                SessionDescription::new("v=0\r\n").with_candidates(vec![IceCandidate::new(
                    "candidate:1 1 udp 2122260223 192.168.1.2 50000 typ host",
                )]),
            ),
            compact: r#"{"t":"offer","s":"v=0\r\n","c":[{"c":"candidate:1 1 udp 2122260223 192.168.1.2 50000 typ host","m":"0","i":0}]}"#,
        },
        SignalingVector {
            name: "answer_no_candidates",
            payload: SignalingPayload::Answer(SessionDescription::new("v=0")),
            compact: r#"{"t":"answer","s":"v=0","c":[]}"#,
        },
        SignalingVector {
            name: "candidate_without_mid",
            payload: SignalingPayload::Answer(SessionDescription::new("v=0").with_candidates(
                vec![IceCandidate {
                    candidate: "candidate:2 1 udp 1686052607 203.0.113.7 61000 typ srflx".into(),
                    sdp_mid: None,
                    sdp_m_line_index: None,
                }],
            )),
            compact: r#"{"t":"answer","s":"v=0","c":[{"c":"candidate:2 1 udp 1686052607 203.0.113.7 61000 typ srflx"}]}"#,
        },
    ]
}

pub fn message_vectors() -> Vec<MessageVector> {
    let folder = Folder::new("F1", "Inbox", at("2026-01-01T00:00:00Z"));
    let mut snapshot = Snapshot::new(at("2026-01-02T00:00:00Z"));
    snapshot
        .push(&folder)
        .unwrap_or_else(|e| panic!("vector snapshot: {e}"));

    vec![
        MessageVector {
            name: "sync_request",
            message: AppMessage::SyncRequest {
                device_id: DeviceId::from_bytes([0x11; 16]),
                timestamp: at("2026-01-02T00:00:00Z"),
            },
            frame: r#"{"type":"sync_request","deviceId":"11111111111111111111111111111111","timestamp":"2026-01-02T00:00:00Z"}"#,
        },
        MessageVector {
            name: "sync_data_one_folder",
            message: AppMessage::SyncData(snapshot.clone()),
            frame: r#"{"type":"sync_data","notes":[],"notebooks":[],"folders":[{"id":"F1","name":"Inbox","updatedAt":"2026-01-01T00:00:00Z"}],"timestamp":"2026-01-02T00:00:00Z"}"#,
        },
        MessageVector {
            name: "sync_ack_empty",
            message: AppMessage::SyncAck(Snapshot::new(at("2026-01-02T00:00:00Z"))),
            frame: r#"{"type":"sync_ack","notes":[],"notebooks":[],"folders":[],"timestamp":"2026-01-02T00:00:00Z"}"#,
        },
        MessageVector {
            name: "chunk_envelope",
            message: AppMessage::Chunk(ChunkEnvelope {
                chunk_id: "loyw3v28a0z9".into(),
                index: 0,
                total: 3,
                data: "{\"type\":\"sync".into(),
            }),
            frame: r#"{"type":"__chunk__","chunkId":"loyw3v28a0z9","index":0,"total":3,"data":"{\"type\":\"sync"}"#,
        },
    ]
}

fn parse(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("not JSON: {e}"))
}

/// Check one signaling vector in both directions.
pub fn verify_signaling(vector: &SignalingVector) -> Result<(), String> {
    let ours = encode_compact(&vector.payload).map_err(|e| e.to_string())?;
    if parse(&ours)? != parse(vector.compact)? {
        return Err(format!("{}: encoded {ours}", vector.name));
    }
    let decoded = ktn_core::decode_signaling(vector.compact).map_err(|e| e.to_string())?;
    if decoded != vector.payload {
        return Err(format!("{}: decoded {decoded:?}", vector.name));
    }
    let wrapped = wrap(1, 1, vector.compact);
    if ktn_core::parse(&wrapped).map(|f| f.payload).as_deref() != Some(vector.compact) {
        return Err(format!("{}: fragment {wrapped}", vector.name));
    }
    Ok(())
}

/// Check one message vector in both directions.
pub fn verify_message(vector: &MessageVector) -> Result<(), String> {
    let ours = vector.message.encode().map_err(|e| e.to_string())?;
    if parse(&ours)? != parse(vector.frame)? {
        return Err(format!("{}: encoded {ours}", vector.name));
    }
    let decoded = AppMessage::decode(vector.frame).map_err(|e| e.to_string())?;
    if decoded != vector.message {
        return Err(format!("{}: decoded {decoded:?}", vector.name));
    }
    Ok(())
}

/// Verify every vector, collecting failures.
pub fn verify_all_vectors() -> Result<(), Vec<String>> {
    let failures: Vec<String> = signaling_vectors()
        .iter()
        .filter_map(|v| verify_signaling(v).err())
        .chain(message_vectors().iter().filter_map(|v| verify_message(v).err()))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_pass() {
        if let Err(failures) = verify_all_vectors() {
            panic!("vector failures:\n{}", failures.join("\n"));
        }
    }

    #[test]
    fn test_vector_names_unique() {
        let mut names: Vec<_> = signaling_vectors()
            .iter()
            .map(|v| v.name)
            .chain(message_vectors().iter().map(|v| v.name))
            .collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
    }
}
