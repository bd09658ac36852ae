//! Signaling payloads and their compact wire form.
//!
//! An offer or answer is a session description plus the reachability
//! candidates gathered for it. Before it is shown as a QR code or pasted as
//! text, field names are shortened to single characters:
//!
//! | level       | long            | short |
//! |-------------|-----------------|-------|
//! | top         | `type`          | `t`   |
//! | top         | `sdp`           | `s`   |
//! | top         | `candidates`    | `c`   |
//! | candidate   | `candidate`     | `c`   |
//! | candidate   | `sdpMid`        | `m`   |
//! | candidate   | `sdpMLineIndex` | `i`   |
//!
//! Keys outside the table pass through unchanged in both directions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::CoreError;
use crate::fragment::{split, wrap};

const TOP_LEVEL_KEYS: &[(&str, &str)] = &[("type", "t"), ("sdp", "s"), ("candidates", "c")];

const CANDIDATE_KEYS: &[(&str, &str)] = &[
    ("candidate", "c"),
    ("sdpMid", "m"),
    ("sdpMLineIndex", "i"),
];

/// A network-reachability candidate proposed during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }
}

/// A session description and the candidates gathered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            candidates: Vec::new(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Which side of the exchange a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingKind {
    Offer,
    Answer,
}

impl fmt::Display for SignalingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingKind::Offer => f.write_str("offer"),
            SignalingKind::Answer => f.write_str("answer"),
        }
    }
}

/// An offer or answer exchanged over the visual/manual channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
}

impl SignalingPayload {
    pub fn kind(&self) -> SignalingKind {
        match self {
            SignalingPayload::Offer(_) => SignalingKind::Offer,
            SignalingPayload::Answer(_) => SignalingKind::Answer,
        }
    }

    pub fn description(&self) -> &SessionDescription {
        match self {
            SignalingPayload::Offer(d) | SignalingPayload::Answer(d) => d,
        }
    }

    pub fn into_description(self) -> SessionDescription {
        match self {
            SignalingPayload::Offer(d) | SignalingPayload::Answer(d) => d,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Compact,
    Expand,
}

fn rename_key(key: &str, table: &[(&str, &str)], direction: Direction) -> String {
    table
        .iter()
        .find_map(|(long, short)| match direction {
            Direction::Compact if key == *long => Some(*short),
            Direction::Expand if key == *short => Some(*long),
            _ => None,
        })
        .unwrap_or(key)
        .to_string()
}

fn rename_object(
    map: &Map<String, Value>,
    table: &[(&str, &str)],
    direction: Direction,
) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (rename_key(k, table, direction), v.clone()))
        .collect()
}

fn rename_candidates(value: &Value, direction: Direction) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rename_candidates(item, direction))
                .collect(),
        ),
        Value::Object(map) => Value::Object(rename_object(map, CANDIDATE_KEYS, direction)),
        other => other.clone(),
    }
}

fn rename_payload(value: &Value, direction: Direction) -> Value {
    let candidates_key = match direction {
        Direction::Compact => "candidates",
        Direction::Expand => "c",
    };

    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rename_payload(item, direction))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let renamed = rename_key(key, TOP_LEVEL_KEYS, direction);
                let inner = if key == candidates_key {
                    rename_candidates(inner, direction)
                } else {
                    inner.clone()
                };
                out.insert(renamed, inner);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Shorten known field names. Total over any JSON value.
pub fn compact(value: &Value) -> Value {
    rename_payload(value, Direction::Compact)
}

/// Exact inverse of [`compact`].
pub fn expand(value: &Value) -> Value {
    rename_payload(value, Direction::Expand)
}

/// Serialize a payload in compact form.
pub fn encode_compact(payload: &SignalingPayload) -> Result<String, CoreError> {
    let value =
        serde_json::to_value(payload).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    serde_json::to_string(&compact(&value)).map_err(|e| CoreError::EncodingError(e.to_string()))
}

/// Decode a payload from compact or long-form JSON.
pub fn decode_signaling(text: &str) -> Result<SignalingPayload, CoreError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| CoreError::InvalidSignaling(format!("not JSON: {e}")))?;
    serde_json::from_value(expand(&value))
        .map_err(|e| CoreError::InvalidSignaling(e.to_string()))
}

/// A payload ready for the out-of-band channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfBand {
    /// Compact JSON, for copy and paste.
    pub text: String,
    /// `KTN1:` fragments of `text`, one per QR code.
    pub fragments: Vec<String>,
}

/// Compact a payload and cut it into wrapped fragments.
pub fn encode_for_transfer(
    payload: &SignalingPayload,
    fragment_size: usize,
) -> Result<OutOfBand, CoreError> {
    let text = encode_compact(payload)?;
    let slices = split(&text, fragment_size);
    let total = slices.len();
    let fragments = slices
        .iter()
        .enumerate()
        .map(|(i, slice)| wrap(i + 1, total, slice))
        .collect();
    Ok(OutOfBand { text, fragments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_offer() -> SignalingPayload {
        let description = SessionDescription::new("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n")
            .with_candidates(vec![
                IceCandidate::new("candidate:1 1 udp 2122260223 192.168.1.4 50000 typ host"),
                IceCandidate {
                    candidate: "candidate:2 1 udp 1686052607 203.0.113.9 50001 typ srflx".into(),
                    sdp_mid: None,
                    sdp_m_line_index: Some(1),
                },
            ]);
        SignalingPayload::Offer(description)
    }

    #[test]
    fn test_compact_renames_both_levels() {
        let long = json!({
            "type": "offer",
            "sdp": "v=0",
            "candidates": [{"candidate": "c1", "sdpMid": "0", "sdpMLineIndex": 0}]
        });
        let short = compact(&long);
        assert_eq!(
            short,
            json!({"t": "offer", "s": "v=0", "c": [{"c": "c1", "m": "0", "i": 0}]})
        );
        assert_eq!(expand(&short), long);
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let long = json!({
            "type": "answer",
            "sdp": "x",
            "ufrag": "abc",
            "candidates": [{"candidate": "c", "usernameFragment": "u"}]
        });
        let short = compact(&long);
        assert_eq!(short["ufrag"], "abc");
        assert_eq!(short["c"][0]["usernameFragment"], "u");
        assert_eq!(expand(&short), long);
    }

    #[test]
    fn test_compact_over_top_level_array() {
        let long = json!([{"type": "offer", "sdp": "a"}, {"type": "answer", "sdp": "b"}]);
        let short = compact(&long);
        assert_eq!(short[1]["t"], "answer");
        assert_eq!(expand(&short), long);
    }

    #[test]
    fn test_payload_tagged_json_shape() {
        let value = serde_json::to_value(sample_offer()).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["candidates"][0]["sdpMLineIndex"], 0);
        assert!(value["candidates"][1].get("sdpMid").is_none());
    }

    #[test]
    fn test_encode_decode_compact() {
        let offer = sample_offer();
        let text = encode_compact(&offer).unwrap();
        assert!(text.starts_with("{\""));
        assert!(!text.contains("\"candidates\""));
        assert_eq!(decode_signaling(&text).unwrap(), offer);
    }

    #[test]
    fn test_decode_accepts_long_form() {
        let text = r#"{"type":"answer","sdp":"v=0","candidates":[]}"#;
        let payload = decode_signaling(text).unwrap();
        assert_eq!(payload.kind(), SignalingKind::Answer);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode_signaling(r#"{"t":"pranswer","s":"v=0","c":[]}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSignaling(_)));
        assert!(decode_signaling("hello there").is_err());
    }

    #[test]
    fn test_encode_for_transfer_wraps_every_fragment() {
        let out = encode_for_transfer(&sample_offer(), 40).unwrap();
        let total = out.fragments.len();
        assert!(total > 1);
        for (i, fragment) in out.fragments.iter().enumerate() {
            assert!(fragment.starts_with(&format!("KTN1:{}/{}:", i + 1, total)));
        }
    }
}
