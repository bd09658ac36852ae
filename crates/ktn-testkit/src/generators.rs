//! Proptest generators for property-based testing.

use chrono::DateTime;
use proptest::prelude::*;
use serde_json::{Map, Value};

use ktn_core::{
    Folder, IceCandidate, Note, Notebook, SessionDescription, SignalingPayload, Timestamp,
};
use ktn_sync::Snapshot;

/// Generate a timestamp between 2001 and 2033, second precision.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (1_000_000_000i64..2_000_000_000).prop_map(timestamp_at)
}

/// Timestamp `secs` after the epoch.
pub fn timestamp_at(secs: i64) -> Timestamp {
    let at = DateTime::from_timestamp(secs, 0).unwrap_or_default();
    Timestamp::from_datetime(at)
}

/// Generate an entity id.
pub fn entity_id() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,16}".prop_map(String::from)
}

/// Fields a newer client might add that this one does not know.
pub fn extra_fields() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("x[a-z]{1,8}", "[ -~]{0,16}", 0..3).prop_map(|fields| {
        fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect()
    })
}

pub fn folder() -> impl Strategy<Value = Folder> {
    (entity_id(), "[ -~]{0,24}", timestamp(), extra_fields()).prop_map(
        |(id, name, at, extra)| {
            let mut folder = Folder::new(id, name, at);
            folder.extra = extra;
            folder
        },
    )
}

pub fn notebook() -> impl Strategy<Value = Notebook> {
    (entity_id(), "[ -~]{0,24}", timestamp(), prop::option::of(entity_id())).prop_map(
        |(id, name, at, folder_id)| {
            let mut notebook = Notebook::new(id, name, at);
            notebook.folder_id = folder_id;
            notebook
        },
    )
}

/// Generate a note with content up to `max_content` characters.
pub fn note(max_content: usize) -> impl Strategy<Value = Note> {
    (
        entity_id(),
        "[ -~]{0,24}",
        timestamp(),
        prop::collection::vec(any::<char>(), 0..=max_content),
    )
        .prop_map(|(id, title, at, content)| {
            Note::new(id, title, at).with_content(content.into_iter().collect::<String>())
        })
}

pub fn ice_candidate() -> impl Strategy<Value = IceCandidate> {
    (
        "candidate:[0-9]{1,4} 1 udp [0-9]{1,10} [0-9a-f:.]{3,39} [0-9]{1,5} typ (host|srflx|relay)",
        prop::option::of("[0-9]{1,2}"),
        prop::option::of(0u16..4),
    )
        .prop_map(|(candidate, sdp_mid, sdp_m_line_index)| IceCandidate {
            candidate,
            sdp_mid,
            sdp_m_line_index,
        })
}

/// Generate an offer or answer with up to 8 candidates.
pub fn signaling_payload() -> impl Strategy<Value = SignalingPayload> {
    (
        any::<bool>(),
        "(v=0\r\n)?[ -~]{0,200}",
        prop::collection::vec(ice_candidate(), 0..8),
    )
        .prop_map(|(offer, sdp, candidates)| {
            let description = SessionDescription::new(sdp).with_candidates(candidates);
            if offer {
                SignalingPayload::Offer(description)
            } else {
                SignalingPayload::Answer(description)
            }
        })
}

/// Generate a snapshot with up to `max` entities per collection.
pub fn snapshot(max: usize) -> impl Strategy<Value = Snapshot> {
    (
        prop::collection::vec(folder(), 0..=max),
        prop::collection::vec(notebook(), 0..=max),
        prop::collection::vec(note(64), 0..=max),
        timestamp(),
    )
        .prop_map(|(folders, notebooks, notes, at)| {
            let mut snapshot = Snapshot::new(at);
            snapshot.folders = folders.iter().filter_map(to_value).collect();
            snapshot.notebooks = notebooks.iter().filter_map(to_value).collect();
            snapshot.notes = notes.iter().filter_map(to_value).collect();
            snapshot
        })
}

fn to_value<T: serde::Serialize>(entity: &T) -> Option<Value> {
    serde_json::to_value(entity).ok()
}
