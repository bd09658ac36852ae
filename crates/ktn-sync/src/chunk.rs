//! Splitting large frames into chunk envelopes and putting them back together.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::error::{Result, SyncError};
use crate::messages::{limits, ChunkEnvelope};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// A fresh chunk id: base36 milliseconds since the epoch plus a random suffix.
pub fn new_chunk_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let suffix: u32 = rand::thread_rng().gen_range(0..36u32.pow(4));
    format!("{}{:0>4}", to_base36(millis), to_base36(suffix as u64))
}

/// Split `text` into slices of at most `max_bytes` bytes.
///
/// Slices end on character boundaries. A character wider than `max_bytes`
/// gets a slice of its own.
pub fn split_frame(text: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(1);
    let mut slices = Vec::with_capacity(text.len() / max_bytes + 1);
    let mut rest = text;

    while rest.len() > max_bytes {
        let mut end = max_bytes;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(end);
        slices.push(head);
        rest = tail;
    }
    slices.push(rest);
    slices
}

/// Envelopes for `text`, all sharing one fresh chunk id.
pub fn chunk_frame(text: &str, max_bytes: usize) -> Vec<ChunkEnvelope> {
    let chunk_id = new_chunk_id();
    let slices = split_frame(text, max_bytes);
    let total = slices.len();
    slices
        .into_iter()
        .enumerate()
        .map(|(index, data)| ChunkEnvelope {
            chunk_id: chunk_id.clone(),
            index,
            total,
            data: data.to_string(),
        })
        .collect()
}

#[derive(Debug)]
struct PartialFrame {
    parts: Vec<Option<String>>,
    received: usize,
}

/// Reassembly buffers keyed by chunk id.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    streams: HashMap<String, PartialFrame>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one chunk. Returns the joined frame once every index arrived.
    ///
    /// Duplicate indices are ignored. A chunk whose `total` disagrees with
    /// its stream drops the stream.
    pub fn accept(&mut self, envelope: ChunkEnvelope) -> Result<Option<String>> {
        let ChunkEnvelope {
            chunk_id,
            index,
            total,
            data,
        } = envelope;

        if total == 0 || total > limits::MAX_CHUNKS_PER_STREAM {
            return Err(SyncError::InvalidMessage(format!(
                "chunk stream {chunk_id} claims {total} chunks"
            )));
        }
        if index >= total {
            return Err(SyncError::InvalidMessage(format!(
                "chunk {index} outside 0..{total} in stream {chunk_id}"
            )));
        }

        if !self.streams.contains_key(&chunk_id)
            && self.streams.len() >= limits::MAX_CONCURRENT_STREAMS
        {
            return Err(SyncError::InvalidMessage(format!(
                "too many chunk streams in flight, dropping {chunk_id}"
            )));
        }

        let stream = self
            .streams
            .entry(chunk_id.clone())
            .or_insert_with(|| PartialFrame {
                parts: vec![None; total],
                received: 0,
            });

        if stream.parts.len() != total {
            self.streams.remove(&chunk_id);
            return Err(SyncError::InvalidMessage(format!(
                "chunk stream {chunk_id} changed its total to {total}"
            )));
        }

        let slot = &mut stream.parts[index];
        if slot.is_some() {
            tracing::debug!(%chunk_id, index, "duplicate chunk ignored");
            return Ok(None);
        }
        *slot = Some(data);
        stream.received += 1;

        if stream.received < total {
            return Ok(None);
        }

        let parts = self
            .streams
            .remove(&chunk_id)
            .map(|s| s.parts)
            .unwrap_or_default();
        Ok(Some(parts.into_iter().flatten().collect()))
    }

    /// Chunked frames currently being reassembled.
    pub fn in_flight(&self) -> usize {
        self.streams.len()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}
