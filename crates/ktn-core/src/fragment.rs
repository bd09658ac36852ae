//! `KTN1:` fragments for visual transfer.
//!
//! A compact signaling payload is usually too large for one QR code, so it is
//! cut into slices and each slice is wrapped as `KTN1:<index>/<total>:<slice>`.
//! Index is 1-based. Codes can be scanned in any order; the assembler
//! reorders by index.

use std::collections::BTreeMap;

use crate::error::CoreError;

/// Prefix identifying a wrapped fragment.
pub const FRAGMENT_PREFIX: &str = "KTN1:";

/// Characters per fragment for QR transfer.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1500;

/// One scanned fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// 1-based position.
    pub index: usize,
    /// Number of fragments in the payload.
    pub total: usize,
    pub payload: String,
}

/// Split `text` into slices of at most `size` characters.
///
/// Splits on character boundaries. An empty string yields one empty slice.
pub fn split(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    if text.is_empty() {
        return vec![text];
    }

    let mut slices = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0;
    for (count, (offset, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            slices.push(&text[start..offset]);
            start = offset;
        }
    }
    slices.push(&text[start..]);
    slices
}

/// Wrap a slice as `KTN1:{index}/{total}:{slice}`.
pub fn wrap(index: usize, total: usize, slice: &str) -> String {
    format!("{FRAGMENT_PREFIX}{index}/{total}:{slice}")
}

fn parse_number(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse a scanned string.
///
/// Returns `None` when the text is not a fragment, in which case the caller
/// treats it as a complete, unfragmented payload. The slice after the second
/// colon is taken verbatim and may itself contain colons.
pub fn parse(raw: &str) -> Option<Fragment> {
    let rest = raw.strip_prefix(FRAGMENT_PREFIX)?;
    let (index, rest) = rest.split_once('/')?;
    let (total, payload) = rest.split_once(':')?;
    Some(Fragment {
        index: parse_number(index)?,
        total: parse_number(total)?,
        payload: payload.to_string(),
    })
}

/// Outcome of feeding one fragment to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentProgress {
    /// More fragments are needed.
    Partial { received: usize, total: usize },
    /// All fragments arrived; the joined text.
    Complete(String),
}

/// Reassembles fragments scanned in any order.
///
/// If a fragment claims a different total than the set in progress, the
/// newest total wins and collection starts over with that fragment.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    total: Option<usize>,
    slices: BTreeMap<usize, String>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment. Re-scanning an index replaces its slice.
    pub fn accept(&mut self, fragment: Fragment) -> Result<FragmentProgress, CoreError> {
        let Fragment {
            index,
            total,
            payload,
        } = fragment;

        if total == 0 || index == 0 || index > total {
            return Err(CoreError::InvalidFragment(format!(
                "index {index} outside 1..={total}"
            )));
        }

        if self.total != Some(total) {
            self.slices.clear();
            self.total = Some(total);
        }

        self.slices.insert(index, payload);

        if self.slices.len() == total {
            Ok(FragmentProgress::Complete(self.finish()?))
        } else {
            Ok(FragmentProgress::Partial {
                received: self.slices.len(),
                total,
            })
        }
    }

    /// Number of unique indices collected.
    pub fn received(&self) -> usize {
        self.slices.len()
    }

    /// Total claimed by the current set, if any fragment has arrived.
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.total == Some(self.slices.len())
    }

    /// Join slices `1..=total`.
    ///
    /// Fails with [`CoreError::MissingFragment`] naming the first gap instead
    /// of silently joining an empty slice in its place.
    pub fn finish(&self) -> Result<String, CoreError> {
        let total = self.total.unwrap_or(0);
        if total == 0 {
            return Err(CoreError::MissingFragment { index: 1, total: 1 });
        }

        let mut text = String::new();
        for index in 1..=total {
            let slice = self
                .slices
                .get(&index)
                .ok_or(CoreError::MissingFragment { index, total })?;
            text.push_str(slice);
        }
        Ok(text)
    }

    pub fn reset(&mut self) {
        self.total = None;
        self.slices.clear();
    }
}
