//! Posting lists as stored values: each media id is 4 little-endian bytes,
//! concatenated with no header. The value length is authoritative.

use std::collections::HashSet;

use crate::MediaId;

const WIDTH: usize = 4;

/// Encode `ids`, keeping only the first occurrence of each.
pub fn encode(ids: &[MediaId]) -> Vec<u8> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut out = Vec::with_capacity(ids.len() * WIDTH);
    for &id in ids {
        if seen.insert(id) {
            out.extend_from_slice(&id.to_le_bytes());
        }
    }
    out
}

/// Decode a posting list. Trailing bytes that do not form a whole id are
/// ignored; use [`is_well_formed`] to detect them.
pub fn decode(bytes: &[u8]) -> Vec<MediaId> {
    bytes.chunks_exact(WIDTH).map(read_id).collect()
}

pub fn is_well_formed(bytes: &[u8]) -> bool {
    bytes.len() % WIDTH == 0
}

pub fn contains(bytes: &[u8], id: MediaId) -> bool {
    let needle = id.to_le_bytes();
    bytes.chunks_exact(WIDTH).any(|chunk| chunk == needle)
}

/// Append `id` unless it is already present. Returns whether `list` changed.
pub fn append_if_absent(list: &mut Vec<u8>, id: MediaId) -> bool {
    if contains(list, id) {
        return false;
    }
    list.extend_from_slice(&id.to_le_bytes());
    true
}

#[inline]
fn read_id(chunk: &[u8]) -> MediaId {
    MediaId::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
}
