//! Fragmented MP4 fix-ups for segments cut by independent encoder runs.
//!
//! Each encoder process numbers its fragments from 1. Before a segment is
//! served, the `mfhd` sequence number of every `moof` is rewritten so numbers
//! keep increasing across process restarts.

use bytes::Buf;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const MDAT: Self = Self(*b"mdat");
    pub const STYP: Self = Self(*b"styp");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed box header.
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    /// Box type code.
    pub box_type: BoxType,
    /// Offset of the header within the scanned buffer.
    pub offset: usize,
    /// Box size including header.
    pub size: usize,
    /// Size of the header (8 or 16 bytes).
    pub header_size: usize,
}

impl BoxHeader {
    /// Offset where the payload begins.
    pub fn data_offset(&self) -> usize {
        self.offset + self.header_size
    }

    /// Offset one past the end of the box.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Read the box header at `offset` of `data`, bounded by `limit`.
///
/// Returns `None` when the header is truncated or claims more bytes than
/// remain. A size of 0 means the box runs to `limit`.
fn read_header(data: &[u8], offset: usize, limit: usize) -> Option<BoxHeader> {
    if limit < offset + 8 || data.len() < limit {
        return None;
    }
    let mut cursor = &data[offset..limit];
    let size32 = cursor.get_u32();
    let mut box_type = [0u8; 4];
    cursor.copy_to_slice(&mut box_type);

    let (size, header_size) = match size32 {
        0 => (limit - offset, 8),
        1 => {
            if cursor.remaining() < 8 {
                return None;
            }
            (usize::try_from(cursor.get_u64()).ok()?, 16)
        }
        n => (n as usize, 8),
    };

    if size < header_size || offset.checked_add(size)? > limit {
        return None;
    }

    Some(BoxHeader {
        box_type: BoxType(box_type),
        offset,
        size,
        header_size,
    })
}

/// Iterate over the boxes in `data[start..end]`, stopping at the first
/// malformed header.
pub fn boxes(data: &[u8], start: usize, end: usize) -> impl Iterator<Item = BoxHeader> + '_ {
    let mut offset = start;
    std::iter::from_fn(move || {
        let header = read_header(data, offset, end)?;
        offset = header.end();
        Some(header)
    })
}

/// Rewrite the `mfhd` sequence number of every top-level `moof` in `buf`.
///
/// Fragments are numbered `first`, `first + 1`, ... in file order. Returns
/// the number of fragments patched.
pub fn patch_sequence_numbers(buf: &mut [u8], first: u32) -> usize {
    let data: &[u8] = buf;
    let mfhd_offsets: Vec<usize> = boxes(data, 0, data.len())
        .filter(|b| b.box_type == BoxType::MOOF)
        .filter_map(|moof| {
            boxes(data, moof.data_offset(), moof.end())
                .find(|child| child.box_type == BoxType::MFHD)
        })
        // version/flags (4) precede the sequence number
        .filter(|mfhd| mfhd.size >= mfhd.header_size + 8)
        .map(|mfhd| mfhd.data_offset() + 4)
        .collect();

    for (i, &at) in mfhd_offsets.iter().enumerate() {
        let sequence = first.wrapping_add(i as u32);
        buf[at..at + 4].copy_from_slice(&sequence.to_be_bytes());
    }

    mfhd_offsets.len()
}

/// Read the `mfhd` sequence numbers of every top-level `moof` in `data`.
pub fn sequence_numbers(data: &[u8]) -> Vec<u32> {
    boxes(data, 0, data.len())
        .filter(|b| b.box_type == BoxType::MOOF)
        .filter_map(|moof| {
            boxes(data, moof.data_offset(), moof.end())
                .find(|child| child.box_type == BoxType::MFHD)
        })
        .filter(|mfhd| mfhd.size >= mfhd.header_size + 8)
        .map(|mfhd| {
            let mut cursor = &data[mfhd.data_offset() + 4..];
            cursor.get_u32()
        })
        .collect()
}
