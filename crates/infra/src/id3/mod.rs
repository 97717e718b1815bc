//! Minimal ID3v2.4 writer for chapter tags.
//!
//! Only what chaptering needs: a tag header, text frames, CHAP frames and
//! a CTOC frame. Every frame reports its body size up front because the
//! frame header carries it; `size()` and `write_to()` must agree exactly.

mod frames;
mod tag;

pub use frames::{ChapterFrame, ChapterTocFrame, Frame, TextFrame};
pub use tag::{TAG_HEADER_LEN, Tag, chapter_tag, existing_tag_len};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table of contents holds at most 255 entries, got {0}")]
    TooManyEntries(usize),

    #[error("invalid element id {0:?}")]
    InvalidElementId(String),

    #[error("{0} bytes does not fit a syncsafe size")]
    TooLarge(usize),

    #[error("frame {frame} declared {declared} bytes but wrote {written}")]
    SizeMismatch {
        frame: String,
        declared: usize,
        written: usize,
    },
}

/// Largest value a 4-byte syncsafe integer can hold.
pub const MAX_SYNCSAFE: u32 = (1 << 28) - 1;

/// Encode `value` as four 7-bit bytes, most significant first.
pub fn syncsafe(value: usize) -> Result<[u8; 4], TagError> {
    let v = u32::try_from(value)
        .ok()
        .filter(|v| *v <= MAX_SYNCSAFE)
        .ok_or(TagError::TooLarge(value))?;
    Ok([
        ((v >> 21) & 0x7f) as u8,
        ((v >> 14) & 0x7f) as u8,
        ((v >> 7) & 0x7f) as u8,
        (v & 0x7f) as u8,
    ])
}

pub fn decode_syncsafe(bytes: [u8; 4]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| (acc << 7) | u32::from(b & 0x7f))
}
