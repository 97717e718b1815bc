//! ID3v2.4 frame bodies.

use std::io::Write;
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};

use super::{TagError, syncsafe};

const ENCODING_UTF8: u8 = 0x03;
const IGNORED_OFFSET: u32 = 0xFFFF_FFFF;
const FRAME_HEADER_LEN: usize = 10;

const CTOC_TOP_LEVEL: u8 = 0x02;
const CTOC_ORDERED: u8 = 0x01;

/// A frame that can report its body size before writing it.
pub trait Frame: Send + Sync {
    fn id(&self) -> [u8; 4];

    /// Exact number of body bytes `write_to` produces (header excluded).
    fn size(&self) -> usize;

    fn write_to(&self, w: &mut dyn Write) -> Result<usize, TagError>;

    /// Header plus body.
    fn write_framed(&self, w: &mut dyn Write) -> Result<usize, TagError> {
        let size = self.size();
        w.write_all(&self.id())?;
        w.write_all(&syncsafe(size)?)?;
        w.write_all(&[0, 0])?;
        let written = self.write_to(w)?;
        if written != size {
            return Err(TagError::SizeMismatch {
                frame: String::from_utf8_lossy(&self.id()).into_owned(),
                declared: size,
                written,
            });
        }
        Ok(FRAME_HEADER_LEN + written)
    }

    fn framed_size(&self) -> usize {
        FRAME_HEADER_LEN + self.size()
    }
}

fn check_element_id(id: &str) -> Result<(), TagError> {
    if id.is_empty() || id.contains('\0') {
        return Err(TagError::InvalidElementId(id.to_string()));
    }
    Ok(())
}

fn write_terminated(w: &mut dyn Write, s: &str) -> Result<usize, TagError> {
    w.write_all(s.as_bytes())?;
    w.write_u8(0)?;
    Ok(s.len() + 1)
}

/// Text information frame (`TIT2`, `TALB`, ...), UTF-8 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    id: [u8; 4],
    text: String,
}

impl TextFrame {
    pub fn new(id: [u8; 4], text: impl Into<String>) -> Self {
        Self { id, text: text.into() }
    }

    pub fn title(text: impl Into<String>) -> Self {
        Self::new(*b"TIT2", text)
    }
}

impl Frame for TextFrame {
    fn id(&self) -> [u8; 4] {
        self.id
    }

    fn size(&self) -> usize {
        1 + self.text.len()
    }

    fn write_to(&self, w: &mut dyn Write) -> Result<usize, TagError> {
        w.write_u8(ENCODING_UTF8)?;
        w.write_all(self.text.as_bytes())?;
        Ok(1 + self.text.len())
    }
}

/// `CHAP`: one chapter with its time range and an embedded title.
///
/// Byte offsets are not tracked, so both are written as "ignored".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterFrame {
    element_id: String,
    start_ms: u32,
    end_ms: u32,
    title: TextFrame,
}

impl ChapterFrame {
    pub fn new(
        element_id: impl Into<String>,
        start: Duration,
        end: Duration,
        title: impl Into<String>,
    ) -> Result<Self, TagError> {
        let element_id = element_id.into();
        check_element_id(&element_id)?;
        Ok(Self {
            element_id,
            start_ms: millis(start),
            end_ms: millis(end),
            title: TextFrame::title(title),
        })
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

impl Frame for ChapterFrame {
    fn id(&self) -> [u8; 4] {
        *b"CHAP"
    }

    fn size(&self) -> usize {
        self.element_id.len() + 1 + 16 + self.title.framed_size()
    }

    fn write_to(&self, w: &mut dyn Write) -> Result<usize, TagError> {
        let mut written = write_terminated(w, &self.element_id)?;
        for value in [self.start_ms, self.end_ms, IGNORED_OFFSET, IGNORED_OFFSET] {
            w.write_u32::<BigEndian>(value)?;
            written += 4;
        }
        written += self.title.write_framed(w)?;
        Ok(written)
    }
}

/// `CTOC`: table of contents listing chapter element ids.
///
/// Layout: element id + NUL, flags byte (bit 1 top-level, bit 0 ordered),
/// entry count byte, then each child id + NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTocFrame {
    element_id: String,
    top_level: bool,
    ordered: bool,
    child_ids: Vec<String>,
}

impl ChapterTocFrame {
    pub fn new(
        element_id: impl Into<String>,
        top_level: bool,
        ordered: bool,
        child_ids: Vec<String>,
    ) -> Result<Self, TagError> {
        let element_id = element_id.into();
        check_element_id(&element_id)?;
        if child_ids.len() > usize::from(u8::MAX) {
            return Err(TagError::TooManyEntries(child_ids.len()));
        }
        for child in &child_ids {
            check_element_id(child)?;
        }
        Ok(Self {
            element_id,
            top_level,
            ordered,
            child_ids,
        })
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.top_level {
            flags |= CTOC_TOP_LEVEL;
        }
        if self.ordered {
            flags |= CTOC_ORDERED;
        }
        flags
    }
}

impl Frame for ChapterTocFrame {
    fn id(&self) -> [u8; 4] {
        *b"CTOC"
    }

    fn size(&self) -> usize {
        let children: usize = self.child_ids.iter().map(|id| id.len() + 1).sum();
        self.element_id.len() + 1 + 1 + 1 + children
    }

    fn write_to(&self, w: &mut dyn Write) -> Result<usize, TagError> {
        let mut written = write_terminated(w, &self.element_id)?;
        w.write_u8(self.flags())?;
        // Entry count fits: checked in `new`.
        w.write_u8(self.child_ids.len() as u8)?;
        written += 2;
        for id in &self.child_ids {
            written += write_terminated(w, id)?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn body(frame: &dyn Frame) -> Vec<u8> {
        let mut out = Vec::new();
        let n = frame.write_to(&mut out).unwrap();
        assert_eq!(n, out.len());
        out
    }

    #[test]
    fn toc_layout_matches_chapter_frame_layout() {
        let toc = ChapterTocFrame::new("toc", true, true, vec!["chp0".into(), "chp1".into()]).unwrap();
        assert_eq!(body(&toc), b"toc\0\x03\x02chp0\0chp1\0".to_vec());
        assert_eq!(toc.size(), 16);
    }

    #[test]
    fn toc_with_no_children() {
        let toc = ChapterTocFrame::new("toc", false, true, vec![]).unwrap();
        assert_eq!(body(&toc), b"toc\0\x01\x00".to_vec());
        assert_eq!(toc.size(), 6);
    }

    #[test]
    fn toc_with_one_child() {
        let toc = ChapterTocFrame::new("toc", true, false, vec!["c".into()]).unwrap();
        assert_eq!(body(&toc), b"toc\0\x02\x01c\0".to_vec());
        assert_eq!(toc.size(), 8);
    }

    #[test]
    fn toc_rejects_more_than_255_children() {
        let ids: Vec<String> = (0..256).map(|i| format!("chp{i}")).collect();
        assert!(matches!(
            ChapterTocFrame::new("toc", true, true, ids),
            Err(TagError::TooManyEntries(256))
        ));

        let ids: Vec<String> = (0..255).map(|i| format!("chp{i}")).collect();
        assert!(ChapterTocFrame::new("toc", true, true, ids).is_ok());
    }

    #[test]
    fn element_ids_must_be_non_empty_without_nul() {
        assert!(ChapterTocFrame::new("", true, true, vec![]).is_err());
        assert!(ChapterTocFrame::new("toc", true, true, vec!["a\0b".into()]).is_err());
        assert!(ChapterFrame::new("", Duration::ZERO, Duration::ZERO, "t").is_err());
    }

    #[test]
    fn chapter_frame_layout() {
        let chap = ChapterFrame::new("chp0", Duration::from_secs(1), Duration::from_millis(2500), "Intro").unwrap();
        let bytes = body(&chap);

        let mut expected = b"chp0\0".to_vec();
        expected.extend_from_slice(&1000u32.to_be_bytes());
        expected.extend_from_slice(&2500u32.to_be_bytes());
        expected.extend_from_slice(&[0xff; 8]);
        expected.extend_from_slice(b"TIT2");
        expected.extend_from_slice(&[0, 0, 0, 6, 0, 0]);
        expected.extend_from_slice(b"\x03Intro");
        assert_eq!(bytes, expected);
        assert_eq!(chap.size(), bytes.len());
    }

    #[test]
    fn framed_write_prefixes_header() {
        let text = TextFrame::title("Grüße");
        let mut out = Vec::new();
        let n = text.write_framed(&mut out).unwrap();
        assert_eq!(n, out.len());
        assert_eq!(&out[..4], b"TIT2");
        assert_eq!(&out[4..8], &syncsafe(text.size()).unwrap());
        assert_eq!(&out[8..10], &[0, 0]);
        assert_eq!(n, text.framed_size());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn toc_size_matches_written_bytes(ids in proptest::collection::vec("[a-z0-9]{1,12}", 0..=255)) {
            let toc = ChapterTocFrame::new("toc", true, true, ids).unwrap();
            let mut out = Vec::new();
            let n = toc.write_to(&mut out).unwrap();
            prop_assert_eq!(toc.size(), n);
            prop_assert_eq!(n, out.len());
        }

        #[test]
        fn chapter_size_matches_written_bytes(title in "\\PC{0,40}", start in 0u64..10_000_000, len in 0u64..10_000_000) {
            let chap = ChapterFrame::new(
                "chp0",
                Duration::from_millis(start),
                Duration::from_millis(start + len),
                title,
            ).unwrap();
            let mut out = Vec::new();
            chap.write_to(&mut out).unwrap();
            prop_assert_eq!(chap.size(), out.len());
        }
    }
}
