use std::io::Write;

use mediaflow_core::Chapter;

use super::frames::{ChapterFrame, ChapterTocFrame, Frame};
use super::{TagError, decode_syncsafe, syncsafe};

/// Bytes in an ID3v2 tag header, and in its optional footer.
pub const TAG_HEADER_LEN: usize = 10;
const FOOTER_FLAG: u8 = 0x10;

/// An ID3v2.4 tag: header followed by frames, no padding.
#[derive(Default)]
pub struct Tag {
    frames: Vec<Box<dyn Frame>>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: impl Frame + 'static) {
        self.frames.push(Box::new(frame));
    }

    pub fn frame_ids(&self) -> Vec<[u8; 4]> {
        self.frames.iter().map(|f| f.id()).collect()
    }

    /// Total size including the 10-byte tag header.
    pub fn size(&self) -> usize {
        TAG_HEADER_LEN + self.body_size()
    }

    fn body_size(&self) -> usize {
        self.frames.iter().map(|f| f.framed_size()).sum()
    }

    pub fn write_to(&self, w: &mut dyn Write) -> Result<usize, TagError> {
        w.write_all(b"ID3")?;
        w.write_all(&[4, 0, 0])?;
        w.write_all(&syncsafe(self.body_size())?)?;
        let mut written = TAG_HEADER_LEN;
        for frame in &self.frames {
            written += frame.write_framed(w)?;
        }
        Ok(written)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TagError> {
        let mut out = Vec::with_capacity(self.size());
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Tag with one `CHAP` per chapter (`chp0`, `chp1`, ...) and a top-level,
/// ordered `CTOC` named `toc` listing those ids in the same order.
pub fn chapter_tag(chapters: &[Chapter]) -> Result<Tag, TagError> {
    let mut tag = Tag::new();
    let mut child_ids = Vec::with_capacity(chapters.len());

    for (i, chapter) in chapters.iter().enumerate() {
        let element_id = format!("chp{i}");
        tag.push(ChapterFrame::new(
            element_id.clone(),
            chapter.start,
            chapter.end,
            chapter.title.clone(),
        )?);
        child_ids.push(element_id);
    }

    tag.push(ChapterTocFrame::new("toc", true, true, child_ids)?);
    Ok(tag)
}

/// Length of the ID3v2 tag (header, body, footer) announced by the header
/// at the start of `header`, or 0 when there is none.
///
/// Only the first `TAG_HEADER_LEN` bytes are read, so callers can pass just
/// the header of a file they stream.
pub fn existing_tag_len(header: &[u8]) -> u64 {
    if header.len() < TAG_HEADER_LEN || &header[..3] != b"ID3" {
        return 0;
    }
    let size = u64::from(decode_syncsafe([header[6], header[7], header[8], header[9]]));
    let footer = if header[5] & FOOTER_FLAG != 0 { TAG_HEADER_LEN as u64 } else { 0 };
    TAG_HEADER_LEN as u64 + size + footer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chapters() -> Vec<Chapter> {
        vec![
            Chapter::new("One", Duration::ZERO, Duration::from_secs(60)),
            Chapter::new("Two", Duration::from_secs(60), Duration::from_secs(180)),
        ]
    }

    #[test]
    fn chapter_tag_references_chap_ids_in_order() {
        let tag = chapter_tag(&chapters()).unwrap();
        assert_eq!(tag.frame_ids(), vec![*b"CHAP", *b"CHAP", *b"CTOC"]);

        let bytes = tag.to_bytes().unwrap();
        let toc_at = bytes.windows(4).position(|w| w == b"CTOC").unwrap();
        assert_eq!(&bytes[toc_at + 10..], b"toc\0\x03\x02chp0\0chp1\0");
    }

    #[test]
    fn header_carries_body_size() {
        let tag = chapter_tag(&chapters()).unwrap();
        let bytes = tag.to_bytes().unwrap();
        assert_eq!(bytes.len(), tag.size());
        assert_eq!(&bytes[..6], b"ID3\x04\x00\x00");
        assert_eq!(
            decode_syncsafe([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize,
            bytes.len() - TAG_HEADER_LEN
        );
        assert_eq!(existing_tag_len(&bytes), bytes.len() as u64);
    }

    #[test]
    fn empty_chapter_list_still_writes_toc() {
        let tag = chapter_tag(&[]).unwrap();
        assert_eq!(tag.frame_ids(), vec![*b"CTOC"]);
    }

    #[test]
    fn existing_tag_len_handles_untagged_and_footer() {
        assert_eq!(existing_tag_len(b"\xff\xfb\x90\x00 mpeg frame"), 0);
        assert_eq!(existing_tag_len(b"ID3"), 0);

        let mut tagged = b"ID3\x04\x00\x10".to_vec();
        tagged.extend_from_slice(&syncsafe(4).unwrap());
        tagged.extend_from_slice(b"body3DI\x04\x00\x10\x00\x00\x00\x04audio");
        assert_eq!(existing_tag_len(&tagged), 24);
        assert_eq!(&tagged[24..], b"audio");
        assert_eq!(existing_tag_len(&tagged[..TAG_HEADER_LEN]), 24);
    }
}
