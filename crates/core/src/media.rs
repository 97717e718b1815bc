//! Media facts produced by probing and chaptering.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Probe result for a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Duration,
    pub size_bytes: u64,
}

/// A titled time range inside a concatenated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start: Duration,
    pub end: Duration,
}

impl Chapter {
    pub fn new(title: impl Into<String>, start: Duration, end: Duration) -> Self {
        Self {
            title: title.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Lay chapters out back to back, one per `(title, duration)` pair.
///
/// Each chapter starts where the previous one ended; the first starts at zero.
/// Returns `None` when the running total does not fit in a `Duration`.
pub fn contiguous_chapters<I, S>(parts: I) -> Option<Vec<Chapter>>
where
    I: IntoIterator<Item = (S, Duration)>,
    S: Into<String>,
{
    let mut cursor = Duration::ZERO;
    parts
        .into_iter()
        .map(|(title, duration)| {
            let start = cursor;
            cursor = cursor.checked_add(duration)?;
            Some(Chapter::new(title, start, cursor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapters_are_laid_out_back_to_back() {
        let chapters = contiguous_chapters([
            ("one", Duration::from_secs(60)),
            ("two", Duration::from_secs(120)),
            ("three", Duration::from_secs(90)),
        ])
        .unwrap();

        let bounds: Vec<_> = chapters
            .iter()
            .map(|c| (c.start.as_secs(), c.end.as_secs()))
            .collect();
        assert_eq!(bounds, vec![(0, 60), (60, 180), (180, 270)]);
        assert_eq!(chapters[1].title, "two");
        assert_eq!(chapters[2].len(), Duration::from_secs(90));
    }

    #[test]
    fn no_parts_no_chapters() {
        let chapters = contiguous_chapters(Vec::<(String, Duration)>::new()).unwrap();
        assert!(chapters.is_empty());
    }

    #[test]
    fn overflowing_total_is_rejected() {
        assert_eq!(
            contiguous_chapters([("one", Duration::from_secs(1)), ("two", Duration::MAX)]),
            None
        );
        let single = contiguous_chapters([("only", Duration::MAX)]).unwrap();
        assert_eq!(single[0].end, Duration::MAX);
    }
}
