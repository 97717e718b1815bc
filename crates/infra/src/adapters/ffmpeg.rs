//! Media processing through the `ffmpeg`/`ffprobe` binaries.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::process::Command;
use tracing::debug;

use mediaflow_core::{Chapter, MediaInfo, MediaProcessor};

use crate::id3::{TAG_HEADER_LEN, chapter_tag, existing_tag_len};

const OUTPUT_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct FfmpegMediaProcessor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    work_dir: PathBuf,
}

impl Default for FfmpegMediaProcessor {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl FfmpegMediaProcessor {
    /// Outputs are written to `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    async fn duration(&self, path: &Path) -> anyhow::Result<Duration> {
        let output = run(
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-show_entries", "format=duration"])
                .args(["-of", "default=noprint_wrappers=1:nokey=1"])
                .arg(path),
        )
        .await
        .context("ffprobe failed")?;
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

async fn run(command: &mut Command) -> anyhow::Result<Output> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to spawn {:?}", command.as_std().get_program()))?;
    if !output.status.success() {
        bail!(
            "{:?} exited with {}: {}",
            command.as_std().get_program(),
            output.status,
            tail(&output.stderr)
        );
    }
    Ok(output)
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().rev().nth(OUTPUT_TAIL) {
        Some((at, _)) => format!("...{}", &text[at..]),
        None => text.to_string(),
    }
}

/// Parse ffprobe's bare `format=duration` output (seconds, fractional).
fn parse_duration(output: &str) -> anyhow::Result<Duration> {
    let trimmed = output.trim();
    let seconds: f64 = trimmed
        .parse()
        .with_context(|| format!("unexpected ffprobe duration {trimmed:?}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| anyhow!("invalid duration {seconds}"))
}

/// Rewrite `path` so it starts with `tag`, dropping any ID3v2 tag already there.
///
/// The audio is streamed into a sibling temp file that then replaces `path`.
fn replace_tag(path: &Path, tag: &[u8]) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut header = Vec::with_capacity(TAG_HEADER_LEN);
    (&mut reader).take(TAG_HEADER_LEN as u64).read_to_end(&mut header)?;
    reader.seek(SeekFrom::Start(existing_tag_len(&header)))?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(tag)?;
        std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait::async_trait]
impl MediaProcessor for FfmpegMediaProcessor {
    async fn concatenate(&self, inputs: &[PathBuf], audio_codec: &str) -> anyhow::Result<PathBuf> {
        let first = inputs.first().ok_or_else(|| anyhow!("no inputs to concatenate"))?;
        let ext = first
            .extension()
            .and_then(OsStr::to_str)
            .ok_or_else(|| anyhow!("first input {} has no extension", first.display()))?;

        let (_, output) = tempfile::Builder::new()
            .prefix("mediaflow-")
            .suffix(&format!(".{ext}"))
            .tempfile_in(&self.work_dir)
            .with_context(|| format!("failed to create output file in {}", self.work_dir.display()))?
            .keep()?;

        let joined = inputs
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("|");

        debug!(inputs = inputs.len(), codec = audio_codec, output = %output.display(), "running ffmpeg");
        let result = run(
            Command::new(&self.ffmpeg)
                .args(["-y", "-i"])
                .arg(format!("concat:{joined}"))
                .args(["-acodec", audio_codec])
                .arg(&output),
        )
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e.context("ffmpeg concatenation failed"));
        }
        Ok(output)
    }

    async fn get_info(&self, path: &Path) -> anyhow::Result<MediaInfo> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let duration = self.duration(path).await?;
        Ok(MediaInfo { duration, size_bytes })
    }

    async fn add_chapter_tags(&self, path: &Path, chapters: &[Chapter]) -> anyhow::Result<()> {
        let tag = chapter_tag(chapters)?.to_bytes()?;
        debug!(path = %path.display(), chapters = chapters.len(), tag_bytes = tag.len(), "writing chapter tags");

        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || replace_tag(&path, &tag)).await?
    }
}
