//! Collaborator adapters: downloading, media processing, uploading.

mod downloader;
mod ffmpeg;
mod uploader;

pub use downloader::{CompositeDownloader, HttpDownloader, UrlNotSupported};
pub use ffmpeg::FfmpegMediaProcessor;
pub use uploader::HttpUploader;
