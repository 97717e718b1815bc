//! Downloaders: a composite that dispatches by URL, and a plain HTTP one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use mediaflow_core::{Downloader, Metadata, Variant};

/// No registered downloader accepts the URL.
#[derive(Debug, thiserror::Error)]
#[error("url not supported: {0}")]
pub struct UrlNotSupported(pub String);

/// Dispatches every call to the first downloader that accepts the URL.
#[derive(Clone, Default)]
pub struct CompositeDownloader {
    downloaders: Vec<Arc<dyn Downloader>>,
}

impl CompositeDownloader {
    pub fn new(downloaders: Vec<Arc<dyn Downloader>>) -> Self {
        Self { downloaders }
    }

    pub fn with(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloaders.push(downloader);
        self
    }

    fn select(&self, url: &str) -> anyhow::Result<&Arc<dyn Downloader>> {
        self.downloaders
            .iter()
            .find(|d| d.accepts_url(url))
            .ok_or_else(|| anyhow!(UrlNotSupported(url.to_string())))
    }
}

#[async_trait::async_trait]
impl Downloader for CompositeDownloader {
    fn accepts_url(&self, url: &str) -> bool {
        self.downloaders.iter().any(|d| d.accepts_url(url))
    }

    async fn get_metadata(&self, url: &str) -> anyhow::Result<Metadata> {
        self.select(url)?.get_metadata(url).await
    }

    async fn download(&self, url: &str, variants: &[String]) -> anyhow::Result<HashMap<String, PathBuf>> {
        self.select(url)?.download(url, variants).await
    }
}

/// Downloads a single file over HTTP(S).
///
/// The source has exactly one variant, named after the last path segment
/// of the URL.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl HttpDownloader {
    pub const NAME: &'static str = "http";

    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            download_dir: download_dir.into(),
        }
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> anyhow::Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("reading body of {url}"))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Last non-empty path segment of `url`, or its host.
fn file_name(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "download".to_string())
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    fn accepts_url(&self, url: &str) -> bool {
        reqwest::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
    }

    async fn get_metadata(&self, url: &str) -> anyhow::Result<Metadata> {
        let parsed = reqwest::Url::parse(url)?;
        let name = file_name(&parsed);

        let response = self
            .client
            .head(parsed)
            .send()
            .await
            .with_context(|| format!("HEAD {url}"))?
            .error_for_status()?;

        let mut variant = Variant::new(name.clone());
        if let Some(len) = response.content_length() {
            variant = variant.with_length(len);
        }

        Ok(Metadata {
            url: url.to_string(),
            name,
            variants: vec![variant],
            allow_multiple_variants: false,
            downloader_name: Self::NAME.to_string(),
        })
    }

    async fn download(&self, url: &str, variants: &[String]) -> anyhow::Result<HashMap<String, PathBuf>> {
        let name = file_name(&reqwest::Url::parse(url)?);
        if let Some(unknown) = variants.iter().find(|v| **v != name) {
            bail!("unknown variant {unknown:?} for {url}, only {name:?} is available");
        }

        let dir = self.download_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let dest = dir.join(&name);

        debug!(url, dest = %dest.display(), "downloading");
        let bytes = self.fetch_to(url, &dest).await?;
        info!(url, dest = %dest.display(), bytes, "download finished");

        Ok(variants.iter().map(|v| (v.clone(), dest.clone())).collect())
    }
}
