//! HTTP `PUT` uploader (pre-signed bucket URLs and similar).

use std::path::Path;

use anyhow::{Context, bail};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

use mediaflow_core::Uploader;

#[derive(Debug, Clone, Default)]
pub struct HttpUploader {
    client: reqwest::Client,
}

impl HttpUploader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Uploader for HttpUploader {
    #[instrument(skip(self, path), fields(path = %path.display()), err)]
    async fn upload(&self, path: &Path, url: &str) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let len = file.metadata().await?.len();

        debug!(bytes = len, "uploading");
        let response = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .context("failed sending request")?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        match response.text().await {
            Ok(body) => bail!("unexpected status code: {} (response body: {})", status.as_u16(), body),
            Err(e) => bail!(
                "unexpected status code: {} (failed to read response body: {})",
                status.as_u16(),
                e
            ),
        }
    }
}
