//! Stage deadlines.

use std::time::Duration;

/// Deadlines applied to individual collaborator calls.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Job record reads and writes.
    pub state_timeout: Duration,
    pub publish_timeout: Duration,
    pub download_timeout: Duration,
    pub probe_timeout: Duration,
    pub concatenate_timeout: Duration,
    pub tag_timeout: Duration,
    pub upload_timeout: Duration,
    /// Whole metadata lookup (cache read, downloader call, cache write).
    pub metadata_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            state_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(60 * 60),
            probe_timeout: Duration::from_secs(5 * 60),
            concatenate_timeout: Duration::from_secs(30 * 60),
            tag_timeout: Duration::from_secs(5 * 60),
            upload_timeout: Duration::from_secs(30 * 60),
            metadata_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl ServiceConfig {
    pub fn with_state_timeout(mut self, timeout: Duration) -> Self {
        self.state_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_concatenate_timeout(mut self, timeout: Duration) -> Self {
        self.concatenate_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }
}
