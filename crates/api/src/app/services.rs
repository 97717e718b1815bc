//! Backend wiring: config → storage, queue, adapters → job service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use mediaflow_core::{Downloader, Storage};
use mediaflow_infra::{
    AppConfig, BackendKind, CompositeDownloader, FfmpegMediaProcessor, HttpDownloader, HttpUploader,
    InMemoryStorage, PostgresQueueBackend, PostgresStorage,
};
use mediaflow_queue::{InMemoryQueueBackend, JobQueue, LeasedQueue, QueueBackend, QueueConfig, QueueStats};
use mediaflow_service::{Collaborators, JobService, ServiceConfig};

type StatsFn = Arc<dyn Fn() -> QueueStats + Send + Sync>;

/// Everything the HTTP handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub jobs: JobService,
    queue_stats: StatsFn,
    /// How long `GET /metadata` waits before answering "accepted".
    pub metadata_wait: Duration,
}

impl AppServices {
    /// Wrap an already started service running on `queue`.
    pub fn new<B>(jobs: JobService, queue: LeasedQueue<B>, metadata_wait: Duration) -> Self
    where
        B: QueueBackend + 'static,
    {
        Self {
            jobs,
            queue_stats: Arc::new(move || queue.stats()),
            metadata_wait,
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        (self.queue_stats)()
    }
}

/// Connect the configured backends and start the job service.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let mut pool: Option<PgPool> = None;

    let storage: Arc<dyn Storage> = match config.storage_backend {
        BackendKind::Memory => InMemoryStorage::arc(),
        BackendKind::Postgres => {
            let storage = PostgresStorage::new(postgres(config, &mut pool).await?);
            storage.migrate().await?;
            Arc::new(storage)
        }
        BackendKind::Redis => redis_storage(config).await?,
    };
    info!(backend = %config.storage_backend, "storage ready");

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| format!("failed to create {}", config.download_dir.display()))?;

    let downloader = CompositeDownloader::new(vec![
        Arc::new(HttpDownloader::new(&config.download_dir)) as Arc<dyn Downloader>,
    ]);
    let deps = Collaborators::new(
        storage,
        Arc::new(downloader),
        Arc::new(FfmpegMediaProcessor::new(&config.download_dir)),
        Arc::new(HttpUploader::default()),
    )
    .with_config(ServiceConfig::default().with_metadata_timeout(config.metadata_timeout));

    let queue_config = config.queue.clone().with_name(format!("{}-queue", config.queue_backend));
    let services = match config.queue_backend {
        BackendKind::Memory => start(deps, InMemoryQueueBackend::new(), queue_config, config),
        BackendKind::Postgres => {
            let backend = PostgresQueueBackend::new(postgres(config, &mut pool).await?);
            backend.migrate().await?;
            start(deps, backend, queue_config, config)
        }
        BackendKind::Redis => redis_queue(deps, queue_config, config).await,
    }?;
    info!(backend = %config.queue_backend, concurrency = config.queue.concurrency, "queue ready");
    Ok(services)
}

fn start<B>(deps: Collaborators, backend: B, queue_config: QueueConfig, config: &AppConfig) -> anyhow::Result<AppServices>
where
    B: QueueBackend + 'static,
{
    let queue = LeasedQueue::new(backend, queue_config);
    let jobs = JobService::new(deps, Arc::new(queue.clone()) as Arc<dyn JobQueue>);
    jobs.start()?;
    Ok(AppServices::new(jobs, queue, config.metadata_wait))
}

/// One pool shared by every Postgres-backed component.
async fn postgres(config: &AppConfig, pool: &mut Option<PgPool>) -> anyhow::Result<PgPool> {
    if let Some(pool) = pool {
        return Ok(pool.clone());
    }
    let url = config.database_url.as_deref().context("DATABASE_URL is not set")?;
    let connected = PgPool::connect(url).await.context("failed to connect to Postgres")?;
    *pool = Some(connected.clone());
    Ok(connected)
}

#[cfg(feature = "redis")]
async fn redis_storage(config: &AppConfig) -> anyhow::Result<Arc<dyn Storage>> {
    let url = config.redis_url.as_deref().context("REDIS_URL is not set")?;
    let storage = mediaflow_infra::RedisStorage::connect(url, config.redis_key_prefix.clone()).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "redis"))]
async fn redis_storage(_config: &AppConfig) -> anyhow::Result<Arc<dyn Storage>> {
    anyhow::bail!("built without redis support")
}

#[cfg(feature = "redis")]
async fn redis_queue(deps: Collaborators, queue_config: QueueConfig, config: &AppConfig) -> anyhow::Result<AppServices> {
    let url = config.redis_url.as_deref().context("REDIS_URL is not set")?;
    let backend = mediaflow_infra::RedisStreamsQueueBackend::connect(url, config.redis_key_prefix.clone()).await?;
    info!(consumer = backend.consumer_name(), "redis streams consumer registered");
    start(deps, backend, queue_config, config)
}

#[cfg(not(feature = "redis"))]
async fn redis_queue(_deps: Collaborators, _queue_config: QueueConfig, _config: &AppConfig) -> anyhow::Result<AppServices> {
    anyhow::bail!("built without redis support")
}
