mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use mediaflow_core::{DomainError, JobId, JobParams, JobStatus};
use mediaflow_queue::{InMemoryQueueBackend, JobQueue, LeasedQueue, QueueConfig};
use mediaflow_service::{JobService, PROCESS_JOB_TYPE, ServiceError, Submission};

use common::{Fixture, RecordingQueue, SOURCE_URL};

fn concat_params(variants: &[&str]) -> JobParams {
    JobParams::new(
        SOURCE_URL,
        "concatenate",
        json!({"variants": variants, "uploadUrl": "https://bucket.example/out.mp3"}),
    )
}

fn service_with_recording_queue(fixture: &Fixture) -> (JobService, Arc<RecordingQueue>) {
    let queue = Arc::new(RecordingQueue::default());
    (JobService::new(fixture.collaborators(), queue.clone()), queue)
}

#[tokio::test]
async fn create_job_is_deterministic_and_idempotent() {
    let fixture = Fixture::new();
    let (service, queue) = service_with_recording_queue(&fixture);

    let first = service.create_job(concat_params(&["01.mp3", "02.mp3"])).await.unwrap();
    let second = service.create_job(concat_params(&["01.mp3", "02.mp3"])).await.unwrap();

    assert!(first.is_new());
    assert!(matches!(second, Submission::Existing(_)));
    assert_eq!(first.job().id, second.job().id);
    assert_eq!(first.job().id, JobId::for_params(&concat_params(&["01.mp3", "02.mp3"])));
    assert_eq!(second.job().status, JobStatus::Created);

    let published = queue.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, PROCESS_JOB_TYPE);
    let payload: String = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(payload, first.job().id.as_str());

    assert_eq!(fixture.storage.job_writes.load(Ordering::SeqCst), 1);
    assert_eq!(service.stats().jobs_created, 1);
}

#[tokio::test]
async fn failed_publish_leaves_no_job_and_resubmission_enqueues_once() {
    let fixture = Fixture::new();
    let (service, queue) = service_with_recording_queue(&fixture);
    queue.failing_publishes.store(1, Ordering::SeqCst);

    let err = service.create_job(concat_params(&["01.mp3"])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Queue(_)));
    let id = JobId::for_params(&concat_params(&["01.mp3"]));
    assert_eq!(fixture.storage.job(&id), None);
    assert_eq!(fixture.storage.job_deletes.load(Ordering::SeqCst), 1);
    assert_eq!(service.stats().jobs_created, 0);

    let retried = service.create_job(concat_params(&["01.mp3"])).await.unwrap();
    assert!(retried.is_new());
    assert_eq!(retried.job().id, id);
    assert_eq!(queue.published().len(), 1);

    let again = service.create_job(concat_params(&["01.mp3"])).await.unwrap();
    assert!(matches!(again, Submission::Existing(_)));
    assert_eq!(queue.published().len(), 1);
    assert_eq!(service.stats().jobs_created, 1);
}

#[tokio::test]
async fn unsupported_type_fails_fast_without_side_effects() {
    let fixture = Fixture::new();
    let (service, queue) = service_with_recording_queue(&fixture);

    let err = service
        .create_job(JobParams::new(SOURCE_URL, "unsupported", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Validation(DomainError::UnsupportedJobType(ref t)) if t == "unsupported"
    ));
    assert!(err.is_client_error());
    assert_eq!(fixture.storage.job_writes.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.storage.job_count(), 0);
    assert!(queue.published().is_empty());
}

#[tokio::test]
async fn malformed_params_fail_fast_without_side_effects() {
    let fixture = Fixture::new();
    let (service, queue) = service_with_recording_queue(&fixture);

    let two_variants = JobParams::new(
        SOURCE_URL,
        "upload_original",
        json!({"variants": ["a.mp4", "b.mp4"], "uploadUrl": "https://bucket.example/a"}),
    );
    let err = service.create_job(two_variants).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(DomainError::Validation(_))));

    let no_variants = JobParams::new(SOURCE_URL, "concatenate", json!({"uploadUrl": "https://x"}));
    assert!(service.create_job(no_variants).await.is_err());

    assert_eq!(fixture.storage.job_count(), 0);
    assert!(queue.published().is_empty());
}

#[tokio::test]
async fn get_job_reads_through_to_storage() {
    let fixture = Fixture::new();
    let (service, _queue) = service_with_recording_queue(&fixture);

    let created = service.create_job(concat_params(&["01.mp3"])).await.unwrap().into_job();
    assert_eq!(service.get_job(&created.id).await.unwrap(), Some(created));

    let unknown: JobId = "deadbeef".parse().unwrap();
    assert_eq!(service.get_job(&unknown).await.unwrap(), None);
}

#[tokio::test]
async fn malformed_process_message_is_dropped() {
    let fixture = Fixture::new();
    let (service, _queue) = service_with_recording_queue(&fixture);

    service
        .on_published_job(b"not json", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fixture.downloader.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn message_for_missing_job_is_an_error() {
    let fixture = Fixture::new();
    let (service, _queue) = service_with_recording_queue(&fixture);

    let err = service
        .on_published_job(br#""deadbeef""#, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::JobNotFound(_)));
}

#[tokio::test]
async fn queued_job_runs_to_completion_after_a_failed_attempt() {
    let fixture = Fixture::new();
    fixture.downloader.failing_downloads.store(1, Ordering::SeqCst);

    let backend = InMemoryQueueBackend::arc();
    let queue = LeasedQueue::new(
        backend.clone(),
        QueueConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_redelivery_delay(Duration::from_millis(10)),
    );
    let service = JobService::new(fixture.collaborators(), Arc::new(queue.clone()));
    service.start().unwrap();

    let id = service
        .create_job(concat_params(&["01.mp3", "02.mp3"]))
        .await
        .unwrap()
        .into_job()
        .id;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = service.get_job(&id).await.unwrap().unwrap();
            if job.status == JobStatus::Complete && backend.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should complete after redelivery");
    service.stop().await;

    assert_eq!(fixture.downloader.downloads.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.uploader.uploads().len(), 1);
    let stats = service.stats();
    assert_eq!((stats.jobs_failed, stats.jobs_completed), (1, 1));
    assert_eq!(queue.stats().failed, 1);
}

#[tokio::test]
async fn concurrent_metadata_lookups_reach_downloader_once() {
    let fixture = Fixture::new();
    *fixture.downloader.metadata_delay.lock().unwrap() = Duration::from_millis(50);
    let (service, _queue) = service_with_recording_queue(&fixture);

    let lookups = (0..5).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.get_metadata(SOURCE_URL).await })
    });
    for lookup in lookups.collect::<Vec<_>>() {
        let metadata = lookup.await.unwrap().unwrap();
        assert_eq!(metadata.url, SOURCE_URL);
        assert_eq!(metadata.variants.len(), 2);
    }

    assert_eq!(fixture.downloader.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn metadata_lookup_rejects_unsupported_urls() {
    let fixture = Fixture::new();
    let (service, _queue) = service_with_recording_queue(&fixture);

    let err = service.get_metadata("ftp://nowhere/file").await.unwrap_err();
    assert!(matches!(err, ServiceError::UrlNotSupported(_)));
    assert!(err.is_client_error());
    assert_eq!(fixture.downloader.metadata_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn metadata_storage_read_failure_is_treated_as_a_miss() {
    let fixture = Fixture::new();
    fixture.storage.fail_metadata_reads.store(true, Ordering::SeqCst);
    let (service, _queue) = service_with_recording_queue(&fixture);

    service.get_metadata(SOURCE_URL).await.unwrap();
    service.get_metadata(SOURCE_URL).await.unwrap();
    assert_eq!(fixture.downloader.metadata_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn abandoned_metadata_wait_still_populates_cache() {
    let fixture = Fixture::new();
    *fixture.downloader.metadata_delay.lock().unwrap() = Duration::from_millis(50);
    let (service, _queue) = service_with_recording_queue(&fixture);

    let waited = tokio::time::timeout(Duration::from_millis(5), service.get_metadata(SOURCE_URL)).await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    *fixture.downloader.metadata_delay.lock().unwrap() = Duration::ZERO;
    service.get_metadata(SOURCE_URL).await.unwrap();
    assert_eq!(fixture.downloader.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_registers_process_handler() {
    let fixture = Fixture::new();
    let (service, queue) = service_with_recording_queue(&fixture);
    service.start().unwrap();
    assert!(queue.handlers.lock().unwrap().contains_key(PROCESS_JOB_TYPE));
    queue.shutdown().await;
}
