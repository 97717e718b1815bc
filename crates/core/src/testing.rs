//! Behaviour every `Storage` implementation must share.
//!
//! Records are keyed under `namespace` so durable backends can run the
//! checks repeatedly against the same database.

use std::time::Duration;

use serde_json::json;

use crate::job::{Job, JobParams, JobStatus};
use crate::metadata::{Metadata, Variant};
use crate::ports::Storage;

fn job(namespace: &str, label: &str) -> Job {
    Job::new(JobParams::new(
        format!("https://contract.test/{namespace}/{label}"),
        "upload_original",
        json!({ "variant": "01.mp3", "uploadUrl": "https://bucket.test/out" }),
    ))
}

fn metadata(namespace: &str, name: &str) -> Metadata {
    Metadata {
        url: format!("magnet:?xt=urn:btih:{namespace}"),
        name: name.to_string(),
        variants: vec![Variant::new("01.mp3").with_length(42), Variant::new("02.mp3")],
        allow_multiple_variants: true,
        downloader_name: "contract".to_string(),
    }
}

/// Run every contract check against `storage`.
pub async fn run_storage_contract<S: Storage>(storage: &S, namespace: &str) {
    missing_records_are_none(storage, namespace).await;
    jobs_round_trip_and_overwrite(storage, namespace).await;
    deleted_job_is_gone(storage, namespace).await;
    metadata_round_trips_and_overwrites(storage, namespace).await;
}

pub async fn missing_records_are_none<S: Storage>(storage: &S, namespace: &str) {
    let never_saved = job(namespace, "missing");
    assert_eq!(storage.get_job(&never_saved.id).await.unwrap(), None);
    assert_eq!(
        storage.get_metadata(&format!("magnet:?xt=urn:btih:{namespace}-missing")).await.unwrap(),
        None
    );
}

pub async fn jobs_round_trip_and_overwrite<S: Storage>(storage: &S, namespace: &str) {
    let mut job = job(namespace, "round-trip");
    storage.save_job(&job).await.unwrap();
    assert_eq!(storage.get_job(&job.id).await.unwrap(), Some(job.clone()));

    job.status = JobStatus::Complete;
    job.result_media_duration = Some(Duration::from_millis(270_500));
    job.result_file_bytes = Some(4_320_000);
    storage.save_job(&job).await.unwrap();
    assert_eq!(storage.get_job(&job.id).await.unwrap(), Some(job));
}

pub async fn deleted_job_is_gone<S: Storage>(storage: &S, namespace: &str) {
    let job = job(namespace, "deleted");
    storage.save_job(&job).await.unwrap();
    storage.delete_job(&job.id).await.unwrap();
    assert_eq!(storage.get_job(&job.id).await.unwrap(), None);

    storage.delete_job(&job.id).await.unwrap();
}

pub async fn metadata_round_trips_and_overwrites<S: Storage>(storage: &S, namespace: &str) {
    let first = metadata(namespace, "Album");
    storage.save_metadata(&first).await.unwrap();
    assert_eq!(storage.get_metadata(&first.url).await.unwrap(), Some(first.clone()));

    let renamed = metadata(namespace, "Album (remastered)");
    storage.save_metadata(&renamed).await.unwrap();
    assert_eq!(storage.get_metadata(&first.url).await.unwrap(), Some(renamed));
}
