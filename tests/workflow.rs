mod common;

use std::sync::Arc;

use chunkmill::common::error::{ErrorKind, PipelineError};
use chunkmill::modules::jobs::model::{JobRecord, JobStatus};
use chunkmill::modules::jobs::repository::JobStore;
use chunkmill::pipeline::{Operation, Workflow};
use common::{FakeEncoder, Harness, MemoryJobStore, RecordingNotifier};

struct Fixture {
    harness: Harness,
    jobs: Arc<MemoryJobStore>,
    notifier: Arc<RecordingNotifier>,
    workflow: Workflow,
}

fn fixture() -> Fixture {
    let harness = Harness::new(FakeEncoder::default());
    let jobs = Arc::new(MemoryJobStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = Workflow::new(
        harness.storage(),
        jobs.clone(),
        notifier.clone(),
        harness.settings.clone(),
    );
    Fixture {
        harness,
        jobs,
        notifier,
        workflow,
    }
}

async fn create_job(f: &Fixture, operations: Vec<Operation>, seconds: u32) -> JobRecord {
    let job = JobRecord::new(operations, "mov");
    f.jobs.put(&job).await.unwrap();
    f.jobs.add_connection(job.id, "conn-1").await.unwrap();
    f.harness.put_source(&job.source_key, seconds);
    job
}

#[tokio::test]
async fn resize_to_mp4_runs_every_chunk_through_the_filter() {
    let f = fixture();
    let job = create_job(
        &f,
        vec![
            Operation::new("resize", Some("640 360")),
            Operation::new("format", Some("mp4")),
        ],
        30,
    )
    .await;

    let outcome = f.workflow.run(job.id).await.unwrap();

    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.result_key, format!("{}/RESULT.mp4", job.id));
    assert_eq!(outcome.audio_key, None);

    let transforms: Vec<String> = f
        .harness
        .invocations()
        .into_iter()
        .filter(|line| line.contains("-vf"))
        .collect();
    assert_eq!(transforms.len(), 3);
    for line in &transforms {
        assert!(line.contains("-vf scale=640:360 "), "{line}");
        assert!(line.ends_with(".mp4"), "{line}");
    }

    let result = f.harness.store.read(&outcome.result_key).unwrap();
    assert_eq!(result, b"chunk-0|Tchunk-1|Tchunk-2|T");

    let stored = f.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.chunk_count, 3);
    assert_eq!(stored.result_key.as_deref(), Some(outcome.result_key.as_str()));

    let sent = f.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![("conn-1".to_string(), r#"{"msg":"Job succeeded."}"#.to_string())]);

    let keys = f.harness.store.keys();
    assert!(keys.iter().all(|k| !k.contains("/chunks/") && !k.contains("/processed/")), "{keys:?}");
    assert!(keys.contains(&job.source_key));
    assert!(!f.harness.settings.scratch_dir.join(job.id.to_string()).exists());
}

#[tokio::test]
async fn audio_is_extracted_next_to_the_result() {
    let f = fixture();
    let job = create_job(
        &f,
        vec![Operation::new("grayscale", None), Operation::new("exaudio", None)],
        20,
    )
    .await;

    let outcome = f.workflow.run(job.id).await.unwrap();

    let audio_key = format!("{}/AUDIO.aac", job.id);
    assert_eq!(outcome.audio_key.as_deref(), Some(audio_key.as_str()));
    assert_eq!(f.harness.store.read(&audio_key).unwrap(), b"audio");
    assert_eq!(outcome.result_key, format!("{}/RESULT.mov", job.id));
    assert!(f.harness.invocations().iter().any(|l| l.contains("-vn -c:a copy")));
}

#[tokio::test]
async fn oversized_crop_fails_with_the_source_message() {
    let f = fixture();
    let job = create_job(&f, vec![Operation::new("crop", Some("2000 100"))], 30).await;

    let err = f.workflow.run(job.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InputSource(_)));

    let stored = f.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let failure = stored.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::InputSource);

    let sent = f.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Crop dimensions and offsets are larger than video dimensions"));

    // Nothing was split, only the prober ran.
    assert!(f.harness.invocations().is_empty());
}

#[tokio::test]
async fn encoder_failure_reports_the_generic_hint() {
    let harness = Harness::new(FakeEncoder {
        split_exit: 1,
        split_fail_after: Some(0),
        ..FakeEncoder::default()
    });
    let jobs = Arc::new(MemoryJobStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = Workflow::new(
        harness.storage(),
        jobs.clone(),
        notifier.clone(),
        harness.settings.clone(),
    );
    let job = JobRecord::new(vec![Operation::new("sepia", None)], "mp4");
    jobs.put(&job).await.unwrap();
    jobs.add_connection(job.id, "c").await.unwrap();
    harness.put_source(&job.source_key, 30);

    let err = workflow.run(job.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Encode(_)));

    let sent = notifier.sent.lock().unwrap().clone();
    assert_eq!(
        sent[0].1,
        r#"{"msg":"Video processing failed due to an error. Please review your configuration settings."}"#
    );
}

#[tokio::test]
async fn unknown_job_fails_validation() {
    let f = fixture();
    let err = f.workflow.run(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn workflow_runs_on_a_spawned_task() {
    let f = fixture();
    let job = create_job(&f, vec![Operation::new("grayscale", None)], 20).await;
    let job_id = job.id;
    let workflow = f.workflow.clone();

    let outcome = tokio::spawn(async move { workflow.run(job_id).await })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.chunks, 2);
    let stored = f.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}
