use std::sync::Arc;
use std::time::Duration;

use kiln::job::{JobSpec, JobStatus, Submission};
use kiln::pubsub::PubSub;
use kiln::status::StatusPipeline;
use kiln::store::{JobOutcome, JobRecord, JobStore, MemoryStore};
use uuid::Uuid;

fn spec() -> JobSpec {
    JobSpec::new(
        Submission::RawCode {
            raw_code: "print('hi')".to_string(),
        },
        "python",
    )
}

async fn seeded() -> (Arc<MemoryStore>, PubSub, StatusPipeline, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let pubsub = PubSub::default();
    let job_id = Uuid::new_v4();
    store
        .save_job(&JobRecord::new(job_id, spec()))
        .await
        .unwrap();
    let (pipeline, _handle) = StatusPipeline::start(store.clone(), pubsub.clone());
    (store, pubsub, pipeline, job_id)
}

#[tokio::test]
async fn test_transitions_applied_in_order() {
    let (store, pubsub, pipeline, job_id) = seeded().await;
    let mut rx = pubsub.subscribe_status();

    pipeline.publish(job_id, JobStatus::Waiting, None).await.unwrap();
    pipeline.publish(job_id, JobStatus::Active, None).await.unwrap();
    pipeline
        .commit(job_id, JobStatus::Completed, Some(JobOutcome::exit(0)))
        .await
        .unwrap();

    let record = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.exit_code, Some(0));
    assert!(record.start_time.is_some());
    assert!(record.end_time.unwrap() >= record.start_time.unwrap());

    let seen: Vec<JobStatus> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.status)
        .collect();
    assert_eq!(
        seen,
        vec![JobStatus::Waiting, JobStatus::Active, JobStatus::Completed]
    );
}

#[tokio::test]
async fn test_replaying_same_status_is_noop() {
    let (store, pubsub, pipeline, job_id) = seeded().await;
    let mut rx = pubsub.subscribe_status();

    pipeline.publish(job_id, JobStatus::Waiting, None).await.unwrap();
    pipeline.publish(job_id, JobStatus::Active, None).await.unwrap();
    // Replay; must neither rewrite the store nor republish.
    pipeline.commit(job_id, JobStatus::Active, None).await.unwrap();

    let record = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Active);

    let seen: Vec<JobStatus> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.status)
        .collect();
    assert_eq!(seen, vec![JobStatus::Waiting, JobStatus::Active]);
}

#[tokio::test]
async fn test_illegal_transition_dropped() {
    let (store, pubsub, pipeline, job_id) = seeded().await;
    let mut rx = pubsub.subscribe_status();

    pipeline.publish(job_id, JobStatus::Waiting, None).await.unwrap();
    // waiting -> completed skips active and violates the DAG.
    pipeline
        .commit(job_id, JobStatus::Completed, Some(JobOutcome::exit(0)))
        .await
        .unwrap();

    let record = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Waiting);

    let seen: Vec<JobStatus> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.status)
        .collect();
    assert_eq!(seen, vec![JobStatus::Waiting]);
}

#[tokio::test]
async fn test_retry_cycle_transitions() {
    let (store, _pubsub, pipeline, job_id) = seeded().await;

    for status in [
        JobStatus::Waiting,
        JobStatus::Active,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::Waiting,
        JobStatus::Active,
    ] {
        pipeline.publish(job_id, status, None).await.unwrap();
    }
    pipeline
        .commit(job_id, JobStatus::Completed, Some(JobOutcome::exit(0)))
        .await
        .unwrap();

    let record = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_duration_derived_from_timestamps() {
    let (store, _pubsub, pipeline, job_id) = seeded().await;

    pipeline.publish(job_id, JobStatus::Waiting, None).await.unwrap();
    pipeline.publish(job_id, JobStatus::Active, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    pipeline
        .commit(job_id, JobStatus::Completed, Some(JobOutcome::exit(0)))
        .await
        .unwrap();

    let record = store.get_job(job_id).await.unwrap().unwrap();
    let duration = record.duration_ms.unwrap();
    assert!(duration >= 0);
    let wall = (record.end_time.unwrap() - record.start_time.unwrap()).num_milliseconds();
    assert_eq!(duration, wall);
}

#[tokio::test]
async fn test_status_dag_rules() {
    use JobStatus::*;

    assert!(Waiting.can_transition(Active));
    assert!(Waiting.can_transition(Delayed));
    assert!(Waiting.can_transition(FailedPermanently));
    assert!(Delayed.can_transition(Waiting));
    assert!(Delayed.can_transition(FailedPermanently));
    assert!(Active.can_transition(Completed));
    assert!(Active.can_transition(Failed));
    assert!(Active.can_transition(TimedOut));
    assert!(Failed.can_transition(Retrying));
    assert!(TimedOut.can_transition(Retrying));
    assert!(Retrying.can_transition(Waiting));

    assert!(!Completed.can_transition(Active));
    assert!(!FailedPermanently.can_transition(Waiting));
    assert!(!Active.can_transition(Delayed));
    assert!(!Waiting.can_transition(Completed));
    assert!(Completed.is_terminal());
    assert!(FailedPermanently.is_terminal());
    assert!(!Failed.is_terminal());
}
