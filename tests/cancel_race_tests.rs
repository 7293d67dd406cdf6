//! Replays the cancel-vs-claim window: the queue marks a record active
//! the instant a worker pops it, but the worker only registers its
//! cancellation token a few steps later. A cancel landing in between
//! must still end with the job recorded as cancelled, never completed.

use std::sync::Arc;
use std::time::Duration;

use kiln::job::{JobSpec, JobStatus, Submission};
use kiln::pubsub::PubSub;
use kiln::queue::{EnqueueOpts, JobQueue, QueueState};
use kiln::status::StatusPipeline;
use kiln::store::{JobOutcome, JobRecord, JobStore, MemoryStore};
use kiln::worker::CancelRegistry;
use tokio_util::sync::CancellationToken;

fn spec() -> JobSpec {
    JobSpec::new(
        Submission::RawCode {
            raw_code: "print('hi')".to_string(),
        },
        "python",
    )
}

#[tokio::test]
async fn test_cancel_between_claim_and_registration() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let pubsub = PubSub::default();
    let queue = JobQueue::in_memory(Duration::from_millis(200));
    let (pipeline, _pipeline_handle) = StatusPipeline::start(store.clone(), pubsub.clone());
    let cancels = CancelRegistry::new();
    let shutdown = CancellationToken::new();

    let job_id = queue
        .enqueue(spec(), EnqueueOpts::with_retries(3))
        .await
        .unwrap();
    store.save_job(&JobRecord::new(job_id, spec())).await.unwrap();
    pipeline.publish(job_id, JobStatus::Waiting, None).await.unwrap();

    // A worker pops the claim; the backend record is now active even
    // though the worker has not registered a cancellation token yet.
    let claim = queue.claim(&shutdown).await.unwrap().unwrap();
    assert_eq!(claim.job_id, job_id);
    assert_eq!(
        queue.get(job_id).await.unwrap().unwrap().state,
        QueueState::Active
    );

    // The client cancel lands in that window: no token to fire, so the
    // cancel path records the outcome itself and leaves a pending marker.
    assert!(!cancels.cancel(job_id));
    queue.move_to_dead(job_id, "cancelled").await.unwrap();
    pipeline
        .commit(
            job_id,
            JobStatus::FailedPermanently,
            Some(JobOutcome::error("cancelled")),
        )
        .await
        .unwrap();

    // The worker reaches registration, observes the pending cancel, and
    // drops the claim without executing or writing a terminal status.
    let token = cancels.register(job_id);
    assert!(token.is_cancelled());
    cancels.unregister(job_id);

    // The record stays dead past the visibility timeout: no redelivery.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let recheck = CancellationToken::new();
    recheck.cancel();
    assert!(queue.claim(&recheck).await.unwrap().is_none());
    assert_eq!(
        queue.get(job_id).await.unwrap().unwrap().state,
        QueueState::Dead
    );
    assert_eq!(queue.dead_letters().await.unwrap().len(), 1);

    // The durable record reports the cancellation, not a completion.
    let record = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::FailedPermanently);
    assert_eq!(record.error.as_deref(), Some("cancelled"));
}
