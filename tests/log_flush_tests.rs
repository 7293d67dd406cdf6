//! Drives one worker directly through a WorkerContext so the executor can
//! share the log multiplexer, proving chunks streamed during execution
//! end up as consolidated rows exactly once on the terminal transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln::admission::ResourceGate;
use kiln::config::ServiceConfig;
use kiln::executor::{ExecOutcome, ExecuteJob};
use kiln::job::{JobSpec, JobStatus, Submission};
use kiln::logs::{LogKind, LogMux};
use kiln::pubsub::PubSub;
use kiln::queue::{Claim, EnqueueOpts, JobQueue};
use kiln::retry::{RetryController, RetryPolicy};
use kiln::status::StatusPipeline;
use kiln::store::{JobRecord, JobStore, MemoryStore};
use kiln::worker::{run_worker, CancelRegistry, WorkerContext};
use tokio_util::sync::CancellationToken;

/// Emits a fixed set of chunks through the shared mux, then succeeds.
struct ChattyExecutor {
    logs: Arc<LogMux>,
    chunks: Vec<(LogKind, &'static str)>,
}

#[async_trait]
impl ExecuteJob for ChattyExecutor {
    async fn execute(&self, claim: &Claim, _cancel: CancellationToken) -> ExecOutcome {
        for (kind, chunk) in &self.chunks {
            self.logs.append(claim.job_id, *kind, chunk);
        }
        ExecOutcome::success(0)
    }
}

#[tokio::test]
async fn test_streamed_chunks_flushed_once_on_terminal() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let pubsub = PubSub::default();
    let queue = JobQueue::in_memory(Duration::from_secs(60));
    let (pipeline, _pipeline_handle) = StatusPipeline::start(store.clone(), pubsub.clone());
    let logs = Arc::new(LogMux::new(store.clone(), pubsub.clone(), 64));

    let executor = Arc::new(ChattyExecutor {
        logs: logs.clone(),
        chunks: vec![
            (LogKind::Stdout, "hi"),
            (LogKind::Stdout, "hi"),
            (LogKind::Stdout, "done"),
            (LogKind::Stderr, "warning: deprecated"),
        ],
    });

    let config = ServiceConfig::default();
    let ctx = WorkerContext {
        queue: queue.clone(),
        store: store.clone(),
        pipeline: pipeline.clone(),
        gate: Arc::new(ResourceGate::new(&config)),
        executor,
        logs: logs.clone(),
        retry: Arc::new(RetryController::new(
            queue.clone(),
            pipeline,
            RetryPolicy::new(config.retry_delays.clone()),
        )),
        cancels: CancelRegistry::new(),
        admission_retry_delay: Duration::from_millis(50),
        claim_heartbeat: Duration::from_secs(20),
    };

    let spec = JobSpec::new(
        Submission::RawCode {
            raw_code: "print('hi')".to_string(),
        },
        "python",
    );
    let job_id = queue.enqueue(spec.clone(), EnqueueOpts::with_retries(0)).await.unwrap();
    store.save_job(&JobRecord::new(job_id, spec)).await.unwrap();

    let stop = CancellationToken::new();
    let worker = tokio::spawn(run_worker(0, ctx, stop.clone()));

    // Wait until the job lands in the terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = store.get_job(job_id).await.unwrap().unwrap();
        if record.status == JobStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    stop.cancel();
    worker.await.unwrap();

    // The accumulator was flushed and destroyed by the worker.
    assert!(!logs.has_buffer(job_id));

    let rows = store.get_job_logs(job_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    let stdout = rows.iter().find(|r| r.kind == LogKind::Stdout).unwrap();
    // "hi" streamed twice but consolidated once.
    assert_eq!(stdout.content, "hi\ndone");
    let stderr = rows.iter().find(|r| r.kind == LogKind::Stderr).unwrap();
    assert_eq!(stderr.content, "warning: deprecated");
}
