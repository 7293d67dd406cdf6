//! Service bootstrapper and submission/query boundary.
//!
//! Owns every subsystem's lifetime: nothing in the crate is a global.
//! Startup order is store schema, admission and workspace root, pub/sub,
//! status pipeline, metrics collector, worker pool; the HTTP surface is a
//! collaborator that calls the methods here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::ResourceGate;
use crate::config::ServiceConfig;
use crate::error::{KilnError, Result};
use crate::executor::{ContainerExecutor, ExecuteJob};
use crate::job::{JobSpec, JobStatus};
use crate::logs::LogMux;
use crate::metrics::{self, WorkerGauge};
use crate::pubsub::PubSub;
use crate::queue::{
    DeadRecord, EnqueueOpts, JobId, JobQueue, QueueCounts, QueueEntry, QueueState,
};
use crate::retry::{RetryController, RetryPolicy};
use crate::runtime::RuntimeCatalog;
use crate::status::StatusPipeline;
use crate::store::{JobLogRecord, JobRecord, JobStatistics, JobStore};
use crate::worker::{CancelRegistry, WorkerContext, WorkerPool};
use crate::workspace::WorkspaceManager;

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Retry budget; `Some(0)` disables retry for this job.
    pub max_retries: Option<u32>,
    /// Initial delay before the job becomes claimable.
    pub delay: Duration,
}

/// Point-in-time view of a job for the query boundary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub spec: JobSpec,
    pub attempts_made: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl From<JobRecord> for JobSnapshot {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            spec: record.spec,
            attempts_made: record.attempts_made,
            start_time: record.start_time,
            end_time: record.end_time,
            duration_ms: record.duration_ms,
            exit_code: record.exit_code,
            error: record.error,
        }
    }
}

impl JobSnapshot {
    fn from_queue_entry(entry: QueueEntry) -> Self {
        let status = match entry.state {
            QueueState::Waiting => JobStatus::Waiting,
            QueueState::Delayed => JobStatus::Delayed,
            QueueState::Active => JobStatus::Active,
            QueueState::Completed => JobStatus::Completed,
            QueueState::Failed => JobStatus::Failed,
            QueueState::Dead => JobStatus::FailedPermanently,
        };
        Self {
            id: entry.job_id,
            status,
            spec: entry.spec,
            attempts_made: entry.attempts_made,
            start_time: None,
            end_time: None,
            duration_ms: None,
            exit_code: None,
            error: None,
        }
    }
}

/// The scheduling and execution engine, fully wired.
pub struct Service {
    config: ServiceConfig,
    catalog: Arc<RuntimeCatalog>,
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    pubsub: PubSub,
    pipeline: StatusPipeline,
    pipeline_handle: JoinHandle<()>,
    gate: Arc<ResourceGate>,
    pool: Arc<WorkerPool>,
    cancels: CancelRegistry,
    metrics_handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
}

impl Service {
    /// Start the full service with the container executor.
    pub async fn start(config: ServiceConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        Self::start_inner(config, store, None).await
    }

    /// Start with a caller-supplied executor. This is the seam the
    /// integration tests drive the pool through.
    pub async fn start_with_executor(
        config: ServiceConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn ExecuteJob>,
    ) -> Result<Self> {
        Self::start_inner(config, store, Some(executor)).await
    }

    async fn start_inner(
        config: ServiceConfig,
        store: Arc<dyn JobStore>,
        executor: Option<Arc<dyn ExecuteJob>>,
    ) -> Result<Self> {
        // Steps 1-3 fail closed: without a schema, workspace root, or
        // pipeline there is nothing safe to run.
        store.init_schema().await?;

        let gate = Arc::new(ResourceGate::new(&config));
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());
        workspaces.ensure_root().await?;

        let pubsub = PubSub::default();
        let (pipeline, pipeline_handle) = StatusPipeline::start(store.clone(), pubsub.clone());
        let logs = Arc::new(LogMux::new(
            store.clone(),
            pubsub.clone(),
            config.log_buffer_chunks,
        ));

        let catalog = Arc::new(RuntimeCatalog::builtin());
        let queue = JobQueue::in_memory(config.claim_visibility);
        let shutdown_token = CancellationToken::new();

        let gauge = WorkerGauge::default();
        let metrics_handle = metrics::spawn_collector(
            queue.clone(),
            gate.clone(),
            gauge.clone(),
            store.clone(),
            pubsub.clone(),
            config.metrics_interval,
            shutdown_token.child_token(),
        );

        let executor = executor.unwrap_or_else(|| {
            Arc::new(ContainerExecutor::new(
                catalog.clone(),
                workspaces.clone(),
                logs.clone(),
                config.container_prefix.clone(),
            ))
        });
        let retry = Arc::new(RetryController::new(
            queue.clone(),
            pipeline.clone(),
            RetryPolicy::new(config.retry_delays.clone()),
        ));
        let cancels = CancelRegistry::new();
        let ctx = WorkerContext {
            queue: queue.clone(),
            store: store.clone(),
            pipeline: pipeline.clone(),
            gate: gate.clone(),
            executor,
            logs,
            retry,
            cancels: cancels.clone(),
            admission_retry_delay: config.admission_retry_delay,
            claim_heartbeat: config.claim_visibility / 3,
        };
        let pool = WorkerPool::new(
            ctx,
            config.min_workers,
            config.max_workers,
            config.jobs_per_worker,
            config.scale_interval,
            gauge,
            shutdown_token.child_token(),
        );
        pool.clone().start().await;

        tracing::info!(
            workspace_root = %config.workspace_root.display(),
            max_containers = config.max_concurrent_containers,
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "Service started"
        );

        Ok(Self {
            config,
            catalog,
            store,
            queue,
            pubsub,
            pipeline,
            pipeline_handle,
            gate,
            pool,
            cancels,
            metrics_handle,
            shutdown_token,
        })
    }

    /// Validate and enqueue a submission. Returns the new job id.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        self.submit_with_options(spec, SubmitOptions::default()).await
    }

    pub async fn submit_with_options(
        &self,
        spec: JobSpec,
        opts: SubmitOptions,
    ) -> Result<JobId> {
        if self.shutdown_token.is_cancelled() {
            return Err(KilnError::ShuttingDown);
        }
        spec.validate(&self.catalog, self.config.timeout_cap_ms)?;

        let job_id = uuid::Uuid::new_v4();
        let kind = spec.submission.kind();
        let record = JobRecord::new(job_id, spec.clone());
        self.store.save_job(&record).await?;
        // The waiting event goes into the pipeline before the record is
        // claimable, so per-job status order starts at waiting.
        self.pipeline
            .publish(job_id, JobStatus::Waiting, None)
            .await?;

        self.queue
            .enqueue_with_id(
                job_id,
                spec,
                EnqueueOpts {
                    max_retries: opts.max_retries.unwrap_or(self.config.max_retries),
                    delay: opts.delay,
                },
            )
            .await?;

        tracing::info!(job_id = %job_id, submission = kind, "Job submitted");
        Ok(job_id)
    }

    /// Snapshot one job. The durable record is authoritative; jobs the
    /// store no longer knows fall back to the queue's view.
    pub async fn get(&self, job_id: JobId) -> Result<JobSnapshot> {
        if let Some(record) = self.store.get_job(job_id).await? {
            return Ok(record.into());
        }
        if let Some(entry) = self.queue.get(job_id).await? {
            return Ok(JobSnapshot::from_queue_entry(entry));
        }
        Err(KilnError::JobNotFound(job_id))
    }

    /// Jobs currently in any of `states`; all jobs when empty.
    pub async fn list(&self, states: &[JobStatus]) -> Result<Vec<JobSnapshot>> {
        let records = self.store.list_jobs(states).await?;
        Ok(records.into_iter().map(JobSnapshot::from).collect())
    }

    /// Consolidated durable logs for one job, in persistence order.
    pub async fn logs(&self, job_id: JobId) -> Result<Vec<JobLogRecord>> {
        self.store.get_job_logs(job_id).await
    }

    /// Cancel a job. Waiting and delayed jobs move straight to the dead
    /// queue; an active job's worker is signalled to kill the container.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let entry = self
            .queue
            .get(job_id)
            .await?
            .ok_or(KilnError::JobNotFound(job_id))?;
        match entry.state {
            QueueState::Waiting | QueueState::Delayed => {
                self.queue.move_to_dead(job_id, "cancelled").await?;
                self.pipeline
                    .commit(
                        job_id,
                        JobStatus::FailedPermanently,
                        Some(crate::store::JobOutcome::error("cancelled")),
                    )
                    .await?;
                tracing::info!(job_id = %job_id, "Cancelled queued job");
            }
            QueueState::Active => {
                if self.cancels.cancel(job_id) {
                    // The owning worker kills the container and records
                    // the cancelled outcome itself.
                    tracing::info!(job_id = %job_id, "Cancellation signalled");
                } else {
                    // Claimed but not yet executing. The cancel stays
                    // pending in the registry so the worker drops the
                    // claim; the outcome is recorded here, like the
                    // waiting and delayed arms.
                    self.queue.move_to_dead(job_id, "cancelled").await?;
                    self.pipeline
                        .commit(
                            job_id,
                            JobStatus::FailedPermanently,
                            Some(crate::store::JobOutcome::error("cancelled")),
                        )
                        .await?;
                    tracing::info!(job_id = %job_id, "Cancelled claimed job before execution");
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.queue.counts().await
    }

    pub async fn statistics(&self) -> Result<JobStatistics> {
        self.store.get_job_statistics().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadRecord>> {
        self.queue.dead_letters().await
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    pub fn resource_gate(&self) -> &Arc<ResourceGate> {
        &self.gate
    }

    pub async fn worker_count(&self) -> usize {
        self.pool.worker_count().await
    }

    /// Graceful shutdown: stop claiming, finish in-flight jobs within the
    /// grace period, then close the pipeline and collector.
    pub async fn shutdown(self) {
        tracing::info!("Service shutting down");
        let Service {
            config,
            pipeline,
            pipeline_handle,
            pool,
            metrics_handle,
            shutdown_token,
            ..
        } = self;

        shutdown_token.cancel();
        pool.shutdown(config.shutdown_grace).await;
        let _ = metrics_handle.await;

        // Dropping the last pipeline handles closes its channel; the
        // consumer drains whatever is still queued before exiting.
        drop(pool);
        drop(pipeline);
        if tokio::time::timeout(Duration::from_secs(5), pipeline_handle)
            .await
            .is_err()
        {
            tracing::warn!("Status pipeline did not drain in time");
        }
        tracing::info!("Service stopped");
    }
}
