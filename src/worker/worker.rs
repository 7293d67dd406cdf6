use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::admission::ResourceGate;
use crate::error::Result;
use crate::executor::{ExecOutcome, ExecStatus, ExecuteJob};
use crate::job::JobStatus;
use crate::logs::LogMux;
use crate::queue::{Claim, JobQueue};
use crate::retry::{FailureKind, RetryController};
use crate::status::StatusPipeline;
use crate::store::{JobOutcome, JobStore};
use crate::worker::CancelRegistry;

/// Shared dependencies every worker runs against.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: JobQueue,
    pub store: Arc<dyn JobStore>,
    pub pipeline: StatusPipeline,
    pub gate: Arc<ResourceGate>,
    pub executor: Arc<dyn ExecuteJob>,
    pub logs: Arc<LogMux>,
    pub retry: Arc<RetryController>,
    pub cancels: CancelRegistry,
    /// Re-enqueue delay when the admission gate denies a claim.
    pub admission_retry_delay: Duration,
    /// Interval for extending the queue claim while a job executes.
    pub claim_heartbeat: Duration,
}

/// One worker's claim-execute loop. Runs until `stop` is cancelled;
/// an in-flight job is always finished before the loop exits.
pub async fn run_worker(worker_id: usize, ctx: WorkerContext, stop: CancellationToken) {
    tracing::info!(worker_id, "Worker started");
    loop {
        let claim = match ctx.queue.claim(&stop).await {
            Ok(Some(claim)) => claim,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Claim failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        let job_id = claim.job_id;
        if let Err(e) = process_claim(worker_id, &ctx, claim).await {
            tracing::error!(worker_id, job_id = %job_id, error = %e, "Job processing failed");
        }
    }
    tracing::info!(worker_id, "Worker stopped");
}

async fn process_claim(worker_id: usize, ctx: &WorkerContext, claim: Claim) -> Result<()> {
    let job_id = claim.job_id;

    // Registered first thing, so a cancel racing this claim always either
    // finds the token or left a pending marker the token reflects.
    let cancel = ctx.cancels.register(job_id);
    if cancel.is_cancelled() {
        // Cancelled between the queue claim and registration; the cancel
        // path has already dead-lettered the record and recorded the
        // cancelled outcome, so this claim is simply dropped.
        tracing::info!(worker_id, job_id = %job_id, "Claim was cancelled before execution");
        ctx.cancels.unregister(job_id);
        return Ok(());
    }

    // Admission comes before the job is marked active: a denied claim
    // goes back to the delayed set and does not consume an attempt.
    let Some(permit) = ctx.gate.clone().try_admit() else {
        tracing::debug!(worker_id, job_id = %job_id, "Admission denied, delaying");
        // The delayed event goes out while the token is still registered:
        // any cancel ordered after it is observed below or left pending,
        // so its terminal write cannot be overwritten.
        if let Err(e) = ctx.pipeline.publish(job_id, JobStatus::Delayed, None).await {
            ctx.cancels.unregister(job_id);
            return Err(e);
        }
        ctx.cancels.unregister(job_id);
        if cancel.is_cancelled() {
            // The cancel fired while this worker held the token, so the
            // outcome is recorded here before the claim is given up.
            ctx.pipeline
                .commit(
                    job_id,
                    JobStatus::FailedPermanently,
                    Some(JobOutcome::error("cancelled")),
                )
                .await?;
            ctx.queue.move_to_dead(job_id, "cancelled").await?;
            return Ok(());
        }
        ctx.queue
            .move_to_delayed(job_id, ctx.admission_retry_delay, claim.attempts_made)
            .await?;
        return Ok(());
    };

    let attempt = claim.attempts_made + 1;
    tracing::info!(worker_id, job_id = %job_id, attempt, "Executing job");

    if let Err(e) = mark_active(ctx, job_id, attempt).await {
        ctx.cancels.unregister(job_id);
        return Err(e);
    }

    let heartbeat = spawn_claim_heartbeat(ctx.queue.clone(), job_id, ctx.claim_heartbeat);

    let outcome = ctx.executor.execute(&claim, cancel).await;

    heartbeat.abort();

    // Flush before the terminal write so the consolidated rows exist by
    // the time subscribers observe the terminal status.
    ctx.logs.flush(job_id).await;

    let result = finish_claim(ctx, &claim, attempt, outcome).await;

    // Unregistered only after the terminal status is written, so a late
    // cancel finds the token instead of leaving a stale pending marker.
    ctx.cancels.unregister(job_id);
    drop(permit);
    result
}

/// Record the attempt's outcome: acknowledge success, hand failures to
/// the retry controller, dead-letter cancellations.
async fn finish_claim(
    ctx: &WorkerContext,
    claim: &Claim,
    attempt: u32,
    outcome: ExecOutcome,
) -> Result<()> {
    let job_id = claim.job_id;
    match outcome.status {
        ExecStatus::Success => {
            let result = JobOutcome {
                exit_code: outcome.exit_code.or(Some(0)),
                error: None,
            };
            match ctx
                .pipeline
                .commit(job_id, JobStatus::Completed, Some(result))
                .await
            {
                Ok(()) => ctx.queue.complete(job_id).await?,
                Err(e) => {
                    // Leave the claim unacknowledged; the visibility
                    // timeout will redeliver it once the store is back.
                    tracing::error!(job_id = %job_id, error = %e,
                        "Terminal write failed, surrendering claim");
                }
            }
        }
        ExecStatus::Timeout | ExecStatus::Error => {
            let kind = match outcome.status {
                ExecStatus::Timeout => FailureKind::Timeout,
                _ => FailureKind::Error,
            };
            let result = JobOutcome {
                exit_code: outcome.exit_code,
                error: outcome.error.clone(),
            };
            if let Err(e) = ctx.retry.handle_failure(claim, attempt, kind, result).await {
                tracing::error!(job_id = %job_id, error = %e,
                    "Retry handling failed, surrendering claim");
            }
        }
        ExecStatus::Cancelled => {
            let result = JobOutcome::error("cancelled");
            ctx.pipeline
                .commit(job_id, JobStatus::Failed, Some(result.clone()))
                .await?;
            ctx.pipeline
                .commit(job_id, JobStatus::FailedPermanently, Some(result))
                .await?;
            ctx.queue.move_to_dead(job_id, "cancelled").await?;
        }
    }
    Ok(())
}

/// Delayed and retrying records pass back through waiting before turning
/// active; the pipeline dedups the waiting event on a fresh submission.
async fn mark_active(ctx: &WorkerContext, job_id: crate::queue::JobId, attempt: u32) -> Result<()> {
    ctx.pipeline.publish(job_id, JobStatus::Waiting, None).await?;
    if let Err(e) = ctx.store.record_attempt(job_id, attempt).await {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to record attempt count");
    }
    ctx.pipeline.publish(job_id, JobStatus::Active, None).await
}

/// Keep the claim visible as ours while the container runs; without this
/// a long job would be redelivered mid-flight.
fn spawn_claim_heartbeat(
    queue: JobQueue,
    job_id: crate::queue::JobId,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = queue.extend_claim(job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to extend claim");
            }
        }
    })
}
