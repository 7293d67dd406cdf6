use std::time::Duration;

use rand::Rng;

use crate::error::Result;
use crate::job::JobStatus;
use crate::queue::{Claim, JobQueue};
use crate::status::StatusPipeline;
use crate::store::JobOutcome;

/// How an executor attempt failed. Timeouts keep their own status so the
/// DAG records them distinctly; both kinds are subject to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Error,
}

impl FailureKind {
    fn status(self) -> JobStatus {
        match self {
            FailureKind::Timeout => JobStatus::TimedOut,
            FailureKind::Error => JobStatus::Failed,
        }
    }
}

/// What the controller did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retried { delay: Duration },
    DeadLettered,
}

/// Bounded exponential backoff schedule, indexed by attempts made.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        assert!(!delays.is_empty(), "retry schedule must not be empty");
        Self { delays }
    }

    /// Delay before retry number `attempts_made + 1`, clamped to the last
    /// schedule entry, with up to 10% jitter to spread thundering herds.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let index = (attempts_made.saturating_sub(1) as usize).min(self.delays.len() - 1);
        let base = self.delays[index];
        let jitter = rand::thread_rng().gen_range(0.0..0.1);
        base + base.mul_f64(jitter)
    }
}

/// Applies the retry policy to failed attempts: re-enqueue with delay
/// while attempts remain, dead-letter when they are exhausted. This
/// controller is the only writer of attempt counts; queue-level retry
/// bookkeeping is not consulted.
pub struct RetryController {
    queue: JobQueue,
    pipeline: StatusPipeline,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(queue: JobQueue, pipeline: StatusPipeline, policy: RetryPolicy) -> Self {
        Self {
            queue,
            pipeline,
            policy,
        }
    }

    /// Handle a failed attempt. `attempts_made` counts this attempt.
    ///
    /// Errors out only when the durable status write cannot land; the
    /// caller must then leave the claim unacknowledged so the queue
    /// redelivers it.
    pub async fn handle_failure(
        &self,
        claim: &Claim,
        attempts_made: u32,
        kind: FailureKind,
        outcome: JobOutcome,
    ) -> Result<RetryDisposition> {
        let job_id = claim.job_id;
        self.pipeline
            .commit(job_id, kind.status(), Some(outcome.clone()))
            .await?;
        // The record sits in the failed set until the retry decision
        // moves it to delayed or dead.
        self.queue.fail(job_id).await?;

        if attempts_made <= claim.max_retries {
            let delay = self.policy.delay_for(attempts_made);
            self.pipeline
                .commit(job_id, JobStatus::Retrying, None)
                .await?;
            self.queue
                .move_to_delayed(job_id, delay, attempts_made)
                .await?;
            tracing::info!(job_id = %job_id, attempts_made, delay_ms = delay.as_millis() as u64,
                "Scheduling retry");
            Ok(RetryDisposition::Retried { delay })
        } else {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "retries exhausted".to_string());
            self.pipeline
                .commit(job_id, JobStatus::FailedPermanently, Some(outcome))
                .await?;
            self.queue.move_to_dead(job_id, reason).await?;
            tracing::warn!(job_id = %job_id, attempts_made, "Retries exhausted, dead-lettering");
            Ok(RetryDisposition::DeadLettered)
        }
    }
}
