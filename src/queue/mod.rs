//! Durable work queue client.
//!
//! The queue hands out exclusive claims with at-least-once delivery: a
//! claim that is neither completed nor failed before its visibility
//! deadline is redelivered to another worker. The backing store is behind
//! [`QueueBackend`] so deployments can swap the bundled in-memory backend
//! for a networked one without touching the workers.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::job::JobSpec;

pub use memory::MemoryQueue;

pub type JobId = Uuid;

/// Queue-level state of a record. Distinct from the job lifecycle status:
/// this only tracks which set the record currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    Dead,
}

#[derive(Debug, Clone)]
pub struct EnqueueOpts {
    /// Retries granted on executor failure. Zero disables retry entirely.
    pub max_retries: u32,
    /// Initial delay; a positive value lands the record in the delayed set.
    pub delay: Duration,
}

impl EnqueueOpts {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }
}

/// An exclusive claim on one job. Valid until completed, failed, delayed,
/// or the visibility deadline passes.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job_id: JobId,
    pub spec: JobSpec,
    /// Attempts already finished before this claim.
    pub attempts_made: u32,
    pub max_retries: u32,
}

/// Point-in-time view of a queue record, for the query boundary.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub state: QueueState,
    pub attempts_made: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub dead: usize,
}

impl QueueCounts {
    /// Depth the scaler sizes the pool against.
    pub fn backlog(&self) -> usize {
        self.waiting + self.delayed
    }
}

/// A record that exhausted its retries, preserved with its original payload.
#[derive(Debug, Clone)]
pub struct DeadRecord {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub reason: String,
    pub attempts_made: u32,
    pub moved_at: DateTime<Utc>,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, job_id: JobId, spec: JobSpec, opts: EnqueueOpts) -> Result<()>;

    /// Claim the next waiting record, blocking until one is available or
    /// the token is cancelled. Returns `None` only on cancellation.
    async fn claim(&self, shutdown: &CancellationToken) -> Result<Option<Claim>>;

    /// Push the visibility deadline of an active claim forward.
    async fn extend_claim(&self, job_id: JobId) -> Result<()>;

    /// Acknowledge successful processing.
    async fn complete(&self, job_id: JobId) -> Result<()>;

    /// Acknowledge failed processing without scheduling a retry.
    async fn fail(&self, job_id: JobId) -> Result<()>;

    /// Return a record to the delayed set, to reappear after `delay`.
    /// `attempts_made` replaces the stored attempt metadata.
    async fn move_to_delayed(&self, job_id: JobId, delay: Duration, attempts_made: u32)
        -> Result<()>;

    /// Move a record to the dead-letter queue, preserving its payload.
    async fn move_to_dead(&self, job_id: JobId, reason: String) -> Result<()>;

    /// Remove a record from whatever set holds it. Idempotent; returns
    /// whether anything was removed.
    async fn remove(&self, job_id: JobId) -> Result<bool>;

    async fn get(&self, job_id: JobId) -> Result<Option<QueueEntry>>;

    async fn counts(&self) -> Result<QueueCounts>;

    async fn dead_letters(&self) -> Result<Vec<DeadRecord>>;
}

/// Client handle over a queue backend. Generates job ids at enqueue time
/// and is cheap to clone into every worker.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory(claim_visibility: Duration) -> Self {
        Self::new(Arc::new(MemoryQueue::new(claim_visibility)))
    }

    pub async fn enqueue(&self, spec: JobSpec, opts: EnqueueOpts) -> Result<JobId> {
        let job_id = Uuid::new_v4();
        self.backend.enqueue(job_id, spec, opts).await?;
        Ok(job_id)
    }

    /// Re-insert an existing record id, used by tests that need stable ids.
    pub async fn enqueue_with_id(
        &self,
        job_id: JobId,
        spec: JobSpec,
        opts: EnqueueOpts,
    ) -> Result<()> {
        self.backend.enqueue(job_id, spec, opts).await
    }

    pub async fn claim(&self, shutdown: &CancellationToken) -> Result<Option<Claim>> {
        self.backend.claim(shutdown).await
    }

    pub async fn extend_claim(&self, job_id: JobId) -> Result<()> {
        self.backend.extend_claim(job_id).await
    }

    pub async fn complete(&self, job_id: JobId) -> Result<()> {
        self.backend.complete(job_id).await
    }

    pub async fn fail(&self, job_id: JobId) -> Result<()> {
        self.backend.fail(job_id).await
    }

    pub async fn move_to_delayed(
        &self,
        job_id: JobId,
        delay: Duration,
        attempts_made: u32,
    ) -> Result<()> {
        self.backend.move_to_delayed(job_id, delay, attempts_made).await
    }

    pub async fn move_to_dead(&self, job_id: JobId, reason: impl Into<String>) -> Result<()> {
        self.backend.move_to_dead(job_id, reason.into()).await
    }

    pub async fn remove(&self, job_id: JobId) -> Result<bool> {
        self.backend.remove(job_id).await
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<QueueEntry>> {
        self.backend.get(job_id).await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.backend.counts().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadRecord>> {
        self.backend.dead_letters().await
    }
}
