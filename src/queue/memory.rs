use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{KilnError, Result};
use crate::job::JobSpec;
use crate::queue::{
    Claim, DeadRecord, EnqueueOpts, JobId, QueueBackend, QueueCounts, QueueEntry, QueueState,
};

/// How often a blocked `claim` re-scans for due delayed records and
/// expired claims.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Record {
    spec: JobSpec,
    state: QueueState,
    attempts_made: u32,
    max_retries: u32,
    /// Delayed records become claimable at this instant.
    not_before: Option<Instant>,
    /// Active claims are redelivered after this instant.
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<JobId, Record>,
    waiting: VecDeque<JobId>,
    dead: Vec<DeadRecord>,
}

/// In-process queue backend with the same delivery contract a networked
/// queue would give the workers: exclusive claims, delayed promotion, and
/// visibility-timeout redelivery when a claim holder dies.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    claim_visibility: Duration,
}

impl MemoryQueue {
    pub fn new(claim_visibility: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            claim_visibility,
        }
    }

    /// Promote due delayed records and requeue expired claims. Called
    /// under the lock from every claim attempt.
    fn sweep(inner: &mut Inner, now: Instant) {
        let mut promote = Vec::new();
        let mut redeliver = Vec::new();
        for (id, record) in inner.records.iter() {
            match record.state {
                QueueState::Delayed => {
                    if record.not_before.map_or(true, |t| t <= now) {
                        promote.push(*id);
                    }
                }
                QueueState::Active => {
                    if record.deadline.is_some_and(|t| t <= now) {
                        redeliver.push(*id);
                    }
                }
                _ => {}
            }
        }
        for id in promote {
            if let Some(record) = inner.records.get_mut(&id) {
                record.state = QueueState::Waiting;
                record.not_before = None;
                inner.waiting.push_back(id);
            }
        }
        for id in redeliver {
            if let Some(record) = inner.records.get_mut(&id) {
                tracing::warn!(job_id = %id, "Claim expired without acknowledgment, redelivering");
                record.state = QueueState::Waiting;
                record.deadline = None;
                inner.waiting.push_front(id);
            }
        }
    }

    fn try_claim(&self) -> Option<Claim> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        Self::sweep(&mut inner, Instant::now());
        while let Some(id) = inner.waiting.pop_front() {
            // Skip ids whose record moved on since they were queued.
            let Some(record) = inner.records.get_mut(&id) else {
                continue;
            };
            if record.state != QueueState::Waiting {
                continue;
            }
            record.state = QueueState::Active;
            record.deadline = Some(Instant::now() + self.claim_visibility);
            return Some(Claim {
                job_id: id,
                spec: record.spec.clone(),
                attempts_made: record.attempts_made,
                max_retries: record.max_retries,
            });
        }
        None
    }

    fn transition(&self, job_id: JobId, to: QueueState) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let record = inner
            .records
            .get_mut(&job_id)
            .ok_or_else(|| KilnError::Queue(format!("no such record: {job_id}")))?;
        if record.state == QueueState::Dead {
            // A concurrent cancel won the record; dead is sticky.
            return Ok(());
        }
        record.state = to;
        record.deadline = None;
        record.not_before = None;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, job_id: JobId, spec: JobSpec, opts: EnqueueOpts) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.records.contains_key(&job_id) {
                return Err(KilnError::Queue(format!("duplicate record: {job_id}")));
            }
            let delayed = !opts.delay.is_zero();
            inner.records.insert(
                job_id,
                Record {
                    spec,
                    state: if delayed {
                        QueueState::Delayed
                    } else {
                        QueueState::Waiting
                    },
                    attempts_made: 0,
                    max_retries: opts.max_retries,
                    not_before: delayed.then(|| Instant::now() + opts.delay),
                    deadline: None,
                },
            );
            if !delayed {
                inner.waiting.push_back(job_id);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn claim(&self, shutdown: &CancellationToken) -> Result<Option<Claim>> {
        loop {
            if let Some(claim) = self.try_claim() {
                return Ok(Some(claim));
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                _ = shutdown.cancelled() => return Ok(None),
            }
        }
    }

    async fn extend_claim(&self, job_id: JobId) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let record = inner
            .records
            .get_mut(&job_id)
            .ok_or_else(|| KilnError::Queue(format!("no such record: {job_id}")))?;
        if record.state == QueueState::Active {
            record.deadline = Some(Instant::now() + self.claim_visibility);
        }
        Ok(())
    }

    async fn complete(&self, job_id: JobId) -> Result<()> {
        self.transition(job_id, QueueState::Completed)
    }

    async fn fail(&self, job_id: JobId) -> Result<()> {
        self.transition(job_id, QueueState::Failed)
    }

    async fn move_to_delayed(
        &self,
        job_id: JobId,
        delay: Duration,
        attempts_made: u32,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let record = inner
                .records
                .get_mut(&job_id)
                .ok_or_else(|| KilnError::Queue(format!("no such record: {job_id}")))?;
            if record.state == QueueState::Dead {
                // A concurrent cancel won the record; dead is sticky.
                return Ok(());
            }
            record.state = QueueState::Delayed;
            record.attempts_made = attempts_made;
            record.not_before = Some(Instant::now() + delay);
            record.deadline = None;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn move_to_dead(&self, job_id: JobId, reason: String) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let record = inner
            .records
            .get_mut(&job_id)
            .ok_or_else(|| KilnError::Queue(format!("no such record: {job_id}")))?;
        if record.state == QueueState::Dead {
            // Idempotent: a record dies once.
            return Ok(());
        }
        record.state = QueueState::Dead;
        record.deadline = None;
        record.not_before = None;
        let dead = DeadRecord {
            job_id,
            spec: record.spec.clone(),
            reason,
            attempts_made: record.attempts_made,
            moved_at: Utc::now(),
        };
        inner.dead.push(dead);
        Ok(())
    }

    async fn remove(&self, job_id: JobId) -> Result<bool> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let removed = inner.records.remove(&job_id).is_some();
        inner.waiting.retain(|id| *id != job_id);
        Ok(removed)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<QueueEntry>> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        Ok(inner.records.get(&job_id).map(|record| QueueEntry {
            job_id,
            spec: record.spec.clone(),
            state: record.state,
            attempts_made: record.attempts_made,
        }))
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let mut counts = QueueCounts::default();
        for record in inner.records.values() {
            match record.state {
                QueueState::Waiting => counts.waiting += 1,
                QueueState::Delayed => counts.delayed += 1,
                QueueState::Active => counts.active += 1,
                QueueState::Completed => counts.completed += 1,
                QueueState::Failed => counts.failed += 1,
                QueueState::Dead => counts.dead += 1,
            }
        }
        Ok(counts)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadRecord>> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        Ok(inner.dead.clone())
    }
}
