use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{KilnError, Result};
use crate::job::JobStatus;
use crate::metrics::SystemMetrics;
use crate::queue::JobId;
use crate::store::{JobLogRecord, JobOutcome, JobRecord, JobStatistics, JobStore};

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    logs: Vec<JobLogRecord>,
    metrics: Vec<SystemMetrics>,
}

/// In-memory [`JobStore`] used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted metric snapshots, for tests.
    pub async fn metrics_count(&self) -> usize {
        self.tables.read().await.metrics.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn save_job(&self, record: &JobRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.jobs.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| KilnError::Store(format!("no such job: {id}")))?;
        record.status = status;
        match status {
            JobStatus::Active => {
                record.start_time = Some(Utc::now());
                record.end_time = None;
                record.duration_ms = None;
                record.exit_code = None;
                record.error = None;
            }
            JobStatus::Completed
            | JobStatus::Failed
            | JobStatus::TimedOut
            | JobStatus::FailedPermanently => {
                let end = Utc::now();
                record.end_time = Some(end);
                if let Some(start) = record.start_time {
                    record.duration_ms = Some((end - start).num_milliseconds());
                }
            }
            _ => {}
        }
        if let Some(outcome) = outcome {
            if outcome.exit_code.is_some() {
                record.exit_code = outcome.exit_code;
            }
            if outcome.error.is_some() {
                record.error = outcome.error;
            }
        }
        Ok(())
    }

    async fn record_attempt(&self, id: JobId, attempts_made: u32) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| KilnError::Store(format!("no such job: {id}")))?;
        // Monotonic: a redelivered claim may replay an older attempt number.
        if attempts_made > record.attempts_made {
            record.attempts_made = attempts_made;
        }
        Ok(())
    }

    async fn save_job_log(&self, log: &JobLogRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.logs.push(log.clone());
        Ok(())
    }

    async fn save_system_metrics(&self, snapshot: &SystemMetrics) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.metrics.push(snapshot.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, states: &[JobStatus]) -> Result<Vec<JobRecord>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<JobRecord> = tables
            .jobs
            .values()
            .filter(|j| states.is_empty() || states.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.spec.submitted_at);
        Ok(jobs)
    }

    async fn get_job_logs(&self, id: JobId) -> Result<Vec<JobLogRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.job_id == id)
            .cloned()
            .collect())
    }

    async fn get_job_statistics(&self) -> Result<JobStatistics> {
        let tables = self.tables.read().await;
        let mut stats = JobStatistics {
            total: tables.jobs.len(),
            ..Default::default()
        };
        let mut durations = Vec::new();
        for job in tables.jobs.values() {
            *stats.by_status.entry(job.status.to_string()).or_insert(0) += 1;
            if let Some(ms) = job.duration_ms {
                durations.push(ms as f64);
            }
        }
        if !durations.is_empty() {
            stats.average_duration_ms =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        Ok(stats)
    }
}
