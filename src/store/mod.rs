//! Durable persistence boundary.
//!
//! The scheduling core only relies on the operations in [`JobStore`]; the
//! production deployment backs it with a relational database owned by a
//! collaborator, while [`MemoryStore`] keeps the single-process and test
//! setups self-contained.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::{JobSpec, JobStatus};
use crate::logs::LogKind;
use crate::metrics::SystemMetrics;
use crate::queue::JobId;

pub use memory::MemoryStore;

/// Durable view of one job: immutable payload plus lifecycle fields the
/// worker owning the claim mutates through the status pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId, spec: JobSpec) -> Self {
        Self {
            id,
            spec,
            status: JobStatus::Waiting,
            attempts_made: 0,
            start_time: None,
            end_time: None,
            duration_ms: None,
            exit_code: None,
            error: None,
        }
    }
}

/// Result fields attached to a terminal status write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOutcome {
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            error: Some(message.into()),
        }
    }
}

/// One consolidated log row per (job, stream).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogRecord {
    pub job_id: JobId,
    pub kind: LogKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters for the collaborator dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub average_duration_ms: Option<f64>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create the backing schema. Idempotent; the bootstrapper fails
    /// closed if this errors.
    async fn init_schema(&self) -> Result<()>;

    async fn save_job(&self, record: &JobRecord) -> Result<()>;

    /// Apply a status transition. `Active` stamps `start_time` and clears
    /// any previous attempt's result; attempt-terminal statuses stamp
    /// `end_time` and derive `duration_ms`.
    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> Result<()>;

    /// Record that attempt number `attempts_made` has started.
    async fn record_attempt(&self, id: JobId, attempts_made: u32) -> Result<()>;

    async fn save_job_log(&self, log: &JobLogRecord) -> Result<()>;

    async fn save_system_metrics(&self, snapshot: &SystemMetrics) -> Result<()>;

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Jobs in any of `states`; all jobs when `states` is empty.
    async fn list_jobs(&self, states: &[JobStatus]) -> Result<Vec<JobRecord>>;

    async fn get_job_logs(&self, id: JobId) -> Result<Vec<JobLogRecord>>;

    async fn get_job_statistics(&self) -> Result<JobStatistics>;
}
