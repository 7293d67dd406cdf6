use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// Transitions form a DAG enforced by the status pipeline:
/// waiting moves to active, delayed, or failed_permanently; delayed returns
/// to waiting or is cancelled into failed_permanently; active ends an
/// attempt as completed, failed, or timed_out; failed and timed_out either
/// enter retrying (back to waiting) or failed_permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    TimedOut,
    Retrying,
    FailedPermanently,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Delayed => write!(f, "delayed"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed_out"),
            JobStatus::Retrying => write!(f, "retrying"),
            JobStatus::FailedPermanently => write!(f, "failed_permanently"),
        }
    }
}

impl JobStatus {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Waiting, Active)
                | (Waiting, Delayed)
                | (Waiting, FailedPermanently)
                | (Delayed, Waiting)
                | (Delayed, FailedPermanently)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, TimedOut)
                | (Failed, Retrying)
                | (Failed, FailedPermanently)
                | (TimedOut, Retrying)
                | (TimedOut, FailedPermanently)
                | (Retrying, Waiting)
        )
    }

    /// Terminal states never leave the DAG again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::FailedPermanently)
    }
}
