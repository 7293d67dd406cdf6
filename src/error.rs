use thiserror::Error;

use crate::queue::JobId;

#[derive(Error, Debug)]
pub enum KilnError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, KilnError>;
