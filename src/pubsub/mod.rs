//! Realtime fan-out bus.
//!
//! Exactly three named channels exist; the WebSocket relay that pushes
//! them to browsers is a collaborator that subscribes here. Publishing
//! never blocks: slow subscribers lag and miss events rather than stall
//! the executor's hot path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobStatus;
use crate::logs::LogKind;
use crate::metrics::SystemMetrics;
use crate::queue::JobId;

pub const STATUS_CHANNEL: &str = "job:status";
pub const LOGS_CHANNEL: &str = "job:logs";
pub const METRICS_CHANNEL: &str = "system:metrics";

/// Event on `job:status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Event on `job:logs`. Carries every streamed chunk, duplicates included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

/// In-process pub/sub bus backing the three realtime channels.
#[derive(Clone)]
pub struct PubSub {
    status_tx: broadcast::Sender<StatusEvent>,
    logs_tx: broadcast::Sender<LogEvent>,
    metrics_tx: broadcast::Sender<SystemMetrics>,
}

impl PubSub {
    pub fn new(capacity: usize) -> Self {
        let (status_tx, _) = broadcast::channel(capacity);
        let (logs_tx, _) = broadcast::channel(capacity);
        let (metrics_tx, _) = broadcast::channel(capacity);
        Self {
            status_tx,
            logs_tx,
            metrics_tx,
        }
    }

    pub fn publish_status(&self, job_id: JobId, status: JobStatus, data: Option<serde_json::Value>) {
        let event = StatusEvent {
            job_id,
            status,
            data,
            timestamp: Utc::now(),
        };
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.status_tx.send(event);
    }

    pub fn publish_log(&self, job_id: JobId, kind: LogKind, data: impl Into<String>) {
        let event = LogEvent {
            job_id,
            kind,
            data: data.into(),
            timestamp: Utc::now(),
        };
        let _ = self.logs_tx.send(event);
    }

    pub fn publish_metrics(&self, snapshot: SystemMetrics) {
        let _ = self.metrics_tx.send(snapshot);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.logs_tx.subscribe()
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<SystemMetrics> {
        self.metrics_tx.subscribe()
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(1024)
    }
}
