use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::ResourceGate;
use crate::pubsub::PubSub;
use crate::queue::{JobQueue, QueueCounts};
use crate::store::JobStore;

/// Aggregate snapshot published on `system:metrics` and persisted for the
/// dashboard collaborator. Not part of scheduling correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub queue: QueueCounts,
    pub active_containers: usize,
    pub workers: usize,
    pub memory_reserved_mb: u64,
    /// Estimated, not measured: active containers over the concurrency cap.
    pub cpu_estimate: f64,
}

/// Shared gauge the worker pool keeps current for the collector.
#[derive(Clone, Default)]
pub struct WorkerGauge(Arc<AtomicUsize>);

impl WorkerGauge {
    pub fn set(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Spawn the periodic metrics collector. Failures to persist a snapshot
/// are logged and skipped; the next tick tries again.
pub fn spawn_collector(
    queue: JobQueue,
    gate: Arc<ResourceGate>,
    workers: WorkerGauge,
    store: Arc<dyn JobStore>,
    pubsub: PubSub,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            let counts = match queue.counts().await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read queue counts for metrics");
                    continue;
                }
            };
            let resources = gate.snapshot();
            let snapshot = SystemMetrics {
                timestamp: Utc::now(),
                queue: counts,
                active_containers: resources.active_containers,
                workers: workers.get(),
                memory_reserved_mb: resources.active_containers as u64
                    * resources.memory_per_container_mb,
                cpu_estimate: if resources.max_concurrent == 0 {
                    0.0
                } else {
                    resources.active_containers as f64 / resources.max_concurrent as f64
                },
            };
            if let Err(e) = store.save_system_metrics(&snapshot).await {
                tracing::warn!(error = %e, "Failed to persist metrics snapshot");
            }
            pubsub.publish_metrics(snapshot);
        }
    })
}
