use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::WorkerGauge;
use crate::worker::worker::{run_worker, WorkerContext};

struct WorkerHandle {
    id: usize,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the worker tasks and scales their number between the configured
/// bounds based on queue backlog.
pub struct WorkerPool {
    ctx: WorkerContext,
    min_workers: usize,
    max_workers: usize,
    jobs_per_worker: usize,
    scale_interval: Duration,
    shutdown: CancellationToken,
    workers: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
    gauge: WorkerGauge,
}

impl WorkerPool {
    pub fn new(
        ctx: WorkerContext,
        min_workers: usize,
        max_workers: usize,
        jobs_per_worker: usize,
        scale_interval: Duration,
        gauge: WorkerGauge,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            min_workers: min_workers.max(1),
            max_workers: max_workers.max(min_workers.max(1)),
            jobs_per_worker: jobs_per_worker.max(1),
            scale_interval,
            shutdown,
            workers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            gauge,
        })
    }

    /// Spawn the minimum worker set and the scaler task.
    pub async fn start(self: Arc<Self>) {
        {
            let mut workers = self.workers.lock().await;
            for _ in 0..self.min_workers {
                self.spawn_worker(&mut workers);
            }
        }
        let pool = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.scale_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = pool.shutdown.cancelled() => break,
                }
                pool.scale_tick().await;
            }
        });
    }

    fn spawn_worker(&self, workers: &mut Vec<WorkerHandle>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = self.shutdown.child_token();
        let handle = tokio::spawn(run_worker(id, self.ctx.clone(), stop.clone()));
        workers.push(WorkerHandle { id, stop, handle });
        self.gauge.set(workers.len());
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// One scaling decision: reap dead workers, then grow or shrink
    /// toward the backlog-derived target. Serialized by the single
    /// scaler task holding the workers lock.
    async fn scale_tick(&self) {
        let counts = match self.ctx.queue.counts().await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(error = %e, "Scaler could not read queue depth");
                return;
            }
        };
        let backlog = counts.backlog();
        let desired = backlog
            .div_ceil(self.jobs_per_worker)
            .clamp(self.min_workers, self.max_workers);

        let mut workers = self.workers.lock().await;
        workers.retain(|w| !w.handle.is_finished());

        let current = workers.len();
        if desired > current {
            tracing::info!(current, desired, backlog, "Scaling worker pool up");
            for _ in current..desired {
                self.spawn_worker(&mut workers);
            }
        } else if desired < current {
            tracing::info!(current, desired, backlog, "Scaling worker pool down");
            // Oldest workers stop first; each finishes its in-flight job
            // and then declines further claims.
            for retired in workers.drain(..current - desired) {
                tracing::debug!(worker_id = retired.id, "Retiring worker");
                retired.stop.cancel();
            }
            self.gauge.set(workers.len());
        }
    }

    /// Stop all workers and wait (bounded) for in-flight jobs to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        let drained = workers.drain(..).collect::<Vec<_>>();
        self.gauge.set(0);

        let waits = drained.into_iter().map(|worker| async move {
            worker.stop.cancel();
            match tokio::time::timeout(grace, worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(worker_id = worker.id, error = %e, "Worker task failed");
                }
                Err(_) => {
                    tracing::warn!(worker_id = worker.id, "Worker did not stop within grace period");
                }
            }
        });
        join_all(waits).await;
    }
}
