//! Status pipeline.
//!
//! A single consumer serializes all job status writes so the database
//! sees per-job transitions in the order the owning worker produced them,
//! while publishers never block on the database. The consumer validates
//! every transition against the status DAG, applies it to the durable
//! store, and republishes it on the realtime `job:status` channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{KilnError, Result};
use crate::job::JobStatus;
use crate::pubsub::PubSub;
use crate::queue::JobId;
use crate::store::{JobOutcome, JobStore};

/// Attempts made to write one transition before giving up and letting the
/// queue's visibility timeout redeliver the claim.
const STORE_WRITE_ATTEMPTS: u32 = 4;
const STORE_RETRY_BASE: Duration = Duration::from_millis(100);

struct Transition {
    job_id: JobId,
    status: JobStatus,
    outcome: Option<JobOutcome>,
    /// Present when the caller needs to know the write landed.
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Handle for publishing status transitions. Cheap to clone; all clones
/// feed the same consumer.
#[derive(Clone)]
pub struct StatusPipeline {
    tx: mpsc::Sender<Transition>,
}

impl StatusPipeline {
    /// Start the pipeline and its consumer task.
    pub fn start(store: Arc<dyn JobStore>, pubsub: PubSub) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1024);
        let handle = tokio::spawn(consume(rx, store, pubsub));
        (Self { tx }, handle)
    }

    /// Enqueue a transition without waiting for the durable write.
    pub async fn publish(
        &self,
        job_id: JobId,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> Result<()> {
        self.tx
            .send(Transition {
                job_id,
                status,
                outcome,
                ack: None,
            })
            .await
            .map_err(|_| KilnError::ShuttingDown)
    }

    /// Enqueue a transition and wait until it is durably applied. Used
    /// for terminal transitions the worker must not lose: an error here
    /// means the caller should surrender its claim for redelivery.
    pub async fn commit(
        &self,
        job_id: JobId,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Transition {
                job_id,
                status,
                outcome,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| KilnError::ShuttingDown)?;
        ack_rx.await.map_err(|_| KilnError::ShuttingDown)?
    }
}

async fn consume(
    mut rx: mpsc::Receiver<Transition>,
    store: Arc<dyn JobStore>,
    pubsub: PubSub,
) {
    // Last applied status per job, for idempotence and DAG checks.
    let mut last: HashMap<JobId, JobStatus> = HashMap::new();

    while let Some(transition) = rx.recv().await {
        let Transition {
            job_id,
            status,
            outcome,
            ack,
        } = transition;

        match last.get(&job_id) {
            Some(prev) if *prev == status => {
                // Replay of the already-applied status.
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
                continue;
            }
            Some(prev) if !prev.can_transition(status) => {
                tracing::warn!(job_id = %job_id, from = %prev, to = %status,
                    "Dropping illegal status transition");
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
                continue;
            }
            _ => {}
        }

        let result = write_with_backoff(&store, job_id, status, outcome).await;
        match &result {
            Ok(()) => {
                last.insert(job_id, status);
                if status.is_terminal() {
                    last.remove(&job_id);
                }
                pubsub.publish_status(job_id, status, None);
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, status = %status, error = %e,
                    "Status write failed after retries");
            }
        }
        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
    }
}

async fn write_with_backoff(
    store: &Arc<dyn JobStore>,
    job_id: JobId,
    status: JobStatus,
    outcome: Option<JobOutcome>,
) -> Result<()> {
    let mut delay = STORE_RETRY_BASE;
    let mut last_err = None;
    for attempt in 0..STORE_WRITE_ATTEMPTS {
        match store.update_job_status(job_id, status, outcome.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if attempt + 1 < STORE_WRITE_ATTEMPTS {
                    tracing::warn!(job_id = %job_id, status = %status, error = %e,
                        "Status write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| KilnError::Internal("status write failed".to_string())))
}
