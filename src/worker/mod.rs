//! Worker pool: claims jobs from the durable queue, coordinates with the
//! admission gate, dispatches to the executor, and feeds the status
//! pipeline and log multiplexer. The pool scales between configured
//! bounds based on queue depth.

pub mod pool;
pub mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::queue::JobId;

pub use pool::WorkerPool;
pub use worker::{run_worker, WorkerContext};

#[derive(Default)]
struct Registry {
    tokens: HashMap<JobId, CancellationToken>,
    /// Jobs cancelled in the window between the queue claim and the
    /// worker registering its token; consumed by the next `register`.
    pending: HashSet<JobId>,
}

/// Tracks cancellation tokens for jobs that are currently executing, so
/// a client cancel can reach the worker that owns the container. A cancel
/// that arrives before the owning worker registers is remembered and
/// hands that worker an already-cancelled token.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job as executing and get its cancellation token. The
    /// token comes back already cancelled when the job was cancelled
    /// before registration.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        let mut registry = self.inner.lock().expect("cancel registry lock poisoned");
        if registry.pending.remove(&job_id) {
            token.cancel();
        }
        registry.tokens.insert(job_id, token.clone());
        token
    }

    pub fn unregister(&self, job_id: JobId) {
        let mut registry = self.inner.lock().expect("cancel registry lock poisoned");
        registry.tokens.remove(&job_id);
        registry.pending.remove(&job_id);
    }

    /// Cancel an executing job. Returns false when the job is not
    /// currently executing here; the cancel is then left pending so a
    /// worker that already claimed the job still observes it.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let mut registry = self.inner.lock().expect("cancel registry lock poisoned");
        match registry.tokens.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => {
                registry.pending.insert(job_id);
                false
            }
        }
    }
}
