//! Log multiplexer.
//!
//! Output chunks from the executor fan out two ways: every chunk is
//! published on the realtime `job:logs` channel, while an in-memory
//! accumulator keeps one deduplicated copy per (stream, content) pair.
//! On the job's terminal transition the accumulator is flushed as at most
//! one consolidated record per stream and destroyed, so the durable log
//! table holds at most two rows per job.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::pubsub::PubSub;
use crate::queue::JobId;
use crate::store::{JobLogRecord, JobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Stdout => write!(f, "stdout"),
            LogKind::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Default)]
struct Accumulator {
    /// Unique chunks in arrival order, interleaved across streams.
    chunks: VecDeque<(LogKind, String)>,
    seen: HashSet<u64>,
    overflow_warned: bool,
}

/// Fans executor output out to realtime subscribers and a bounded
/// per-job accumulator destined for durable storage.
pub struct LogMux {
    store: Arc<dyn JobStore>,
    pubsub: PubSub,
    jobs: Mutex<HashMap<JobId, Accumulator>>,
    /// Per-job cap on buffered unique chunks; overflow drops the oldest.
    capacity: usize,
}

fn chunk_hash(kind: LogKind, content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    content.hash(&mut hasher);
    hasher.finish()
}

impl LogMux {
    pub fn new(store: Arc<dyn JobStore>, pubsub: PubSub, capacity: usize) -> Self {
        Self {
            store,
            pubsub,
            jobs: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Ingest one output chunk. Realtime subscribers see every chunk;
    /// the accumulator stores only content it has not seen on that stream.
    pub fn append(&self, job_id: JobId, kind: LogKind, chunk: &str) {
        if chunk.trim().is_empty() {
            return;
        }
        self.pubsub.publish_log(job_id, kind, chunk);

        let mut jobs = self.jobs.lock().expect("log mux lock poisoned");
        let acc = jobs.entry(job_id).or_default();
        if !acc.seen.insert(chunk_hash(kind, chunk)) {
            return;
        }
        if acc.chunks.len() >= self.capacity {
            acc.chunks.pop_front();
            if !acc.overflow_warned {
                acc.overflow_warned = true;
                tracing::warn!(job_id = %job_id, capacity = self.capacity,
                    "Log buffer full, dropping oldest chunks");
            }
        }
        acc.chunks.push_back((kind, chunk.to_string()));
    }

    /// Persist the consolidated records and destroy the accumulator.
    /// Invoked once, on the job's terminal transition.
    pub async fn flush(&self, job_id: JobId) {
        let acc = {
            let mut jobs = self.jobs.lock().expect("log mux lock poisoned");
            jobs.remove(&job_id)
        };
        let Some(acc) = acc else {
            return;
        };
        for kind in [LogKind::Stdout, LogKind::Stderr] {
            let content: Vec<&str> = acc
                .chunks
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, c)| c.as_str())
                .collect();
            if content.is_empty() {
                continue;
            }
            let record = JobLogRecord {
                job_id,
                kind,
                content: content.join("\n"),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.store.save_job_log(&record).await {
                tracing::error!(job_id = %job_id, stream = %kind, error = %e,
                    "Failed to persist consolidated log");
            }
        }
    }

    /// Whether a job still has a live accumulator, for tests.
    pub fn has_buffer(&self, job_id: JobId) -> bool {
        self.jobs
            .lock()
            .expect("log mux lock poisoned")
            .contains_key(&job_id)
    }
}
