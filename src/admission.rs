use std::sync::{Arc, Mutex};

use crate::config::ServiceConfig;

/// Process-wide resource accounting for container admission.
#[derive(Debug, Clone, Copy)]
pub struct ResourceState {
    pub active_containers: usize,
    pub max_concurrent: usize,
    pub memory_per_container_mb: u64,
    pub total_memory_mb: u64,
    pub memory_threshold: f64,
}

/// View of host resources for [`ResourceGate::recompute_limits`].
#[derive(Debug, Clone, Copy)]
pub struct HostResources {
    pub total_memory_mb: u64,
    pub cpu_count: usize,
}

/// Answers "may I launch one more container?". One instance exists per
/// process; workers admit before invoking the executor and the permit
/// releases the slot when dropped.
pub struct ResourceGate {
    state: Mutex<ResourceState>,
}

impl ResourceGate {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            state: Mutex::new(ResourceState {
                active_containers: 0,
                max_concurrent: config.max_concurrent_containers,
                memory_per_container_mb: config.container_memory_mb,
                total_memory_mb: config.total_memory_mb,
                memory_threshold: config.memory_threshold,
            }),
        }
    }

    /// Reserve one container slot. Returns a permit that must be held for
    /// the container's lifetime; dropping it releases the slot.
    pub fn try_admit(self: Arc<Self>) -> Option<AdmissionPermit> {
        {
            let mut state = self.state.lock().expect("resource gate lock poisoned");
            if state.active_containers >= state.max_concurrent {
                return None;
            }
            let reserved = (state.active_containers as u64 + 1) * state.memory_per_container_mb;
            let budget = (state.total_memory_mb as f64 * state.memory_threshold) as u64;
            if reserved > budget {
                return None;
            }
            state.active_containers += 1;
        }
        Some(AdmissionPermit { gate: self })
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("resource gate lock poisoned");
        // Going negative means a double release; that is a programming
        // error this process must not keep scheduling through.
        assert!(
            state.active_containers > 0,
            "admission release without a matching admit"
        );
        state.active_containers -= 1;
    }

    /// Adjust the concurrency bound from a fresh view of the host.
    pub fn recompute_limits(&self, host: HostResources) {
        let mut state = self.state.lock().expect("resource gate lock poisoned");
        state.total_memory_mb = host.total_memory_mb;
        let by_memory = ((host.total_memory_mb as f64 * state.memory_threshold) as u64
            / state.memory_per_container_mb.max(1)) as usize;
        let recomputed = by_memory.min(host.cpu_count.max(1) * 2).max(1);
        if recomputed != state.max_concurrent {
            tracing::info!(
                old = state.max_concurrent,
                new = recomputed,
                "Recomputed container concurrency limit"
            );
            state.max_concurrent = recomputed;
        }
    }

    pub fn snapshot(&self) -> ResourceState {
        *self.state.lock().expect("resource gate lock poisoned")
    }

    pub fn active(&self) -> usize {
        self.snapshot().active_containers
    }
}

/// Holds one admitted container slot; releases it on drop so every exit
/// path of the executor gives the slot back exactly once.
pub struct AdmissionPermit {
    gate: Arc<ResourceGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
