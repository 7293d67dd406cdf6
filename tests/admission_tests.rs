use std::sync::Arc;

use kiln::admission::{HostResources, ResourceGate};
use kiln::config::ServiceConfig;

fn gate_with(max_concurrent: usize, per_container_mb: u64, total_mb: u64) -> Arc<ResourceGate> {
    let mut config = ServiceConfig::default();
    config.max_concurrent_containers = max_concurrent;
    config.container_memory_mb = per_container_mb;
    config.total_memory_mb = total_mb;
    config.memory_threshold = 0.8;
    Arc::new(ResourceGate::new(&config))
}

#[test]
fn test_admit_up_to_concurrency_cap() {
    let gate = gate_with(2, 512, 8192);

    let first = gate.clone().try_admit();
    let second = gate.clone().try_admit();
    let third = gate.clone().try_admit();

    assert!(first.is_some());
    assert!(second.is_some());
    assert!(third.is_none());
    assert_eq!(gate.active(), 2);
}

#[test]
fn test_release_on_drop_frees_slot() {
    let gate = gate_with(1, 512, 8192);

    let permit = gate.clone().try_admit().unwrap();
    assert!(gate.clone().try_admit().is_none());

    drop(permit);
    assert_eq!(gate.active(), 0);
    assert!(gate.clone().try_admit().is_some());
}

#[test]
fn test_memory_budget_denies_before_concurrency() {
    // Cap allows 10 containers but only 2 fit in 80% of 1536MB at 512MB each.
    let gate = gate_with(10, 512, 1536);

    let a = gate.clone().try_admit();
    let b = gate.clone().try_admit();
    let c = gate.clone().try_admit();

    assert!(a.is_some());
    assert!(b.is_some());
    assert!(c.is_none());
}

#[test]
fn test_zero_concurrency_disables_admission() {
    let gate = gate_with(0, 512, 8192);
    assert!(gate.clone().try_admit().is_none());
}

#[test]
fn test_admission_invariant_under_contention() {
    let gate = gate_with(4, 512, 8192);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let gate = gate.clone();
        handles.push(std::thread::spawn(move || {
            let mut admitted = 0;
            for _ in 0..50 {
                if let Some(permit) = gate.clone().try_admit() {
                    assert!(gate.active() <= 4);
                    admitted += 1;
                    drop(permit);
                }
            }
            admitted
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(gate.active(), 0);
}

#[test]
fn test_recompute_limits_from_host_view() {
    let gate = gate_with(5, 512, 8192);

    // 2048MB * 0.8 / 512MB = 3 containers by memory
    gate.recompute_limits(HostResources {
        total_memory_mb: 2048,
        cpu_count: 8,
    });
    assert_eq!(gate.snapshot().max_concurrent, 3);

    // CPU-bound host: 1 core caps at 2
    gate.recompute_limits(HostResources {
        total_memory_mb: 65536,
        cpu_count: 1,
    });
    assert_eq!(gate.snapshot().max_concurrent, 2);
}
