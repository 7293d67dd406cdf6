//! Signal-driven process lifecycle.
//!
//! The service drains itself through [`Service::shutdown`]; this module
//! decides when. The first SIGTERM or SIGINT starts the drain (workers
//! stop claiming, in-flight containers finish within the configured
//! grace period, the status pipeline flushes); a second signal while the
//! drain is still running abandons it and exits immediately.

use tokio::signal::unix::{signal, SignalKind};

use crate::service::Service;

/// Exit code for a drain abandoned by a second signal, 128 + SIGINT.
const ABORT_EXIT_CODE: i32 = 130;

/// Run the service until the process is signalled, then drain it.
pub async fn run_until_signal(service: Service) -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => tracing::info!(signal = "SIGTERM", "Draining service"),
        _ = int.recv() => tracing::info!(signal = "SIGINT", "Draining service"),
    }

    let drain = service.shutdown();
    tokio::pin!(drain);
    tokio::select! {
        _ = &mut drain => {}
        _ = term.recv() => abort_drain(),
        _ = int.recv() => abort_drain(),
    }
    Ok(())
}

fn abort_drain() {
    tracing::warn!("Second signal received, abandoning drain");
    std::process::exit(ABORT_EXIT_CODE);
}
