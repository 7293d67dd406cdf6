use std::path::PathBuf;
use std::time::Duration;

use crate::job::TIMEOUT_CAP_MS;

/// Service-wide configuration. Defaults suit a small single-host
/// deployment; every knob can be overridden from the environment via
/// [`ServiceConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root under which per-job workspaces are allocated.
    pub workspace_root: PathBuf,
    /// Container name prefix; container name is `<prefix>-<job_id>`.
    pub container_prefix: String,
    pub max_concurrent_containers: usize,
    pub container_memory_mb: u64,
    pub total_memory_mb: u64,
    /// Fraction of total memory the admission controller may reserve.
    pub memory_threshold: f64,
    /// Backoff schedule indexed by attempts already made.
    pub retry_delays: Vec<Duration>,
    pub max_retries: u32,
    pub timeout_cap_ms: u64,
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_interval: Duration,
    pub jobs_per_worker: usize,
    /// Re-enqueue delay when admission is denied.
    pub admission_retry_delay: Duration,
    /// How long a claim stays invisible before the queue redelivers it.
    pub claim_visibility: Duration,
    /// Per-job cap on buffered log chunks; overflow drops the oldest.
    pub log_buffer_chunks: usize,
    pub metrics_interval: Duration,
    /// Bounded wait for in-flight jobs during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let retry_delays = vec![
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(15),
            Duration::from_secs(60),
            Duration::from_secs(300),
        ];
        Self {
            workspace_root: std::env::temp_dir().join("kiln"),
            container_prefix: "kiln".to_string(),
            max_concurrent_containers: 5,
            container_memory_mb: 512,
            total_memory_mb: 8192,
            memory_threshold: 0.8,
            max_retries: retry_delays.len() as u32,
            retry_delays,
            timeout_cap_ms: TIMEOUT_CAP_MS,
            min_workers: 1,
            max_workers: 8,
            scale_interval: Duration::from_secs(15),
            jobs_per_worker: 4,
            admission_retry_delay: Duration::from_secs(2),
            claim_visibility: Duration::from_secs(330),
            log_buffer_chunks: 1024,
            metrics_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl ServiceConfig {
    /// Build a configuration from the environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(root) = std::env::var("WORKSPACE_ROOT") {
            if !root.is_empty() {
                cfg.workspace_root = PathBuf::from(root);
            }
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_CONTAINERS") {
            cfg.max_concurrent_containers = v;
        }
        if let Some(v) = env_parse("CONTAINER_MEMORY_MB") {
            cfg.container_memory_mb = v;
        }
        if let Some(v) = env_parse("TOTAL_MEMORY_MB") {
            cfg.total_memory_mb = v;
        }
        if let Some(v) = env_parse::<f64>("MEMORY_THRESHOLD") {
            if v > 0.0 && v <= 1.0 {
                cfg.memory_threshold = v;
            }
        }
        if let Ok(raw) = std::env::var("RETRY_DELAYS") {
            let delays: Vec<Duration> = raw
                .split(',')
                .filter_map(|part| part.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .collect();
            if !delays.is_empty() {
                cfg.max_retries = delays.len() as u32;
                cfg.retry_delays = delays;
            }
        }
        if let Some(v) = env_parse("MAX_RETRIES") {
            cfg.max_retries = v;
        }
        if let Some(v) = env_parse("TIMEOUT_CAP_MS") {
            cfg.timeout_cap_ms = v;
        }
        if let Some(v) = env_parse("MIN_WORKERS") {
            cfg.min_workers = v;
        }
        if let Some(v) = env_parse("MAX_WORKERS") {
            cfg.max_workers = v;
        }
        if let Some(v) = env_parse::<u64>("SCALE_INTERVAL_MS") {
            cfg.scale_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("JOBS_PER_WORKER") {
            cfg.jobs_per_worker = v;
        }
        if cfg.max_workers < cfg.min_workers {
            cfg.max_workers = cfg.min_workers;
        }
        cfg
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }
}
