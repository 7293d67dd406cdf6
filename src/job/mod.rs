pub mod spec;
pub mod status;

pub use spec::{JobSpec, MemoryLimit, Submission, DEFAULT_TIMEOUT_MS, TIMEOUT_CAP_MS};
pub use status::JobStatus;
